use glam::Vec2;

/// Gap between the token's rendered edge and the ring stroke, in scene
/// pixels.
pub const RING_PADDING: f32 = 20.0;

/// Ratio rescaling an item authored against `item_dpi` into a scene running
/// at `scene_dpi`. An unset or degenerate item resolution reads as 1:1.
pub fn dpi_scale(scene_dpi: f32, item_dpi: f32) -> f32 {
    if item_dpi <= 0.0 {
        1.0
    } else {
        scene_dpi / item_dpi
    }
}

/// Ring diameter for a token with native pixel `size`, rendered at `scale`.
pub fn ring_diameter(size: Vec2, scale: f32) -> f32 {
    size.min_element() * scale + RING_PADDING
}

/// Scene-space center of the cell a token occupies. `position` is where the
/// host anchors the item; `grid_offset` is the anchor's offset inside the
/// artwork, so the drawn top-left sits at `position - grid_offset * scale`.
pub fn ring_center(position: Vec2, grid_offset: Vec2, size: Vec2, scale: f32) -> Vec2 {
    position - grid_offset * scale + size * scale * 0.5
}

/// Scene-space translation for one grid step of `(dx, dy)` cells.
pub fn step_offset(step: (i32, i32), cell_size: f32) -> Vec2 {
    Vec2::new(step.0 as f32 * cell_size, step.1 as f32 * cell_size)
}
