use std::collections::HashMap;
use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque reference to a scene item owned by the host.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Character,
    Attachment,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RingStyle {
    pub stroke_color: String,
    pub stroke_width: f32,
    pub stroke_opacity: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ItemKind {
    Token,
    Ring(RingStyle),
}

/// A scene item as exposed by the host. Tokens live in the shared namespace,
/// overlay visuals in the local one.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub position: Vec2,
    /// Native pixel dimensions of the item's artwork.
    pub size: Vec2,
    /// Origin offset inside the artwork, in native pixels.
    pub grid_offset: Vec2,
    /// Grid resolution the artwork was authored against, in dots per cell.
    pub grid_dpi: f32,
    pub layer: Layer,
    pub attached_to: Option<ItemId>,
    pub disable_hit: bool,
    pub metadata: HashMap<String, Value>,
    pub kind: ItemKind,
}

impl Item {
    pub fn token(
        id: impl Into<ItemId>,
        name: impl Into<String>,
        position: Vec2,
        size: Vec2,
        grid_dpi: f32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            size,
            grid_offset: size / 2.0,
            grid_dpi,
            layer: Layer::Character,
            attached_to: None,
            disable_hit: false,
            metadata: HashMap::new(),
            kind: ItemKind::Token,
        }
    }

    pub fn ring(
        id: impl Into<ItemId>,
        center: Vec2,
        diameter: f32,
        style: RingStyle,
        attached_to: ItemId,
    ) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            position: center,
            size: Vec2::splat(diameter),
            grid_offset: Vec2::ZERO,
            grid_dpi: 0.0,
            layer: Layer::Attachment,
            attached_to: Some(attached_to),
            disable_hit: true,
            metadata: HashMap::new(),
            kind: ItemKind::Ring(style),
        }
    }

    pub fn with_grid_offset(mut self, grid_offset: Vec2) -> Self {
        self.grid_offset = grid_offset;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn metadata_flag(&self, key: &str) -> bool {
        matches!(self.metadata.get(key), Some(Value::Bool(true)))
    }
}
