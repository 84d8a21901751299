use std::sync::Arc;

use anyhow::Context;
use log::debug;

use crate::scene::{Grid, ItemStore};

use super::geometry;
use super::registry::PartyRegistry;

/// One discrete key event as delivered by the host. `repeat` marks
/// auto-repeat while the key is held; those are ignored.
#[derive(Clone, Debug)]
pub struct KeyEvent {
    pub key: String,
    pub repeat: bool,
}

impl KeyEvent {
    pub fn press(key: &str) -> Self {
        Self {
            key: key.to_string(),
            repeat: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compass {
    NorthWest,
    North,
    NorthEast,
    West,
    East,
    SouthWest,
    South,
    SouthEast,
}

impl Compass {
    /// Grid step in cells, screen convention: north is negative y.
    pub fn step(self) -> (i32, i32) {
        match self {
            Compass::NorthWest => (-1, -1),
            Compass::North => (0, -1),
            Compass::NorthEast => (1, -1),
            Compass::West => (-1, 0),
            Compass::East => (1, 0),
            Compass::SouthWest => (-1, 1),
            Compass::South => (0, 1),
            Compass::SouthEast => (1, 1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlInput {
    CycleForward,
    CycleBack,
    Step(Compass),
    /// The numpad center key; bound, but deliberately inert.
    Hold,
}

impl ControlInput {
    pub fn from_event(event: &KeyEvent) -> Option<Self> {
        if event.repeat {
            return None;
        }
        Self::from_key(&event.key)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "]" | "PageDown" => ControlInput::CycleForward,
            "[" | "PageUp" => ControlInput::CycleBack,
            "Numpad1" => ControlInput::Step(Compass::SouthWest),
            "Numpad2" => ControlInput::Step(Compass::South),
            "Numpad3" => ControlInput::Step(Compass::SouthEast),
            "Numpad4" => ControlInput::Step(Compass::West),
            "Numpad5" => ControlInput::Hold,
            "Numpad6" => ControlInput::Step(Compass::East),
            "Numpad7" => ControlInput::Step(Compass::NorthWest),
            "Numpad8" => ControlInput::Step(Compass::North),
            "Numpad9" => ControlInput::Step(Compass::NorthEast),
            _ => return None,
        })
    }
}

/// Applies key-driven commands: cycling the active entry through the
/// registry, and grid-stepped translation of the active token.
pub struct DirectionalControl {
    registry: PartyRegistry,
    items: Arc<dyn ItemStore>,
    grid: Arc<dyn Grid>,
}

impl DirectionalControl {
    pub fn new(registry: PartyRegistry, items: Arc<dyn ItemStore>, grid: Arc<dyn Grid>) -> Self {
        Self {
            registry,
            items,
            grid,
        }
    }

    pub async fn apply(&self, input: ControlInput) -> Result<(), anyhow::Error> {
        match input {
            ControlInput::CycleForward => {
                self.registry.shift_active(1).await?;
            }
            ControlInput::CycleBack => {
                self.registry.shift_active(-1).await?;
            }
            ControlInput::Step(direction) => self.step_active(direction).await?,
            ControlInput::Hold => {}
        }
        Ok(())
    }

    async fn step_active(&self, direction: Compass) -> Result<(), anyhow::Error> {
        let state = self.registry.get().await?;
        let Some(active_id) = state.active_id else {
            return Ok(());
        };

        let ids = [active_id.clone()];
        let Some(token) = self.items.get_items_by_id(&ids).await?.pop() else {
            return Ok(());
        };

        let cell_size = self
            .grid
            .resolution()
            .await
            .context("failed to read grid resolution")?;
        let target = token.position + geometry::step_offset(direction.step(), cell_size);
        let snapped = self
            .grid
            .snap(target, 1.0, true)
            .await
            .context("failed to snap target position")?;

        self.items
            .update_items(&ids, &|item| item.position = snapped)
            .await
            .context("failed to move active token")?;
        debug!(
            "moved {} {:?} to ({}, {})",
            active_id, direction, snapped.x, snapped.y
        );
        Ok(())
    }
}
