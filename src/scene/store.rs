use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use glam::Vec2;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use super::{Item, ItemId};

pub type MetadataMap = HashMap<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("scene is not ready")]
    SceneNotReady,
}

/// Key/value record store shared with other peers. Writes are
/// last-write-wins at the granularity of one key's whole value.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_metadata(&self) -> Result<MetadataMap, StoreError>;

    /// Merge `patch` into the stored mapping, replacing each touched key.
    async fn set_metadata(&self, patch: MetadataMap) -> Result<(), StoreError>;

    /// Every remote or local write delivers the full current mapping.
    fn subscribe_metadata(&self) -> broadcast::Receiver<MetadataMap>;
}

pub type ItemMutator<'a> = &'a (dyn Fn(&mut Item) + Send + Sync);

/// One item namespace. The host exposes two: the shared scene collection
/// and a local/ephemeral one that never replicates to other peers and is
/// safe to mutate at animation frequency.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_items(&self) -> Result<Vec<Item>, StoreError>;

    /// Fetch the subset of `ids` that currently resolve; missing ids are
    /// skipped, not an error.
    async fn get_items_by_id(&self, ids: &[ItemId]) -> Result<Vec<Item>, StoreError>;

    /// Apply `mutate` to every listed item that exists. Unknown ids are a
    /// no-op so callers can fire-and-forget against deleted items.
    async fn update_items(&self, ids: &[ItemId], mutate: ItemMutator<'_>) -> Result<(), StoreError>;

    async fn add_items(&self, items: Vec<Item>) -> Result<(), StoreError>;

    async fn delete_items(&self, ids: &[ItemId]) -> Result<(), StoreError>;

    /// Every creation/deletion/mutation delivers the full current collection.
    fn subscribe_items(&self) -> broadcast::Receiver<Vec<Item>>;
}

#[async_trait]
pub trait Grid: Send + Sync {
    /// Scene grid resolution in dots per cell.
    async fn resolution(&self) -> Result<f32, StoreError>;

    /// Snap `position` to the nearest grid point. `granularity` is in cells;
    /// `center_snap` targets cell centers instead of corners.
    async fn snap(
        &self,
        position: Vec2,
        granularity: f32,
        center_snap: bool,
    ) -> Result<Vec2, StoreError>;
}

pub trait SceneStatus: Send + Sync {
    fn ready(&self) -> bool;

    fn subscribe_ready(&self) -> watch::Receiver<bool>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
}

/// Transient user-facing toasts for explicit roster actions.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, level: NoticeLevel);
}

/// Everything the tracker needs from the host, bundled for wiring.
#[derive(Clone)]
pub struct SceneHandles {
    pub metadata: Arc<dyn MetadataStore>,
    pub items: Arc<dyn ItemStore>,
    pub local_items: Arc<dyn ItemStore>,
    pub grid: Arc<dyn Grid>,
    pub status: Arc<dyn SceneStatus>,
    pub notifier: Arc<dyn Notifier>,
}
