use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use glam::Vec2;
use log::debug;
use tokio::sync::{broadcast, watch};

use super::store::{
    Grid, ItemMutator, MetadataMap, MetadataStore, NoticeLevel, Notifier, SceneHandles,
    SceneStatus, StoreError,
};
use super::{Item, ItemId, ItemStore};

const FEED_CAPACITY: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Namespace {
    Shared,
    Local,
}

#[derive(Default)]
struct SceneState {
    metadata: MetadataMap,
    shared: Vec<Item>,
    local: Vec<Item>,
}

struct SceneInner {
    state: Mutex<SceneState>,
    notices: Mutex<Vec<(String, NoticeLevel)>>,
    metadata_tx: broadcast::Sender<MetadataMap>,
    shared_tx: broadcast::Sender<Vec<Item>>,
    local_tx: broadcast::Sender<Vec<Item>>,
    ready_tx: watch::Sender<bool>,
    dpi: f32,
}

impl SceneInner {
    fn guard(&self) -> Result<(), StoreError> {
        if *self.ready_tx.borrow() {
            Ok(())
        } else {
            Err(StoreError::SceneNotReady)
        }
    }
}

/// In-process host implementing every boundary trait, used by the demo
/// binary and the test suite. Change feeds deliver full snapshots, matching
/// the remote host's notification contract.
#[derive(Clone)]
pub struct MemoryScene {
    inner: Arc<SceneInner>,
}

impl MemoryScene {
    pub fn new(dpi: f32) -> Self {
        let (ready_tx, _ready_rx) = watch::channel(false);
        Self {
            inner: Arc::new(SceneInner {
                state: Mutex::new(SceneState::default()),
                notices: Mutex::new(Vec::new()),
                metadata_tx: broadcast::channel(FEED_CAPACITY).0,
                shared_tx: broadcast::channel(FEED_CAPACITY).0,
                local_tx: broadcast::channel(FEED_CAPACITY).0,
                ready_tx,
                dpi,
            }),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.ready_tx.send_replace(ready);
    }

    /// Handle onto the shared item namespace.
    pub fn items(&self) -> MemoryItems {
        MemoryItems {
            inner: self.inner.clone(),
            namespace: Namespace::Shared,
        }
    }

    /// Handle onto the local/ephemeral item namespace.
    pub fn local_items(&self) -> MemoryItems {
        MemoryItems {
            inner: self.inner.clone(),
            namespace: Namespace::Local,
        }
    }

    pub fn handles(&self) -> SceneHandles {
        SceneHandles {
            metadata: Arc::new(self.clone()),
            items: Arc::new(self.items()),
            local_items: Arc::new(self.local_items()),
            grid: Arc::new(self.clone()),
            status: Arc::new(self.clone()),
            notifier: Arc::new(self.clone()),
        }
    }

    /// Notifications captured so far, oldest first.
    pub fn notices(&self) -> Vec<(String, NoticeLevel)> {
        self.inner.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataStore for MemoryScene {
    async fn get_metadata(&self) -> Result<MetadataMap, StoreError> {
        self.inner.guard()?;
        Ok(self.inner.state.lock().unwrap().metadata.clone())
    }

    async fn set_metadata(&self, patch: MetadataMap) -> Result<(), StoreError> {
        self.inner.guard()?;
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            for (key, value) in patch {
                state.metadata.insert(key, value);
            }
            state.metadata.clone()
        };
        self.inner.metadata_tx.send(snapshot).ok();
        Ok(())
    }

    fn subscribe_metadata(&self) -> broadcast::Receiver<MetadataMap> {
        self.inner.metadata_tx.subscribe()
    }
}

#[async_trait]
impl Grid for MemoryScene {
    async fn resolution(&self) -> Result<f32, StoreError> {
        self.inner.guard()?;
        Ok(self.inner.dpi)
    }

    async fn snap(
        &self,
        position: Vec2,
        granularity: f32,
        center_snap: bool,
    ) -> Result<Vec2, StoreError> {
        self.inner.guard()?;
        let cell = self.inner.dpi * granularity;
        if cell <= 0.0 {
            return Ok(position);
        }
        let snap_axis = |value: f32| {
            if center_snap {
                ((value / cell - 0.5).round() + 0.5) * cell
            } else {
                (value / cell).round() * cell
            }
        };
        Ok(Vec2::new(snap_axis(position.x), snap_axis(position.y)))
    }
}

impl SceneStatus for MemoryScene {
    fn ready(&self) -> bool {
        *self.inner.ready_tx.borrow()
    }

    fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.inner.ready_tx.subscribe()
    }
}

#[async_trait]
impl Notifier for MemoryScene {
    async fn notify(&self, message: &str, level: NoticeLevel) {
        debug!("notice ({:?}): {}", level, message);
        self.inner
            .notices
            .lock()
            .unwrap()
            .push((message.to_string(), level));
    }
}

#[derive(Clone)]
pub struct MemoryItems {
    inner: Arc<SceneInner>,
    namespace: Namespace,
}

impl MemoryItems {
    fn guard(&self) -> Result<(), StoreError> {
        // The local namespace stays writable while the scene is down so
        // overlay teardown can always run.
        match self.namespace {
            Namespace::Shared => self.inner.guard(),
            Namespace::Local => Ok(()),
        }
    }

    fn with_items<R>(&self, f: impl FnOnce(&mut Vec<Item>) -> R) -> (R, Vec<Item>) {
        let mut state = self.inner.state.lock().unwrap();
        let items = match self.namespace {
            Namespace::Shared => &mut state.shared,
            Namespace::Local => &mut state.local,
        };
        let result = f(items);
        let snapshot = items.clone();
        (result, snapshot)
    }

    fn publish(&self, snapshot: Vec<Item>) {
        let tx = match self.namespace {
            Namespace::Shared => &self.inner.shared_tx,
            Namespace::Local => &self.inner.local_tx,
        };
        tx.send(snapshot).ok();
    }
}

#[async_trait]
impl ItemStore for MemoryItems {
    async fn get_items(&self) -> Result<Vec<Item>, StoreError> {
        self.guard()?;
        let (_, snapshot) = self.with_items(|_| ());
        Ok(snapshot)
    }

    async fn get_items_by_id(&self, ids: &[ItemId]) -> Result<Vec<Item>, StoreError> {
        self.guard()?;
        let (found, _) = self.with_items(|items| {
            items
                .iter()
                .filter(|item| ids.contains(&item.id))
                .cloned()
                .collect::<Vec<_>>()
        });
        Ok(found)
    }

    async fn update_items(&self, ids: &[ItemId], mutate: ItemMutator<'_>) -> Result<(), StoreError> {
        self.guard()?;
        let (touched, snapshot) = self.with_items(|items| {
            let mut touched = false;
            for item in items.iter_mut() {
                if ids.contains(&item.id) {
                    mutate(item);
                    touched = true;
                }
            }
            touched
        });
        if touched {
            self.publish(snapshot);
        }
        Ok(())
    }

    async fn add_items(&self, new_items: Vec<Item>) -> Result<(), StoreError> {
        self.guard()?;
        if new_items.is_empty() {
            return Ok(());
        }
        let (_, snapshot) = self.with_items(|items| {
            items.extend(new_items);
        });
        self.publish(snapshot);
        Ok(())
    }

    async fn delete_items(&self, ids: &[ItemId]) -> Result<(), StoreError> {
        self.guard()?;
        let (deleted, snapshot) = self.with_items(|items| {
            let before = items.len();
            items.retain(|item| !ids.contains(&item.id));
            items.len() != before
        });
        if deleted {
            self.publish(snapshot);
        }
        Ok(())
    }

    fn subscribe_items(&self) -> broadcast::Receiver<Vec<Item>> {
        match self.namespace {
            Namespace::Shared => self.inner.shared_tx.subscribe(),
            Namespace::Local => self.inner.local_tx.subscribe(),
        }
    }
}
