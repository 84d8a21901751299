use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};

use crate::scene::{MetadataMap, SceneHandles};

use super::control::{ControlInput, DirectionalControl, KeyEvent};
use super::overlay::ActiveOverlayManager;
use super::reconciler::MembershipReconciler;
use super::registry::PartyRegistry;
use super::state::{normalize, PARTY_STATE_KEY};

/// The single logical thread of control: one loop multiplexing the host's
/// change feeds and key events, dispatching each to a reconciliation pass.
///
/// Handlers work from the latest full snapshot, never from diffs, so a
/// missed or reordered notification costs at most one redundant pass. Any
/// background failure is logged and swallowed; only explicit roster actions
/// surface outcomes to the user.
pub struct PartyTracker {
    registry: PartyRegistry,
    reconciler: MembershipReconciler,
    overlay: ActiveOverlayManager,
    control: DirectionalControl,
    scene: SceneHandles,
}

impl PartyTracker {
    pub fn new(scene: SceneHandles) -> Self {
        let registry = PartyRegistry::new(scene.metadata.clone());
        let reconciler = MembershipReconciler::new(
            registry.clone(),
            scene.items.clone(),
            scene.notifier.clone(),
        );
        let overlay = ActiveOverlayManager::new(
            scene.items.clone(),
            scene.local_items.clone(),
            scene.grid.clone(),
        );
        let control =
            DirectionalControl::new(registry.clone(), scene.items.clone(), scene.grid.clone());
        Self {
            registry,
            reconciler,
            overlay,
            control,
            scene,
        }
    }

    /// Run until every input stream has closed.
    pub async fn run(mut self, mut keys: mpsc::UnboundedReceiver<KeyEvent>) {
        let mut metadata_rx = self.scene.metadata.subscribe_metadata();
        let mut items_rx = self.scene.items.subscribe_items();
        let mut ready_rx = self.scene.status.subscribe_ready();

        if *ready_rx.borrow() {
            self.refresh("startup").await;
        }

        loop {
            tokio::select! {
                changed = ready_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let ready = *ready_rx.borrow();
                    if ready {
                        self.refresh("scene ready").await;
                    } else {
                        info!("scene unready, tearing down overlay");
                        self.overlay.teardown().await;
                    }
                }
                result = metadata_rx.recv() => match result {
                    Ok(metadata) => self.on_metadata(metadata).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("metadata feed lagged by {}, refreshing", skipped);
                        self.refresh("metadata feed lagged").await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                result = items_rx.recv() => match result {
                    Ok(_) => self.on_items_changed().await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("item feed lagged by {}, refreshing", skipped);
                        self.refresh("item feed lagged").await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                key = keys.recv() => match key {
                    Some(event) => self.on_key(event).await,
                    None => break,
                },
            }
        }

        self.overlay.teardown().await;
    }

    /// Roster record changed, locally or by another peer.
    async fn on_metadata(&mut self, metadata: MetadataMap) {
        if !self.scene.status.ready() {
            return;
        }
        let state = normalize(metadata.get(PARTY_STATE_KEY));
        if let Err(error) = self.reconciler.sync_flags(&state).await {
            warn!("membership flag sync failed: {:#}", error);
        }
        if let Err(error) = self.overlay.reconcile(&state, true).await {
            warn!("overlay reconcile failed: {:#}", error);
        }
    }

    /// Shared item collection changed: tokens may have been deleted out
    /// from under the roster, and the active token may be gone.
    async fn on_items_changed(&mut self) {
        if !self.scene.status.ready() {
            return;
        }
        match self.reconciler.cleanup_for_missing_entities().await {
            // A prune rewrites the record; the resulting metadata event
            // drives the overlay. Otherwise re-check the ring here.
            Ok(true) => {}
            Ok(false) => self.reconcile_overlay().await,
            Err(error) => warn!("roster cleanup failed: {:#}", error),
        }
    }

    async fn on_key(&mut self, event: KeyEvent) {
        let Some(input) = ControlInput::from_event(&event) else {
            return;
        };
        // Resulting state changes flow back through the change feeds.
        if let Err(error) = self.control.apply(input).await {
            warn!("control input {:?} failed: {:#}", input, error);
        }
    }

    /// Full pass from a fresh snapshot: prune, mirror flags, rebuild ring.
    async fn refresh(&mut self, reason: &str) {
        debug!("refreshing party state ({})", reason);
        match self.reconciler.cleanup_for_missing_entities().await {
            Ok(_) => {}
            Err(error) => {
                warn!("roster cleanup failed: {:#}", error);
                return;
            }
        }
        let state = match self.registry.get().await {
            Ok(state) => state,
            Err(error) => {
                warn!("failed to read party state: {:#}", error);
                return;
            }
        };
        if let Err(error) = self.reconciler.sync_flags(&state).await {
            warn!("membership flag sync failed: {:#}", error);
        }
        if let Err(error) = self.overlay.reconcile(&state, true).await {
            warn!("overlay reconcile failed: {:#}", error);
        }
    }

    async fn reconcile_overlay(&mut self) {
        match self.registry.get().await {
            Ok(state) => {
                if let Err(error) = self.overlay.reconcile(&state, true).await {
                    warn!("overlay reconcile failed: {:#}", error);
                }
            }
            Err(error) => warn!("failed to read party state: {:#}", error),
        }
    }
}
