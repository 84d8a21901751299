use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::scene::{Grid, Item, ItemId, ItemKind, ItemStore, RingStyle};

use super::geometry;
use super::state::{PartyState, RING_MARKER_KEY};

/// How many times to poll for a not-yet-propagated token before giving up
/// on the ring, and the pause between polls.
const RESOLVE_ATTEMPTS: u32 = 8;
const RESOLVE_RETRY_DELAY: Duration = Duration::from_millis(150);

const PULSE_TICK: Duration = Duration::from_millis(100);
const PULSE_PERIOD_MS: f32 = 1600.0;

const RING_COLOR: &str = "#ffe08a";
pub(crate) const STROKE_WIDTH_MIN: f32 = 4.0;
pub(crate) const STROKE_WIDTH_MAX: f32 = 10.0;
pub(crate) const STROKE_OPACITY_MIN: f32 = 0.35;
pub(crate) const STROKE_OPACITY_MAX: f32 = 0.9;

static RING_SEQ: AtomicU64 = AtomicU64::new(0);

fn is_ring(item: &Item) -> bool {
    item.metadata_flag(RING_MARKER_KEY)
}

/// Owns the single active-ring item and its pulse task.
///
/// Two states: no ring (no active entry, token unresolved, or scene down)
/// and ring-with-pulse. The ring is found again by marker on every pass
/// instead of holding an item handle, so duplicates from concurrent
/// triggers or an externally recreated ring both converge to one.
pub struct ActiveOverlayManager {
    items: Arc<dyn ItemStore>,
    local_items: Arc<dyn ItemStore>,
    grid: Arc<dyn Grid>,
    pulse: Option<JoinHandle<()>>,
    current: Option<ItemId>,
}

impl ActiveOverlayManager {
    pub fn new(
        items: Arc<dyn ItemStore>,
        local_items: Arc<dyn ItemStore>,
        grid: Arc<dyn Grid>,
    ) -> Self {
        Self {
            items,
            local_items,
            grid,
            pulse: None,
            current: None,
        }
    }

    pub fn pulse_running(&self) -> bool {
        self.pulse
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Drive the overlay toward the latest roster snapshot.
    pub async fn reconcile(
        &mut self,
        state: &PartyState,
        scene_ready: bool,
    ) -> Result<(), anyhow::Error> {
        let active_id = match &state.active_id {
            Some(id) if scene_ready => id.clone(),
            _ => {
                self.teardown().await;
                return Ok(());
            }
        };

        if self.current.as_ref() == Some(&active_id)
            && self.pulse_running()
            && self.ring_exists().await
        {
            return Ok(());
        }

        let Some(token) = self.resolve_token(&active_id).await? else {
            // Expected propagation lag, not a fault: no ring until the next
            // change notification gives us another chance.
            debug!("token {} did not resolve, leaving overlay empty", active_id);
            self.teardown().await;
            return Ok(());
        };

        // Replace semantics: the previous ring and its pulse go away before
        // the new ring appears, so there is never more than one of either.
        self.teardown().await;

        let scene_dpi = self
            .grid
            .resolution()
            .await
            .context("failed to read grid resolution")?;
        let scale = geometry::dpi_scale(scene_dpi, token.grid_dpi);
        let diameter = geometry::ring_diameter(token.size, scale);
        let center = geometry::ring_center(token.position, token.grid_offset, token.size, scale);

        let ring_id = format!("active-ring-{}", RING_SEQ.fetch_add(1, Ordering::Relaxed));
        let ring = Item::ring(
            ring_id.as_str(),
            center,
            diameter,
            RingStyle {
                stroke_color: RING_COLOR.to_string(),
                stroke_width: STROKE_WIDTH_MAX,
                stroke_opacity: STROKE_OPACITY_MAX,
            },
            token.id.clone(),
        )
        .with_metadata(RING_MARKER_KEY, Value::Bool(true));

        self.local_items
            .add_items(vec![ring])
            .await
            .context("failed to create active ring")?;
        self.pulse = Some(spawn_pulse(self.local_items.clone()));
        self.current = Some(active_id);
        info!("active ring attached to {}", token.id);
        Ok(())
    }

    /// Stop the pulse and delete every marker-tagged overlay item. Safe to
    /// call from any state; the pulse never outlives the ring because both
    /// go in this one step.
    pub async fn teardown(&mut self) {
        if let Some(handle) = self.pulse.take() {
            handle.abort();
        }
        self.current = None;

        match self.local_items.get_items().await {
            Ok(items) => {
                let rings: Vec<ItemId> = items
                    .into_iter()
                    .filter(is_ring)
                    .map(|item| item.id)
                    .collect();
                if rings.is_empty() {
                    return;
                }
                if let Err(error) = self.local_items.delete_items(&rings).await {
                    warn!("failed to delete active ring: {}", error);
                }
            }
            Err(error) => warn!("failed to list overlay items: {}", error),
        }
    }

    async fn ring_exists(&self) -> bool {
        match self.local_items.get_items().await {
            Ok(items) => items.iter().any(|item| is_ring(item)),
            Err(_) => false,
        }
    }

    async fn resolve_token(&self, id: &ItemId) -> Result<Option<Item>, anyhow::Error> {
        let ids = [id.clone()];
        for attempt in 0..RESOLVE_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(RESOLVE_RETRY_DELAY).await;
            }
            let mut found = self
                .items
                .get_items_by_id(&ids)
                .await
                .context("failed to look up active token")?;
            if let Some(item) = found.pop() {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

/// Breathing restyle of whatever currently carries the ring marker. The
/// task re-queries by marker each tick, so it keeps working if the ring was
/// recreated underneath it; tick failures are swallowed.
fn spawn_pulse(local_items: Arc<dyn ItemStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        let mut tick = tokio::time::interval(PULSE_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;

            let elapsed_ms = started.elapsed().as_millis() as f32;
            let phase = (elapsed_ms % PULSE_PERIOD_MS) / PULSE_PERIOD_MS * TAU;
            let wave = 0.5 * (1.0 + phase.sin());
            let opacity = STROKE_OPACITY_MIN + (STROKE_OPACITY_MAX - STROKE_OPACITY_MIN) * wave;
            let width = STROKE_WIDTH_MIN + (STROKE_WIDTH_MAX - STROKE_WIDTH_MIN) * wave;

            let Ok(items) = local_items.get_items().await else {
                continue;
            };
            let rings: Vec<ItemId> = items
                .into_iter()
                .filter(is_ring)
                .map(|item| item.id)
                .collect();
            if rings.is_empty() {
                continue;
            }
            local_items
                .update_items(&rings, &|item| {
                    if let ItemKind::Ring(style) = &mut item.kind {
                        style.stroke_opacity = opacity;
                        style.stroke_width = width;
                    }
                })
                .await
                .ok();
        }
    })
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use crate::scene::MemoryScene;

    use super::super::state::PartyMember;
    use super::*;

    const DPI: f32 = 150.0;

    fn manager(scene: &MemoryScene) -> ActiveOverlayManager {
        ActiveOverlayManager::new(
            Arc::new(scene.items()),
            Arc::new(scene.local_items()),
            Arc::new(scene.clone()),
        )
    }

    fn state_with_active(ids: &[&str], active: Option<&str>) -> PartyState {
        PartyState {
            members: ids
                .iter()
                .map(|id| PartyMember::new(*id, *id))
                .collect(),
            active_id: active.map(ItemId::from),
        }
    }

    async fn seed_token(scene: &MemoryScene, id: &str) {
        let token = Item::token(id, id, Vec2::new(125.0, 125.0), Vec2::splat(DPI), DPI);
        scene.items().add_items(vec![token]).await.unwrap();
    }

    async fn rings(scene: &MemoryScene) -> Vec<Item> {
        scene
            .local_items()
            .get_items()
            .await
            .unwrap()
            .into_iter()
            .filter(is_ring)
            .collect()
    }

    #[tokio::test]
    async fn ring_follows_the_active_entry() {
        let scene = MemoryScene::new(DPI);
        scene.set_ready(true);
        seed_token(&scene, "a").await;
        seed_token(&scene, "b").await;
        let mut overlay = manager(&scene);

        overlay
            .reconcile(&state_with_active(&["a", "b"], Some("a")), true)
            .await
            .unwrap();
        let current = rings(&scene).await;
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].attached_to, Some(ItemId::from("a")));
        assert!(current[0].disable_hit);
        assert!(overlay.pulse_running());

        // Replace: a different active entry swaps the ring, never stacks it.
        overlay
            .reconcile(&state_with_active(&["a", "b"], Some("b")), true)
            .await
            .unwrap();
        let current = rings(&scene).await;
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].attached_to, Some(ItemId::from("b")));
        assert!(overlay.pulse_running());

        overlay
            .reconcile(&state_with_active(&["a", "b"], None), true)
            .await
            .unwrap();
        assert!(rings(&scene).await.is_empty());
        assert!(!overlay.pulse_running());
    }

    #[tokio::test]
    async fn repeated_reconcile_keeps_a_single_ring() {
        let scene = MemoryScene::new(DPI);
        scene.set_ready(true);
        seed_token(&scene, "a").await;
        let mut overlay = manager(&scene);

        let state = state_with_active(&["a"], Some("a"));
        for _ in 0..3 {
            overlay.reconcile(&state, true).await.unwrap();
        }
        assert_eq!(rings(&scene).await.len(), 1);
        assert!(overlay.pulse_running());
    }

    #[tokio::test]
    async fn scene_unready_tears_everything_down() {
        let scene = MemoryScene::new(DPI);
        scene.set_ready(true);
        seed_token(&scene, "a").await;
        let mut overlay = manager(&scene);

        let state = state_with_active(&["a"], Some("a"));
        overlay.reconcile(&state, true).await.unwrap();
        assert_eq!(rings(&scene).await.len(), 1);

        overlay.reconcile(&state, false).await.unwrap();
        assert!(rings(&scene).await.is_empty());
        assert!(!overlay.pulse_running());

        // Ready again: the same snapshot rebuilds the ring.
        overlay.reconcile(&state, true).await.unwrap();
        assert_eq!(rings(&scene).await.len(), 1);
        assert!(overlay.pulse_running());
    }

    #[tokio::test]
    async fn externally_deleted_ring_is_rebuilt() {
        let scene = MemoryScene::new(DPI);
        scene.set_ready(true);
        seed_token(&scene, "a").await;
        let mut overlay = manager(&scene);

        let state = state_with_active(&["a"], Some("a"));
        overlay.reconcile(&state, true).await.unwrap();
        let ring_id = rings(&scene).await[0].id.clone();
        scene.local_items().delete_items(&[ring_id]).await.unwrap();

        overlay.reconcile(&state, true).await.unwrap();
        assert_eq!(rings(&scene).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_token_abandons_the_ring_after_the_retry_cap() {
        let scene = MemoryScene::new(DPI);
        scene.set_ready(true);
        let mut overlay = manager(&scene);

        overlay
            .reconcile(&state_with_active(&["ghost"], Some("ghost")), true)
            .await
            .unwrap();
        assert!(rings(&scene).await.is_empty());
        assert!(!overlay.pulse_running());
    }

    #[tokio::test(start_paused = true)]
    async fn late_token_resolves_within_the_retry_window() {
        let scene = MemoryScene::new(DPI);
        scene.set_ready(true);
        let mut overlay = manager(&scene);

        let writer = scene.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            let token = Item::token("late", "Late", Vec2::ZERO, Vec2::splat(DPI), DPI);
            writer.items().add_items(vec![token]).await.unwrap();
        });

        overlay
            .reconcile(&state_with_active(&["late"], Some("late")), true)
            .await
            .unwrap();
        let current = rings(&scene).await;
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].attached_to, Some(ItemId::from("late")));
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_restyles_the_ring_over_time() {
        let scene = MemoryScene::new(DPI);
        scene.set_ready(true);
        seed_token(&scene, "a").await;
        let mut overlay = manager(&scene);

        overlay
            .reconcile(&state_with_active(&["a"], Some("a")), true)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        let ring = rings(&scene).await.pop().unwrap();
        let ItemKind::Ring(style) = ring.kind else {
            panic!("overlay item is not a ring");
        };
        assert!(style.stroke_opacity >= STROKE_OPACITY_MIN);
        assert!(style.stroke_opacity <= STROKE_OPACITY_MAX);
        assert!(
            (style.stroke_opacity - STROKE_OPACITY_MAX).abs() > 1e-3,
            "pulse should have moved the style off its creation value"
        );

        overlay.teardown().await;
        assert!(!overlay.pulse_running());
    }

    #[tokio::test]
    async fn ring_geometry_rescales_foreign_tokens() {
        let scene = MemoryScene::new(DPI);
        scene.set_ready(true);
        // Token art authored at 300 dpi, twice the scene resolution.
        let token = Item::token(
            "a",
            "Ada",
            Vec2::new(125.0, 125.0),
            Vec2::splat(300.0),
            300.0,
        );
        scene.items().add_items(vec![token]).await.unwrap();
        let mut overlay = manager(&scene);

        overlay
            .reconcile(&state_with_active(&["a"], Some("a")), true)
            .await
            .unwrap();
        let ring = rings(&scene).await.pop().unwrap();
        assert_eq!(ring.size.x, 150.0 + geometry::RING_PADDING);
        // Centered anchor: ring center coincides with the token position.
        assert_eq!(ring.position, Vec2::new(125.0, 125.0));

        // Top-left anchor: the center shifts by half the rendered size.
        let corner_token = Item::token(
            "b",
            "Brin",
            Vec2::new(125.0, 125.0),
            Vec2::splat(300.0),
            300.0,
        )
        .with_grid_offset(Vec2::ZERO);
        scene.items().add_items(vec![corner_token]).await.unwrap();
        overlay
            .reconcile(&state_with_active(&["a", "b"], Some("b")), true)
            .await
            .unwrap();
        let ring = rings(&scene).await.pop().unwrap();
        assert_eq!(ring.position, Vec2::new(200.0, 200.0));
    }
}
