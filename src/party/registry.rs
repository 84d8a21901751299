use std::sync::Arc;

use anyhow::Context;

use crate::scene::{ItemId, MetadataMap, MetadataStore};

use super::state::{normalize, PartyMember, PartyState, PARTY_STATE_KEY};

/// Read/normalize/write access to the persisted roster record.
///
/// Every mutating helper is a fresh read-modify-write cycle: the remote
/// record can change between any two suspension points, so nothing here
/// caches state across an await. A mutation that would not change
/// observable state skips the write entirely. Store failures propagate
/// unretried; the caller re-reads if it wants to try again.
#[derive(Clone)]
pub struct PartyRegistry {
    metadata: Arc<dyn MetadataStore>,
}

impl PartyRegistry {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    pub async fn get(&self) -> Result<PartyState, anyhow::Error> {
        let metadata = self
            .metadata
            .get_metadata()
            .await
            .context("failed to read scene metadata")?;
        Ok(normalize(metadata.get(PARTY_STATE_KEY)))
    }

    pub async fn set(&self, state: &PartyState) -> Result<(), anyhow::Error> {
        let value = serde_json::to_value(state).context("failed to serialize party state")?;
        let mut patch = MetadataMap::new();
        patch.insert(PARTY_STATE_KEY.to_string(), value);
        self.metadata
            .set_metadata(patch)
            .await
            .context("failed to write party state")?;
        Ok(())
    }

    /// Append `member` unless its id is already rostered. Returns whether a
    /// write happened.
    pub async fn add_member(&self, member: PartyMember) -> Result<bool, anyhow::Error> {
        let mut state = self.get().await?;
        if state.contains(&member.id) {
            return Ok(false);
        }
        state.members.push(member);
        self.set(&state).await?;
        Ok(true)
    }

    /// Drop `id` from the roster, clearing the active entry if it pointed at
    /// the removed member. Returns whether a write happened.
    pub async fn remove_member(&self, id: &ItemId) -> Result<bool, anyhow::Error> {
        let mut state = self.get().await?;
        let before = state.members.len();
        state.members.retain(|member| member.id != *id);
        if state.members.len() == before {
            return Ok(false);
        }
        if state.active_id.as_ref() == Some(id) {
            state.active_id = None;
        }
        self.set(&state).await?;
        Ok(true)
    }

    /// Set the active entry. A non-member id is a no-op, as is re-selecting
    /// the current value. Returns whether a write happened.
    pub async fn set_active(&self, id: Option<ItemId>) -> Result<bool, anyhow::Error> {
        let mut state = self.get().await?;
        if let Some(id) = &id {
            if !state.contains(id) {
                return Ok(false);
            }
        }
        if state.active_id == id {
            return Ok(false);
        }
        state.active_id = id;
        self.set(&state).await?;
        Ok(true)
    }

    /// Move the active entry through the roster as a cyclic sequence. With
    /// no current active entry, `+1` selects the first member and `-1` the
    /// last. Returns whether a write happened.
    pub async fn shift_active(&self, direction: i32) -> Result<bool, anyhow::Error> {
        let mut state = self.get().await?;
        if state.members.is_empty() {
            return Ok(false);
        }
        let len = state.members.len() as i32;
        let next = match state.active_index() {
            None => {
                if direction >= 0 {
                    0
                } else {
                    len - 1
                }
            }
            Some(index) => (index as i32 + direction).rem_euclid(len),
        };
        let next_id = state.members[next as usize].id.clone();
        if state.active_id.as_ref() == Some(&next_id) {
            return Ok(false);
        }
        state.active_id = Some(next_id);
        self.set(&state).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::scene::MemoryScene;

    use super::*;

    fn registry(scene: &MemoryScene) -> PartyRegistry {
        PartyRegistry::new(Arc::new(scene.clone()))
    }

    fn ready_scene() -> MemoryScene {
        let scene = MemoryScene::new(150.0);
        scene.set_ready(true);
        scene
    }

    #[tokio::test]
    async fn missing_record_reads_as_empty_state() {
        let scene = ready_scene();
        assert_eq!(registry(&scene).get().await.unwrap(), PartyState::default());
    }

    #[tokio::test]
    async fn add_member_is_idempotent() {
        let scene = ready_scene();
        let registry = registry(&scene);
        assert!(registry
            .add_member(PartyMember::new("a", "Ada"))
            .await
            .unwrap());
        assert!(!registry
            .add_member(PartyMember::new("a", "Ada again"))
            .await
            .unwrap());
        let state = registry.get().await.unwrap();
        assert_eq!(state.members, vec![PartyMember::new("a", "Ada")]);
    }

    #[tokio::test]
    async fn duplicate_add_performs_no_write() {
        let scene = ready_scene();
        let registry = registry(&scene);
        registry
            .add_member(PartyMember::new("a", "Ada"))
            .await
            .unwrap();

        let mut feed = scene.subscribe_metadata();
        registry
            .add_member(PartyMember::new("a", "Ada"))
            .await
            .unwrap();
        assert!(feed.try_recv().is_err(), "no write should be observed");
    }

    #[tokio::test]
    async fn remove_member_clears_active_only_for_removed_id() {
        let scene = ready_scene();
        let registry = registry(&scene);
        registry
            .add_member(PartyMember::new("a", "Ada"))
            .await
            .unwrap();
        registry
            .add_member(PartyMember::new("b", "Brin"))
            .await
            .unwrap();
        registry.set_active(Some(ItemId::from("a"))).await.unwrap();

        assert!(registry.remove_member(&ItemId::from("b")).await.unwrap());
        assert_eq!(
            registry.get().await.unwrap().active_id,
            Some(ItemId::from("a"))
        );

        assert!(registry.remove_member(&ItemId::from("a")).await.unwrap());
        let state = registry.get().await.unwrap();
        assert!(state.members.is_empty());
        assert_eq!(state.active_id, None);

        // Absent id: unchanged record, no write.
        assert!(!registry.remove_member(&ItemId::from("a")).await.unwrap());
    }

    #[tokio::test]
    async fn set_active_rejects_non_members() {
        let scene = ready_scene();
        let registry = registry(&scene);
        registry
            .add_member(PartyMember::new("a", "Ada"))
            .await
            .unwrap();
        assert!(!registry
            .set_active(Some(ItemId::from("ghost")))
            .await
            .unwrap());
        assert_eq!(registry.get().await.unwrap().active_id, None);
    }

    #[tokio::test]
    async fn shift_active_walks_the_roster_cyclically() {
        let scene = ready_scene();
        let registry = registry(&scene);
        for (id, name) in [("a", "Ada"), ("b", "Brin"), ("c", "Cass")] {
            registry.add_member(PartyMember::new(id, name)).await.unwrap();
        }

        let mut observed = Vec::new();
        for direction in [1, 1, 1, 1, -1] {
            registry.shift_active(direction).await.unwrap();
            observed.push(registry.get().await.unwrap().active_id.unwrap());
        }
        // a -> b -> c -> a (forward wrap) -> c (backward wrap)
        let expected: Vec<ItemId> = ["a", "b", "c", "a", "c"]
            .into_iter()
            .map(ItemId::from)
            .collect();
        assert_eq!(observed, expected);
    }

    #[tokio::test]
    async fn shift_active_from_empty_roster_is_a_no_op() {
        let scene = ready_scene();
        let registry = registry(&scene);
        assert!(!registry.shift_active(1).await.unwrap());
        assert!(!registry.shift_active(-1).await.unwrap());
    }

    #[tokio::test]
    async fn shift_active_with_no_selection_picks_an_end() {
        let scene = ready_scene();
        let registry = registry(&scene);
        for id in ["a", "b", "c"] {
            registry.add_member(PartyMember::new(id, "")).await.unwrap();
        }

        registry.shift_active(-1).await.unwrap();
        assert_eq!(
            registry.get().await.unwrap().active_id,
            Some(ItemId::from("c"))
        );

        registry.set_active(None).await.unwrap();
        registry.shift_active(1).await.unwrap();
        assert_eq!(
            registry.get().await.unwrap().active_id,
            Some(ItemId::from("a"))
        );
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let scene = MemoryScene::new(150.0);
        // Scene never becomes ready, so metadata reads fail.
        assert!(registry(&scene).get().await.is_err());
    }
}
