use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use log::{debug, info};
use serde_json::Value;

use crate::scene::{Item, ItemId, ItemStore, NoticeLevel, Notifier};

use super::registry::PartyRegistry;
use super::state::{PartyMember, PartyState, MEMBER_FLAG_KEY};

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "Unnamed"
    } else {
        name
    }
}

/// Keeps the per-item membership flags aligned with the roster and prunes
/// roster entries whose backing token was deleted out-of-band.
///
/// The flags are derived state: every mutation persists the roster first and
/// applies the flag afterwards, so an interruption between the two leaves
/// only the flag stale, which the next `sync_flags` pass repairs.
pub struct MembershipReconciler {
    registry: PartyRegistry,
    items: Arc<dyn ItemStore>,
    notifier: Arc<dyn Notifier>,
}

impl MembershipReconciler {
    pub fn new(
        registry: PartyRegistry,
        items: Arc<dyn ItemStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            items,
            notifier,
        }
    }

    /// Ensure every rostered item carries the membership flag. Flags left
    /// behind on non-members are not swept here; clearing is a side effect
    /// of explicit removal.
    pub async fn sync_flags(&self, state: &PartyState) -> Result<(), anyhow::Error> {
        let ids: Vec<ItemId> = state.members.iter().map(|member| member.id.clone()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.items
            .update_items(&ids, &|item| {
                item.metadata
                    .insert(MEMBER_FLAG_KEY.to_string(), Value::Bool(true));
            })
            .await
            .context("failed to mirror membership flags")?;
        debug!("membership flags synced for {} member(s)", ids.len());
        Ok(())
    }

    pub async fn add_to_party(&self, member: PartyMember) -> Result<(), anyhow::Error> {
        let label = display_name(&member.name).to_string();
        if !self.registry.add_member(member.clone()).await? {
            self.notifier
                .notify(
                    &format!("\"{}\" is already in the party.", label),
                    NoticeLevel::Info,
                )
                .await;
            return Ok(());
        }

        self.set_flag(&member.id, true).await;
        self.notifier
            .notify(
                &format!("Added \"{}\" to the party.", label),
                NoticeLevel::Success,
            )
            .await;
        Ok(())
    }

    pub async fn remove_from_party(&self, id: &ItemId) -> Result<(), anyhow::Error> {
        let state = self.registry.get().await?;
        let label = state
            .members
            .iter()
            .find(|member| member.id == *id)
            .map(|member| display_name(&member.name).to_string());

        let removed = self.registry.remove_member(id).await?;

        // Clear the flag regardless: a token deleted or never flagged
        // tolerates the no-op update.
        self.set_flag(id, false).await;

        if removed {
            let label = label.unwrap_or_else(|| "Unnamed".to_string());
            self.notifier
                .notify(
                    &format!("Removed \"{}\" from the party.", label),
                    NoticeLevel::Success,
                )
                .await;
        }
        Ok(())
    }

    /// Drop roster entries whose token no longer exists in the shared
    /// namespace. Returns whether the record was rewritten.
    pub async fn cleanup_for_missing_entities(&self) -> Result<bool, anyhow::Error> {
        let state = self.registry.get().await?;
        if state.members.is_empty() {
            return Ok(false);
        }

        let live: HashSet<ItemId> = self
            .items
            .get_items()
            .await
            .context("failed to list scene items")?
            .into_iter()
            .map(|item: Item| item.id)
            .collect();

        let mut next = state.clone();
        next.members.retain(|member| live.contains(&member.id));
        if next.members.len() == state.members.len() {
            return Ok(false);
        }
        if let Some(active_id) = &next.active_id {
            if !next.contains(active_id) {
                next.active_id = None;
            }
        }

        info!(
            "pruning {} party member(s) whose token no longer exists",
            state.members.len() - next.members.len()
        );
        self.registry.set(&next).await?;
        Ok(true)
    }

    async fn set_flag(&self, id: &ItemId, on: bool) {
        let ids = [id.clone()];
        let result = self
            .items
            .update_items(&ids, &|item| {
                if on {
                    item.metadata
                        .insert(MEMBER_FLAG_KEY.to_string(), Value::Bool(true));
                } else {
                    item.metadata.remove(MEMBER_FLAG_KEY);
                }
            })
            .await;
        if let Err(error) = result {
            debug!("membership flag update for {} skipped: {}", id, error);
        }
    }
}
