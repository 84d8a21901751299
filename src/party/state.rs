use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scene::ItemId;

/// Scene metadata key holding the persisted roster record.
pub const PARTY_STATE_KEY: &str = "com.example.party-tracker/party";

/// Item metadata key mirroring roster membership, used for menu filtering.
pub const MEMBER_FLAG_KEY: &str = "com.example.party-tracker/member";

/// Item metadata key marking the active-ring overlay item.
pub const RING_MARKER_KEY: &str = "com.example.party-tracker/active-ring";

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PartyMember {
    pub id: ItemId,
    #[serde(default)]
    pub name: String,
}

impl PartyMember {
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The sole persisted record: an ordered roster with at most one active
/// entry. Everything else the tracker maintains is derived from it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PartyState {
    #[serde(default)]
    pub members: Vec<PartyMember>,
    #[serde(default)]
    pub active_id: Option<ItemId>,
}

impl PartyState {
    pub fn contains(&self, id: &ItemId) -> bool {
        self.members.iter().any(|member| member.id == *id)
    }

    pub fn member_index(&self, id: &ItemId) -> Option<usize> {
        self.members.iter().position(|member| member.id == *id)
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_id.as_ref().and_then(|id| self.member_index(id))
    }
}

/// Defensive decode of the raw persisted value. Total and idempotent:
/// any input yields a valid state, and member entries without a string id
/// are dropped, duplicate ids keep their first occurrence, a missing name
/// reads as empty, and `active_id` reads as `None` unless it names a
/// surviving member.
pub fn normalize(raw: Option<&Value>) -> PartyState {
    let Some(Value::Object(record)) = raw else {
        return PartyState::default();
    };
    let Some(Value::Array(raw_members)) = record.get("members") else {
        return PartyState::default();
    };

    let mut members: Vec<PartyMember> = Vec::with_capacity(raw_members.len());
    for entry in raw_members {
        let Some(Value::String(id)) = entry.get("id") else {
            continue;
        };
        if members.iter().any(|member| member.id.as_str() == id) {
            continue;
        }
        let name = match entry.get("name") {
            Some(Value::String(name)) => name.clone(),
            _ => String::new(),
        };
        members.push(PartyMember::new(id.as_str(), name));
    }

    let active_id = match record.get("active_id") {
        Some(Value::String(id)) if members.iter().any(|member| member.id.as_str() == id) => {
            Some(ItemId::new(id.as_str()))
        }
        _ => None,
    };

    PartyState { members, active_id }
}
