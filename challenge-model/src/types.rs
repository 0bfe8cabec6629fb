use crate::requirements::RequirementModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Shared data types that describe a challenge, its groups, and the penalty source. These stay
// plain data; mutation rules live in the sync crate's store.

/// Server-assigned group id. Provisional groups created optimistically use negative ids until
/// the server answers with the real one.
pub type GroupId = i64;

/// Completion state keyed by encoded progress keys.
pub type ProgressMap = BTreeMap<String, bool>;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Topology {
    pub is_multigroup: bool,
    pub max_groups: u32,
    pub num_players_per_group: u32,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            is_multigroup: false,
            max_groups: 1,
            num_players_per_group: 1,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct AuthFlags {
    pub is_logged_in: bool,
    pub is_creator: bool,
    pub is_authorized: bool,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Challenge {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub topology: Topology,
    pub requirements: RequirementModel,
    #[serde(default)]
    pub auth: AuthFlags,
    /// Account name of the user running this session, if logged in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user: Option<String>,
    #[serde(default)]
    pub penalties: Vec<PenaltyEntry>,
}

impl Challenge {
    pub fn is_shared(&self) -> bool {
        !self.is_local
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct PlayerSlot {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
}

impl PlayerSlot {
    pub fn named(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            account_name: None,
        }
    }

    pub fn is_named(&self) -> bool {
        !self.display_name.trim().is_empty()
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct PenaltyMeta {
    pub duration_seconds: u64,
    pub applied_at: DateTime<Utc>,
}

impl PenaltyMeta {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.applied_at + chrono::Duration::seconds(self.duration_seconds as i64)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub member_count: u32,
    /// Account names of the current members, when the server discloses them.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub player_slots: Vec<PlayerSlot>,
    #[serde(default)]
    pub progress: ProgressMap,
    #[serde(default)]
    pub active_penalty_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_meta: Option<PenaltyMeta>,
}

impl Group {
    pub fn new(id: GroupId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            member_count: 0,
            members: Vec::new(),
            player_slots: Vec::new(),
            progress: ProgressMap::new(),
            active_penalty_text: String::new(),
            penalty_meta: None,
        }
    }

    pub fn has_penalty(&self) -> bool {
        !self.active_penalty_text.is_empty()
    }

    pub fn has_named_slots(&self) -> bool {
        self.player_slots.iter().any(PlayerSlot::is_named)
    }

    pub fn is_full(&self, capacity: u32) -> bool {
        self.member_count >= capacity
    }

    /// Remaining seconds of a timed penalty. `None` when the penalty is untimed or absent.
    pub fn penalty_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        if !self.has_penalty() {
            return None;
        }
        let meta = self.penalty_meta.as_ref()?;
        let remaining = (meta.expires_at() - now).num_seconds();
        Some(remaining.max(0) as u64)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PenaltyEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub probability: f64,
}

impl PenaltyEntry {
    pub fn new(name: &str, description: &str, probability: f64) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            probability,
        }
    }

    pub fn is_drawable(&self) -> bool {
        self.probability > 0.0 && self.probability.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn penalty_remaining_counts_down_and_floors_at_zero() {
        let applied_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut group = Group::new(1, "Team");
        group.active_penalty_text = "Alex receives penalty: Push-ups".into();
        group.penalty_meta = Some(PenaltyMeta {
            duration_seconds: 120,
            applied_at,
        });
        let later = applied_at + chrono::Duration::seconds(30);
        assert_eq!(group.penalty_remaining(later), Some(90));
        let expired = applied_at + chrono::Duration::seconds(500);
        assert_eq!(group.penalty_remaining(expired), Some(0));
    }

    #[test]
    fn untimed_or_cleared_penalty_has_no_remaining_time() {
        let mut group = Group::new(1, "Team");
        assert_eq!(group.penalty_remaining(Utc::now()), None);
        group.active_penalty_text = "Something".into();
        assert_eq!(group.penalty_remaining(Utc::now()), None);
    }

    #[test]
    fn zero_or_nan_probability_is_not_drawable() {
        assert!(!PenaltyEntry::new("a", "", 0.0).is_drawable());
        assert!(!PenaltyEntry::new("b", "", f64::NAN).is_drawable());
        assert!(PenaltyEntry::new("c", "", 0.2).is_drawable());
    }
}
