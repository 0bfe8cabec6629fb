use crate::error::{Result, SyncError};
use crate::store::StateStore;
use challenge_model::GroupId;
use serde::{Deserialize, Serialize};

// The membership state machine. Guards here are UX only: the server still arbitrates races, and
// a rejected call unwinds through the action layer.

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(tag = "state", content = "group_id", rename_all = "snake_case")]
pub enum MembershipState {
    #[default]
    Unjoined,
    JoinedGroup(GroupId),
}

impl MembershipState {
    pub fn from_group(group_id: Option<GroupId>) -> Self {
        match group_id {
            Some(id) => MembershipState::JoinedGroup(id),
            None => MembershipState::Unjoined,
        }
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            MembershipState::Unjoined => None,
            MembershipState::JoinedGroup(id) => Some(*id),
        }
    }

    pub fn is_member_of(&self, group_id: GroupId) -> bool {
        self.group_id() == Some(group_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipTransition {
    Join {
        group_id: GroupId,
        member_count: u32,
        capacity: u32,
    },
    Leave,
}

pub fn transition(
    state: MembershipState,
    requested: MembershipTransition,
) -> Result<MembershipState> {
    match (state, requested) {
        (
            MembershipState::Unjoined,
            MembershipTransition::Join {
                group_id,
                member_count,
                capacity,
            },
        ) => {
            if member_count >= capacity {
                return Err(SyncError::validation(format!(
                    "group {} is full ({}/{})",
                    group_id, member_count, capacity
                )));
            }
            Ok(MembershipState::JoinedGroup(group_id))
        }
        (MembershipState::JoinedGroup(current), MembershipTransition::Join { group_id, .. }) => {
            if current == group_id {
                Err(SyncError::validation("already a member of this group"))
            } else {
                Err(SyncError::validation(format!(
                    "already a member of group {}; leave it first",
                    current
                )))
            }
        }
        (MembershipState::JoinedGroup(_), MembershipTransition::Leave) => {
            Ok(MembershipState::Unjoined)
        }
        (MembershipState::Unjoined, MembershipTransition::Leave) => {
            Err(SyncError::validation("not a member of any group"))
        }
    }
}

/// Authorization half of a join: who may join at all, before capacity is considered.
pub fn check_can_join(store: &StateStore) -> Result<()> {
    let challenge = store.challenge();
    if challenge.is_local {
        return Err(SyncError::validation(
            "local challenges have a single fixed group",
        ));
    }
    if !challenge.auth.is_logged_in {
        return Err(SyncError::authorization("log in to join a group"));
    }
    if !challenge.auth.is_authorized {
        return Err(SyncError::authorization(
            "you are not authorized to participate in this challenge",
        ));
    }
    Ok(())
}

/// The group a single-group challenge should join on load, if any.
pub fn auto_join_target(store: &StateStore) -> Option<GroupId> {
    let challenge = store.challenge();
    if challenge.topology.is_multigroup || check_can_join(store).is_err() {
        return None;
    }
    if store.membership() != MembershipState::Unjoined {
        return None;
    }
    match store.groups() {
        [only] if !only.is_full(store.capacity()) => Some(only.id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(group_id: GroupId, member_count: u32, capacity: u32) -> MembershipTransition {
        MembershipTransition::Join {
            group_id,
            member_count,
            capacity,
        }
    }

    #[test]
    fn join_from_unjoined_with_capacity() {
        assert_eq!(
            transition(MembershipState::Unjoined, join(4, 1, 2)),
            Ok(MembershipState::JoinedGroup(4))
        );
    }

    #[test]
    fn join_full_group_is_validation_error() {
        assert!(matches!(
            transition(MembershipState::Unjoined, join(4, 1, 1)),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn join_while_joined_is_rejected() {
        assert!(matches!(
            transition(MembershipState::JoinedGroup(1), join(2, 0, 4)),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            transition(MembershipState::JoinedGroup(2), join(2, 0, 4)),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn leave_requires_membership() {
        assert_eq!(
            transition(MembershipState::JoinedGroup(3), MembershipTransition::Leave),
            Ok(MembershipState::Unjoined)
        );
        assert!(transition(MembershipState::Unjoined, MembershipTransition::Leave).is_err());
    }

    #[test]
    fn membership_serializes_as_tagged_state() {
        let value = serde_json::to_value(MembershipState::JoinedGroup(9)).unwrap();
        assert_eq!(value, serde_json::json!({"state": "joined_group", "group_id": 9}));
    }
}
