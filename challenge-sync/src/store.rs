use crate::membership::MembershipState;
use crate::penalty::PenaltyPhase;
use challenge_model::crypto::digest_json;
use challenge_model::{
    compute_progress, Challenge, ChallengeSnapshot, Group, GroupId, PenaltyMeta, PlayerSlot,
    ProgressMap, ProgressSummary, Timer,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

// The single mutable record for one challenge. Mutators are narrow and synchronous; callers
// decide when to notify listeners. Touching a group the store has never seen is a logged no-op,
// since it means a creation event was missed rather than anything fatal.

#[derive(Clone, Debug, PartialEq)]
pub struct StateStore {
    challenge: Challenge,
    groups: Vec<Group>,
    membership: MembershipState,
    authorized_users: Vec<String>,
    timer: Timer,
    next_provisional_id: GroupId,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct GroupView {
    #[serde(flatten)]
    pub group: Group,
    pub is_current_user_member: bool,
    pub summary: ProgressSummary,
}

/// Read-only copy of the store handed to presentation code.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct StoreSnapshot {
    pub challenge: Challenge,
    pub groups: Vec<GroupView>,
    pub membership: MembershipState,
    pub authorized_users: Vec<String>,
    pub timer: Timer,
    pub penalty: PenaltyPhase,
}

impl StoreSnapshot {
    pub fn group(&self, id: GroupId) -> Option<&GroupView> {
        self.groups.iter().find(|g| g.group.id == id)
    }

    pub fn digest(&self) -> String {
        digest_json(self)
    }
}

impl StateStore {
    pub fn from_snapshot(snapshot: ChallengeSnapshot) -> Self {
        let membership = resolve_membership(
            &snapshot.groups,
            snapshot.current_group,
            snapshot.challenge.current_user.as_deref(),
        );
        Self {
            challenge: snapshot.challenge,
            groups: snapshot.groups,
            membership,
            authorized_users: snapshot.authorized_users,
            timer: snapshot.timer,
            next_provisional_id: -1,
        }
    }

    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn has_group(&self, id: GroupId) -> bool {
        self.group(id).is_some()
    }

    pub fn membership(&self) -> MembershipState {
        self.membership
    }

    pub fn current_group(&self) -> Option<&Group> {
        self.membership.group_id().and_then(|id| self.group(id))
    }

    pub fn progress(&self, group_id: GroupId) -> Option<&ProgressMap> {
        self.group(group_id).map(|g| &g.progress)
    }

    pub fn authorized_users(&self) -> &[String] {
        &self.authorized_users
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn capacity(&self) -> u32 {
        self.challenge.topology.num_players_per_group
    }

    pub fn is_creator(&self) -> bool {
        self.challenge.auth.is_creator
    }

    pub fn is_authorized(&self) -> bool {
        self.challenge.auth.is_authorized
    }

    pub fn is_logged_in(&self) -> bool {
        self.challenge.auth.is_logged_in
    }

    pub fn snapshot(&self, penalty: PenaltyPhase) -> StoreSnapshot {
        StoreSnapshot {
            challenge: self.challenge.clone(),
            groups: self
                .groups
                .iter()
                .map(|g| GroupView {
                    group: g.clone(),
                    is_current_user_member: self.membership.is_member_of(g.id),
                    summary: compute_progress(&self.challenge.requirements, &g.progress),
                })
                .collect(),
            membership: self.membership,
            authorized_users: self.authorized_users.clone(),
            timer: self.timer.clone(),
            penalty,
        }
    }

    pub(crate) fn set_membership(&mut self, group_id: Option<GroupId>) -> bool {
        if let Some(id) = group_id {
            if !self.has_group(id) {
                warn!(group_id = id, "membership points at unknown group; ignored");
                return false;
            }
        }
        self.membership = MembershipState::from_group(group_id);
        true
    }

    pub(crate) fn upsert_group(&mut self, group: Group) {
        match self.groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group,
            None => self.groups.push(group),
        }
    }

    /// Removes a group and returns it with its position so a rollback can restore the order.
    /// Clears membership when the user belonged to it.
    pub(crate) fn remove_group(&mut self, id: GroupId) -> Option<(usize, Group)> {
        let Some(index) = self.groups.iter().position(|g| g.id == id) else {
            warn!(group_id = id, "remove for unknown group ignored");
            return None;
        };
        if self.membership.is_member_of(id) {
            self.membership = MembershipState::Unjoined;
        }
        Some((index, self.groups.remove(index)))
    }

    pub(crate) fn restore_group(&mut self, index: usize, group: Group) {
        if self.has_group(group.id) {
            self.upsert_group(group);
            return;
        }
        let index = index.min(self.groups.len());
        self.groups.insert(index, group);
    }

    pub(crate) fn set_group_progress_key(&mut self, group_id: GroupId, key: &str, done: bool) -> bool {
        self.with_group(group_id, "set_group_progress_key", |g| {
            g.progress.insert(key.to_string(), done);
        })
    }

    pub(crate) fn clear_group_progress_key(&mut self, group_id: GroupId, key: &str) -> bool {
        self.with_group(group_id, "clear_group_progress_key", |g| {
            g.progress.remove(key);
        })
    }

    pub(crate) fn set_group_penalty(
        &mut self,
        group_id: GroupId,
        text: &str,
        meta: Option<PenaltyMeta>,
    ) -> bool {
        self.with_group(group_id, "set_group_penalty", |g| {
            g.active_penalty_text = text.to_string();
            g.penalty_meta = if text.is_empty() { None } else { meta };
        })
    }

    pub(crate) fn set_player_slots(&mut self, group_id: GroupId, slots: Vec<PlayerSlot>) -> bool {
        self.with_group(group_id, "set_player_slots", |g| g.player_slots = slots)
    }

    pub(crate) fn set_member_count(
        &mut self,
        group_id: GroupId,
        member_count: u32,
        members: Option<Vec<String>>,
    ) -> bool {
        self.with_group(group_id, "set_member_count", |g| {
            g.member_count = member_count;
            if let Some(members) = members {
                g.members = members;
            }
        })
    }

    pub(crate) fn set_authorized_users(&mut self, users: Vec<String>) {
        self.authorized_users = users;
    }

    pub(crate) fn set_timer(&mut self, timer: Timer) {
        self.timer = timer;
    }

    /// Full replacement used by `full_resync`. Provisional groups are dropped with the rest.
    pub(crate) fn replace_all(
        &mut self,
        groups: Vec<Group>,
        current_group: Option<GroupId>,
        authorized_users: Option<Vec<String>>,
        timer: Option<Timer>,
    ) {
        self.membership = resolve_membership(
            &groups,
            current_group,
            self.challenge.current_user.as_deref(),
        );
        self.groups = groups;
        if let Some(users) = authorized_users {
            self.authorized_users = users;
        }
        if let Some(timer) = timer {
            self.timer = timer;
        }
    }

    pub(crate) fn next_provisional_id(&mut self) -> GroupId {
        let id = self.next_provisional_id;
        self.next_provisional_id -= 1;
        id
    }

    /// Drops optimistic placeholder groups, all of them or only those with `name`.
    pub(crate) fn remove_provisional_groups(&mut self, name: Option<&str>) {
        let doomed = |g: &Group| g.id < 0 && name.map_or(true, |n| g.name == n);
        if self.current_group().map_or(false, doomed) {
            self.membership = MembershipState::Unjoined;
        }
        self.groups.retain(|g| !doomed(g));
    }

    fn with_group(&mut self, group_id: GroupId, op: &str, f: impl FnOnce(&mut Group)) -> bool {
        match self.groups.iter_mut().find(|g| g.id == group_id) {
            Some(group) => {
                f(group);
                true
            }
            None => {
                warn!(group_id, op, "mutation for unknown group ignored");
                false
            }
        }
    }
}

/// Membership after a full replacement: the explicit pointer when it names a known group,
/// otherwise whichever group lists the current user.
fn resolve_membership(
    groups: &[Group],
    current_group: Option<GroupId>,
    current_user: Option<&str>,
) -> MembershipState {
    let explicit = current_group.filter(|id| groups.iter().any(|g| g.id == *id));
    let derived = || {
        let user = current_user?;
        groups
            .iter()
            .find(|g| g.members.iter().any(|m| m == user))
            .map(|g| g.id)
    };
    MembershipState::from_group(explicit.or_else(derived))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{group, shared_snapshot};

    fn meta_now() -> PenaltyMeta {
        PenaltyMeta {
            duration_seconds: 60,
            applied_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn unknown_group_mutations_are_noops() {
        let mut store = StateStore::from_snapshot(shared_snapshot(2, vec![group(1, "A", 0)]));
        let before = store.clone();
        assert!(!store.set_group_progress_key(99, "normal_SpeedRun_0", true));
        assert!(!store.set_group_penalty(99, "x", None));
        assert!(!store.set_player_slots(99, vec![]));
        assert!(!store.set_membership(Some(99)));
        assert!(store.remove_group(99).is_none());
        assert_eq!(store, before);
    }

    #[test]
    fn removing_current_group_clears_membership() {
        let mut snapshot = shared_snapshot(2, vec![group(1, "A", 1), group(2, "B", 0)]);
        snapshot.current_group = Some(1);
        let mut store = StateStore::from_snapshot(snapshot);
        let (index, removed) = store.remove_group(1).unwrap();
        assert_eq!(store.membership(), MembershipState::Unjoined);
        store.restore_group(index, removed);
        assert_eq!(store.groups()[0].id, 1);
    }

    #[test]
    fn membership_derives_from_member_list() {
        let mut b = group(2, "B", 1);
        b.members = vec!["alex".into()];
        let store = StateStore::from_snapshot(shared_snapshot(2, vec![group(1, "A", 0), b]));
        assert_eq!(store.membership(), MembershipState::JoinedGroup(2));
    }

    #[test]
    fn clearing_penalty_drops_metadata() {
        let mut store = StateStore::from_snapshot(shared_snapshot(2, vec![group(1, "A", 0)]));
        store.set_group_penalty(1, "Push-ups", Some(meta_now()));
        assert!(store.group(1).unwrap().penalty_meta.is_some());
        store.set_group_penalty(1, "", Some(meta_now()));
        assert!(store.group(1).unwrap().penalty_meta.is_none());
    }

    #[test]
    fn snapshot_marks_single_current_group() {
        let mut snapshot = shared_snapshot(2, vec![group(1, "A", 1), group(2, "B", 0)]);
        snapshot.current_group = Some(1);
        let store = StateStore::from_snapshot(snapshot);
        let view = store.snapshot(PenaltyPhase::Idle);
        let flagged: Vec<_> = view
            .groups
            .iter()
            .filter(|g| g.is_current_user_member)
            .map(|g| g.group.id)
            .collect();
        assert_eq!(flagged, vec![1]);
    }
}
