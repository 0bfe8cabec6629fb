use challenge_model::GroupId;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

// Instance tokens for in-flight remote calls. A newer call under the same key supersedes the
// older one; the older call's resolution is then discarded no matter when it arrives. Each key
// also holds one rollback, taken when the first outstanding call started, so a failure of the
// newest call returns to the last confirmed state rather than an earlier optimistic one.

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActionKey {
    Membership,
    CreateGroup,
    DeleteGroup(GroupId),
    Progress(GroupId, String),
    Penalty(GroupId),
    PlayerNames(GroupId),
    Authorize,
    Timer,
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKey::Membership => write!(f, "membership"),
            ActionKey::CreateGroup => write!(f, "create_group"),
            ActionKey::DeleteGroup(id) => write!(f, "delete_group:{}", id),
            ActionKey::Progress(id, key) => write!(f, "progress:{}:{}", id, key),
            ActionKey::Penalty(id) => write!(f, "penalty:{}", id),
            ActionKey::PlayerNames(id) => write!(f, "player_names:{}", id),
            ActionKey::Authorize => write!(f, "authorize"),
            ActionKey::Timer => write!(f, "timer"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    pub key: ActionKey,
    token: u64,
}

struct Entry<B> {
    token: u64,
    baseline: B,
}

pub struct InflightRegistry<B> {
    next_token: u64,
    current: HashMap<ActionKey, Entry<B>>,
}

impl<B> Default for InflightRegistry<B> {
    fn default() -> Self {
        Self {
            next_token: 0,
            current: HashMap::new(),
        }
    }
}

impl<B> InflightRegistry<B> {
    /// Opens a call under `key`. The baseline is kept only when no call is outstanding for the
    /// key; a superseding call inherits the older one's.
    pub fn begin(&mut self, key: ActionKey, baseline: B) -> Ticket {
        self.next_token += 1;
        let token = self.next_token;
        match self.current.get_mut(&key) {
            Some(entry) => {
                debug!(key = %key, previous = entry.token, token, "superseding in-flight call");
                entry.token = token;
            }
            None => {
                self.current.insert(key.clone(), Entry { token, baseline });
            }
        }
        Ticket { key, token }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.current.get(&ticket.key).map(|e| e.token) == Some(ticket.token)
    }

    /// Closes the ticket and hands back the key's baseline. Returns `None` when a newer call took
    /// over the key.
    pub fn finish(&mut self, ticket: &Ticket) -> Option<B> {
        if !self.is_current(ticket) {
            return None;
        }
        self.current.remove(&ticket.key).map(|e| e.baseline)
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_ticket_supersedes_older() {
        let mut registry = InflightRegistry::default();
        let a = registry.begin(ActionKey::PlayerNames(1), "a");
        let b = registry.begin(ActionKey::PlayerNames(1), "b");
        assert!(!registry.is_current(&a));
        assert!(registry.finish(&b).is_some());
        // A late resolution of `a` after `b` completed is still stale.
        assert!(registry.finish(&a).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn superseding_call_inherits_first_baseline() {
        let mut registry = InflightRegistry::default();
        let key = ActionKey::Progress(1, "normal_A_0".into());
        let a = registry.begin(key.clone(), "before a");
        let b = registry.begin(key.clone(), "before b");
        assert_eq!(registry.finish(&a), None);
        assert_eq!(registry.finish(&b), Some("before a"));

        // Once settled, the next call starts a fresh baseline.
        let c = registry.begin(key, "before c");
        assert_eq!(registry.finish(&c), Some("before c"));
    }

    #[test]
    fn keys_are_independent() {
        let mut registry = InflightRegistry::default();
        let a = registry.begin(ActionKey::Progress(1, "normal_A_0".into()), ());
        let b = registry.begin(ActionKey::Progress(1, "normal_A_1".into()), ());
        assert!(registry.is_current(&a));
        assert!(registry.is_current(&b));
        assert_eq!(registry.len(), 2);
    }
}
