use crate::timer::Timer;
use crate::types::{Challenge, Group, GroupId};
use serde::{Deserialize, Serialize};

// Server-supplied view of one challenge. Bootstraps a session and doubles as the `full_resync`
// payload after a reconnect.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ChallengeSnapshot {
    pub challenge: Challenge,
    #[serde(default)]
    pub groups: Vec<Group>,
    /// The group the current user belongs to, as the server sees it.
    #[serde(default)]
    pub current_group: Option<GroupId>,
    #[serde(default)]
    pub authorized_users: Vec<String>,
    #[serde(default)]
    pub timer: Timer,
}
