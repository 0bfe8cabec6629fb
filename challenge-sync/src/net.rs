use crate::error::RemoteError;
use async_trait::async_trait;
use challenge_model::{
    ChallengeSnapshot, Group, GroupId, PenaltyMeta, PenaltySelectionDescriptor, PlayerSlot, Timer,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Wire-level shapes for remote calls and push-channel events, plus the two collaborator seams.
// These stay simple to keep compatibility with whatever JSON transport sits underneath.

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerAction {
    Start,
    Stop,
    Reset,
}

/// One remote call per user intent. Payloads carry target ids and the new value so a retried
/// call lands on the same state.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ApiCall {
    FetchState {
        challenge_id: String,
    },
    JoinGroup {
        challenge_id: String,
        group_id: GroupId,
    },
    LeaveGroup {
        challenge_id: String,
        group_id: GroupId,
    },
    CreateGroup {
        challenge_id: String,
        name: String,
    },
    DeleteGroup {
        challenge_id: String,
        group_id: GroupId,
    },
    SetProgress {
        challenge_id: String,
        group_id: GroupId,
        key: String,
        completed: bool,
    },
    SetPenalty {
        challenge_id: String,
        group_id: GroupId,
        text: String,
        duration_seconds: Option<u64>,
    },
    SavePlayerNames {
        challenge_id: String,
        group_id: GroupId,
        slots: Vec<PlayerSlot>,
    },
    AuthorizeUser {
        challenge_id: String,
        username: String,
    },
    SubmitPenaltySelection {
        challenge_id: String,
        group_id: GroupId,
        descriptor: PenaltySelectionDescriptor,
    },
    Timer {
        challenge_id: String,
        action: TimerAction,
        timer: Timer,
    },
}

impl ApiCall {
    pub fn challenge_id(&self) -> &str {
        match self {
            ApiCall::FetchState { challenge_id }
            | ApiCall::JoinGroup { challenge_id, .. }
            | ApiCall::LeaveGroup { challenge_id, .. }
            | ApiCall::CreateGroup { challenge_id, .. }
            | ApiCall::DeleteGroup { challenge_id, .. }
            | ApiCall::SetProgress { challenge_id, .. }
            | ApiCall::SetPenalty { challenge_id, .. }
            | ApiCall::SavePlayerNames { challenge_id, .. }
            | ApiCall::AuthorizeUser { challenge_id, .. }
            | ApiCall::SubmitPenaltySelection { challenge_id, .. }
            | ApiCall::Timer { challenge_id, .. } => challenge_id,
        }
    }

    /// Path relative to the API root, for HTTP-backed transports.
    pub fn endpoint(&self) -> String {
        let base = format!("challenges/{}", self.challenge_id());
        match self {
            ApiCall::FetchState { .. } => format!("{}/state", base),
            ApiCall::JoinGroup { group_id, .. } => format!("{}/groups/{}/join", base, group_id),
            ApiCall::LeaveGroup { group_id, .. } => format!("{}/groups/{}/leave", base, group_id),
            ApiCall::CreateGroup { .. } => format!("{}/groups", base),
            ApiCall::DeleteGroup { group_id, .. } => format!("{}/groups/{}", base, group_id),
            ApiCall::SetProgress { group_id, .. } => {
                format!("{}/groups/{}/progress", base, group_id)
            }
            ApiCall::SetPenalty { group_id, .. } => format!("{}/groups/{}/penalty", base, group_id),
            ApiCall::SavePlayerNames { group_id, .. } => {
                format!("{}/groups/{}/players", base, group_id)
            }
            ApiCall::AuthorizeUser { .. } => format!("{}/authorized-users", base),
            ApiCall::SubmitPenaltySelection { group_id, .. } => {
                format!("{}/groups/{}/penalty-selection", base, group_id)
            }
            ApiCall::Timer { action, .. } => match action {
                TimerAction::Start => format!("{}/timer/start", base),
                TimerAction::Stop => format!("{}/timer/stop", base),
                TimerAction::Reset => format!("{}/timer/reset", base),
            },
        }
    }

    pub fn method(&self) -> Method {
        match self {
            ApiCall::FetchState { .. } => Method::Get,
            ApiCall::DeleteGroup { .. } => Method::Delete,
            ApiCall::SetProgress { .. }
            | ApiCall::SetPenalty { .. }
            | ApiCall::SavePlayerNames { .. } => Method::Put,
            _ => Method::Post,
        }
    }

    /// JSON body for HTTP-backed transports: the variant's fields.
    pub fn body(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.get("data").cloned())
            .unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct MembershipReply {
    pub group_id: GroupId,
    pub member_count: u32,
    #[serde(default)]
    pub members: Option<Vec<String>>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ProgressReply {
    #[serde(default)]
    pub completed: Option<bool>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PenaltyReply {
    pub text: String,
    #[serde(default)]
    pub meta: Option<PenaltyMeta>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PlayerNamesReply {
    pub slots: Vec<PlayerSlot>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct AuthorizeReply {
    pub authorized_users: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TimerReply {
    pub timer: Timer,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FullResync,
    MembershipChanged,
    ProgressChanged,
    PenaltyChanged,
    GroupCreated,
    GroupRemoved,
    PlayerNamesChanged,
    PenaltySelection,
    TimerStarted,
    TimerStopped,
    TimerReset,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::FullResync,
        EventKind::MembershipChanged,
        EventKind::ProgressChanged,
        EventKind::PenaltyChanged,
        EventKind::GroupCreated,
        EventKind::GroupRemoved,
        EventKind::PlayerNamesChanged,
        EventKind::PenaltySelection,
        EventKind::TimerStarted,
        EventKind::TimerStopped,
        EventKind::TimerReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FullResync => "full_resync",
            EventKind::MembershipChanged => "membership_changed",
            EventKind::ProgressChanged => "progress_changed",
            EventKind::PenaltyChanged => "penalty_changed",
            EventKind::GroupCreated => "group_created",
            EventKind::GroupRemoved => "group_removed",
            EventKind::PlayerNamesChanged => "player_names_changed",
            EventKind::PenaltySelection => "penalty_selection",
            EventKind::TimerStarted => "timer_started",
            EventKind::TimerStopped => "timer_stopped",
            EventKind::TimerReset => "timer_reset",
        }
    }
}

/// Server broadcasts. Every variant carries full new values, never deltas.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChannelEvent {
    FullResync {
        groups: Vec<Group>,
        #[serde(default)]
        current_group: Option<GroupId>,
        #[serde(default)]
        authorized_users: Option<Vec<String>>,
        #[serde(default)]
        timer: Option<Timer>,
    },
    MembershipChanged {
        group_id: GroupId,
        member_count: u32,
        /// Full member list when the server discloses it; `None` leaves membership alone.
        #[serde(default)]
        members: Option<Vec<String>>,
    },
    ProgressChanged {
        group_id: GroupId,
        key: String,
        completed: bool,
    },
    PenaltyChanged {
        group_id: GroupId,
        text: String,
        #[serde(default)]
        meta: Option<PenaltyMeta>,
    },
    GroupCreated(Group),
    GroupRemoved {
        group_id: GroupId,
    },
    PlayerNamesChanged {
        group_id: GroupId,
        slots: Vec<PlayerSlot>,
    },
    PenaltySelection {
        group_id: GroupId,
        descriptor: PenaltySelectionDescriptor,
    },
    TimerStarted {
        timer: Timer,
    },
    TimerStopped {
        timer: Timer,
    },
    TimerReset,
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::FullResync { .. } => EventKind::FullResync,
            ChannelEvent::MembershipChanged { .. } => EventKind::MembershipChanged,
            ChannelEvent::ProgressChanged { .. } => EventKind::ProgressChanged,
            ChannelEvent::PenaltyChanged { .. } => EventKind::PenaltyChanged,
            ChannelEvent::GroupCreated(_) => EventKind::GroupCreated,
            ChannelEvent::GroupRemoved { .. } => EventKind::GroupRemoved,
            ChannelEvent::PlayerNamesChanged { .. } => EventKind::PlayerNamesChanged,
            ChannelEvent::PenaltySelection { .. } => EventKind::PenaltySelection,
            ChannelEvent::TimerStarted { .. } => EventKind::TimerStarted,
            ChannelEvent::TimerStopped { .. } => EventKind::TimerStopped,
            ChannelEvent::TimerReset => EventKind::TimerReset,
        }
    }

    pub fn from_snapshot(snapshot: ChallengeSnapshot) -> Self {
        ChannelEvent::FullResync {
            groups: snapshot.groups,
            current_group: snapshot.current_group,
            authorized_users: Some(snapshot.authorized_users),
            timer: Some(snapshot.timer),
        }
    }
}

/// A channel frame as it arrives on the socket: the room plus the tagged event.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ChannelEnvelope {
    pub room: String,
    #[serde(flatten)]
    pub event: ChannelEvent,
}

impl ChannelEnvelope {
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Request/response collaborator. Implementations own timeouts and retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, call: ApiCall) -> Result<serde_json::Value, RemoteError>;
}

pub type EventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Publish/subscribe collaborator keyed by room id. Clients only subscribe; the server publishes.
pub trait Channel: Send + Sync {
    fn subscribe(&self, room_id: &str, kind: EventKind, handler: EventHandler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_use_snake_case_tags() {
        let raw = json!({
            "room": "challenge-7",
            "type": "progress_changed",
            "data": {"group_id": 3, "key": "normal_SpeedRun_0", "completed": true}
        })
        .to_string();
        let envelope = ChannelEnvelope::decode(&raw).unwrap();
        assert_eq!(envelope.room, "challenge-7");
        assert_eq!(envelope.event.kind(), EventKind::ProgressChanged);
        assert_eq!(envelope.event.kind().as_str(), "progress_changed");
    }

    #[test]
    fn unit_event_decodes_without_data() {
        let event: ChannelEvent = serde_json::from_value(json!({"type": "timer_reset"})).unwrap();
        assert_eq!(event, ChannelEvent::TimerReset);
    }

    #[test]
    fn call_routes_to_rest_shape() {
        let call = ApiCall::SetProgress {
            challenge_id: "7".into(),
            group_id: 3,
            key: "normal_SpeedRun_0".into(),
            completed: true,
        };
        assert_eq!(call.endpoint(), "challenges/7/groups/3/progress");
        assert_eq!(call.method(), Method::Put);
        assert_eq!(call.body()["completed"], json!(true));
        assert_eq!(
            ApiCall::DeleteGroup {
                challenge_id: "7".into(),
                group_id: 3
            }
            .method(),
            Method::Delete
        );
    }
}
