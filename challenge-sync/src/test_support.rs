use crate::error::RemoteError;
use crate::net::{ApiCall, Channel, EventHandler, EventKind, Transport};
use async_trait::async_trait;
use challenge_model::catalog::starter_requirements;
use challenge_model::{
    AuthFlags, Challenge, ChallengeSnapshot, Group, GroupId, PenaltyEntry, Timer, Topology,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};

pub type CallHook = Arc<dyn Fn(&ApiCall) + Send + Sync>;

pub fn group(id: GroupId, name: &str, member_count: u32) -> Group {
    let mut group = Group::new(id, name);
    group.member_count = member_count;
    group
}

/// A shared multi-group challenge seen by "alex", who is logged in, authorized and the creator.
pub fn shared_snapshot(capacity: u32, groups: Vec<Group>) -> ChallengeSnapshot {
    ChallengeSnapshot {
        challenge: Challenge {
            id: "7".into(),
            name: "Weekend run".into(),
            is_local: false,
            topology: Topology {
                is_multigroup: true,
                max_groups: 4,
                num_players_per_group: capacity,
            },
            requirements: starter_requirements(),
            auth: AuthFlags {
                is_logged_in: true,
                is_creator: true,
                is_authorized: true,
            },
            current_user: Some("alex".into()),
            penalties: vec![
                PenaltyEntry::new("Push-ups", "", 0.5),
                PenaltyEntry::new("Sing", "one verse", 0.5),
            ],
        },
        groups,
        current_group: None,
        authorized_users: vec!["alex".into()],
        timer: Timer::default(),
    }
}

/// Answers calls in order from a scripted queue and records every call it sees.
#[derive(Default)]
pub struct QueueTransport {
    replies: Mutex<VecDeque<Result<Value, RemoteError>>>,
    calls: Mutex<Vec<ApiCall>>,
    hook: Mutex<Option<CallHook>>,
}

impl QueueTransport {
    pub fn new(replies: Vec<Result<Value, RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    pub fn push(&self, reply: Result<Value, RemoteError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Runs before each reply is handed out, e.g. to echo a broadcast back into a session.
    pub fn set_hook(&self, hook: CallHook) {
        *self.hook.lock().unwrap() = Some(hook);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for QueueTransport {
    async fn call(&self, call: ApiCall) -> Result<Value, RemoteError> {
        self.calls.lock().unwrap().push(call.clone());
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(&call);
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::new(599, "no scripted reply")))
    }
}

/// Holds every call open until the test resolves it, so resolution order is under test control.
#[derive(Default)]
pub struct DeferredTransport {
    pending: Mutex<Vec<(ApiCall, Option<oneshot::Sender<Result<Value, RemoteError>>>)>>,
    arrived: Notify,
}

impl DeferredTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let arrived = self.arrived.notified();
            if self.pending.lock().unwrap().len() >= count {
                return;
            }
            arrived.await;
        }
    }

    pub fn call_at(&self, index: usize) -> ApiCall {
        self.pending.lock().unwrap()[index].0.clone()
    }

    pub fn resolve(&self, index: usize, reply: Result<Value, RemoteError>) {
        let sender = self.pending.lock().unwrap()[index].1.take();
        if let Some(sender) = sender {
            let _ = sender.send(reply);
        }
    }
}

#[async_trait]
impl Transport for DeferredTransport {
    async fn call(&self, call: ApiCall) -> Result<Value, RemoteError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push((call, Some(tx)));
        self.arrived.notify_waiters();
        rx.await
            .unwrap_or_else(|_| Err(RemoteError::new(599, "call dropped")))
    }
}

/// Keeps every subscription so tests can publish as the server would.
#[derive(Default)]
pub struct RecordingChannel {
    subscriptions: Mutex<Vec<(String, EventKind, EventHandler)>>,
}

impl RecordingChannel {
    pub fn rooms(&self) -> Vec<(String, EventKind)> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|(room, kind, _)| (room.clone(), *kind))
            .collect()
    }

    pub fn publish(&self, room_id: &str, event: crate::net::ChannelEvent) {
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(room, kind, _)| room == room_id && *kind == event.kind())
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

impl Channel for RecordingChannel {
    fn subscribe(&self, room_id: &str, kind: EventKind, handler: EventHandler) {
        self.subscriptions
            .lock()
            .unwrap()
            .push((room_id.to_string(), kind, handler));
    }
}
