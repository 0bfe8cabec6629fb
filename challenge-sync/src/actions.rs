use crate::error::{RemoteError, Result, SyncError};
use crate::inflight::ActionKey;
use crate::membership::{self, check_can_join, MembershipState, MembershipTransition};
use crate::net::{
    ApiCall, AuthorizeReply, ChannelEvent, MembershipReply, PenaltyReply, PlayerNamesReply,
    ProgressReply, TimerAction, TimerReply,
};
use crate::penalty::{draw_selection, participant_pool};
use crate::store::StateStore;
use crate::{ChallengeSession, Inner};
use challenge_model::constants::{
    MAX_GROUP_NAME_LEN, MAX_PENALTY_DURATION_SECONDS, MAX_PENALTY_TEXT_LEN, MAX_PLAYER_NAME_LEN,
    MAX_USERNAME_LEN,
};
use challenge_model::{
    try_decode_progress_key, Group, GroupId, PenaltyMeta, PenaltySelectionDescriptor, PlayerSlot,
    Timer,
};
use chrono::Utc;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, info, warn};

// The action layer. Every user intent is staged against the store under one lock (validate,
// then apply optimistically), sent, and then either reconciled with the reply or undone. A newer
// call under the same action key makes the older one's reply stale, and stale replies touch
// nothing. Rollback always uses the undo of the oldest outstanding call for the key.

pub(crate) type Undo = Box<dyn FnOnce(&mut StateStore) + Send>;
type Reconcile<T> = Box<dyn FnOnce(&mut StateStore, &T) + Send>;

struct Staged<T> {
    key: ActionKey,
    call: ApiCall,
    undo: Undo,
    reconcile: Reconcile<T>,
}

impl<T> Staged<T> {
    fn new(
        key: ActionKey,
        call: ApiCall,
        undo: impl FnOnce(&mut StateStore) + Send + 'static,
        reconcile: impl FnOnce(&mut StateStore, &T) + Send + 'static,
    ) -> Self {
        Self {
            key,
            call,
            undo: Box::new(undo),
            reconcile: Box::new(reconcile),
        }
    }
}

impl ChallengeSession {
    async fn perform<T, S>(&self, stage: S) -> Result<T>
    where
        T: DeserializeOwned + Send,
        S: FnOnce(&mut StateStore) -> Result<Staged<T>> + Send,
    {
        let (ticket, call, reconcile) = {
            let mut inner = self.lock();
            let staged = stage(&mut inner.store)?;
            let ticket = inner.inflight.begin(staged.key, staged.undo);
            (ticket, staged.call, staged.reconcile)
        };
        debug!(key = %ticket.key, endpoint = %call.endpoint(), "optimistic update applied");
        self.notify();

        let reply = match self.transport.call(call).await {
            Ok(raw) => serde_json::from_value::<T>(raw).map_err(RemoteError::malformed),
            Err(err) => Err(err),
        };

        let outcome = {
            let mut inner = self.lock();
            let Some(undo) = inner.inflight.finish(&ticket) else {
                debug!(key = %ticket.key, "discarding superseded response");
                return Err(SyncError::StaleResponse {
                    key: ticket.key.to_string(),
                });
            };
            match reply {
                Ok(reply) => {
                    reconcile(&mut inner.store, &reply);
                    Ok(reply)
                }
                Err(err) => {
                    warn!(
                        key = %ticket.key,
                        status = err.status,
                        message = %err.message,
                        "remote call failed; rolling back"
                    );
                    undo(&mut inner.store);
                    Err(SyncError::Remote(err))
                }
            }
        };
        self.notify();
        outcome
    }

    pub async fn join_group(&self, group_id: GroupId) -> Result<MembershipReply> {
        let challenge_id = self.challenge_id.clone();
        self.perform(move |store| {
            check_can_join(store)?;
            check_settled(group_id)?;
            let (member_count, members) =
                existing_group(store, group_id).map(|g| (g.member_count, g.members.clone()))?;
            let next = membership::transition(
                store.membership(),
                MembershipTransition::Join {
                    group_id,
                    member_count,
                    capacity: store.capacity(),
                },
            )?;

            let mut joined = members.clone();
            if let Some(user) = store.challenge().current_user.clone() {
                if !joined.contains(&user) {
                    joined.push(user);
                }
            }
            store.set_member_count(group_id, member_count + 1, Some(joined));
            store.set_membership(next.group_id());

            Ok(Staged::new(
                ActionKey::Membership,
                ApiCall::JoinGroup {
                    challenge_id,
                    group_id,
                },
                move |store: &mut StateStore| {
                    store.set_member_count(group_id, member_count, Some(members));
                    if store.membership().is_member_of(group_id) {
                        store.set_membership(None);
                    }
                },
                |store: &mut StateStore, reply: &MembershipReply| {
                    store.set_member_count(reply.group_id, reply.member_count, reply.members.clone());
                    store.set_membership(Some(reply.group_id));
                },
            ))
        })
        .await
    }

    pub async fn leave_group(&self) -> Result<MembershipReply> {
        let challenge_id = self.challenge_id.clone();
        self.perform(move |store| {
            if store.challenge().is_local {
                return Err(SyncError::validation(
                    "local challenges have a single fixed group",
                ));
            }
            let state = store.membership();
            let next = membership::transition(state, MembershipTransition::Leave)?;
            let group_id = state
                .group_id()
                .ok_or_else(|| SyncError::validation("not a member of any group"))?;
            let (member_count, members) =
                existing_group(store, group_id).map(|g| (g.member_count, g.members.clone()))?;

            let user = store.challenge().current_user.clone();
            let remaining: Vec<String> = members
                .iter()
                .filter(|m| user.as_ref() != Some(*m))
                .cloned()
                .collect();
            store.set_member_count(group_id, member_count.saturating_sub(1), Some(remaining));
            store.set_membership(next.group_id());

            Ok(Staged::new(
                ActionKey::Membership,
                ApiCall::LeaveGroup {
                    challenge_id,
                    group_id,
                },
                move |store: &mut StateStore| {
                    store.set_member_count(group_id, member_count, Some(members));
                    if store.membership() == MembershipState::Unjoined {
                        store.set_membership(Some(group_id));
                    }
                },
                |store: &mut StateStore, reply: &MembershipReply| {
                    store.set_member_count(reply.group_id, reply.member_count, reply.members.clone());
                },
            ))
        })
        .await
    }

    /// Joins the only group of a single-group challenge when nothing stands in the way.
    pub async fn auto_join(&self) -> Result<Option<GroupId>> {
        let target = membership::auto_join_target(&self.lock().store);
        let Some(group_id) = target else {
            return Ok(None);
        };
        info!(group_id, "auto-joining the only group");
        self.join_group(group_id).await?;
        Ok(Some(group_id))
    }

    pub async fn create_group(&self, name: &str) -> Result<Group> {
        let challenge_id = self.challenge_id.clone();
        let name = name.trim().to_string();
        self.perform(move |store| {
            require_creator(store, "create groups")?;
            if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_LEN {
                return Err(SyncError::validation(format!(
                    "group names must be 1-{} characters",
                    MAX_GROUP_NAME_LEN
                )));
            }
            let max_groups = store.challenge().topology.max_groups;
            let settled = store.groups().iter().filter(|g| g.id >= 0).count();
            if settled >= max_groups as usize {
                return Err(SyncError::validation(format!(
                    "this challenge allows at most {} groups",
                    max_groups
                )));
            }

            // Only the newest create keeps a placeholder.
            store.remove_provisional_groups(None);
            let provisional = store.next_provisional_id();
            store.upsert_group(Group::new(provisional, &name));

            Ok(Staged::new(
                ActionKey::CreateGroup,
                ApiCall::CreateGroup { challenge_id, name },
                |store: &mut StateStore| store.remove_provisional_groups(None),
                |store: &mut StateStore, group: &Group| {
                    store.remove_provisional_groups(None);
                    store.upsert_group(group.clone());
                },
            ))
        })
        .await
    }

    pub async fn delete_group(&self, group_id: GroupId) -> Result<()> {
        let challenge_id = self.challenge_id.clone();
        self.perform(move |store| {
            require_creator(store, "delete groups")?;
            check_settled(group_id)?;
            existing_group(store, group_id)?;
            let was_member = store.membership().is_member_of(group_id);
            let (index, removed) = store
                .remove_group(group_id)
                .ok_or_else(|| SyncError::validation("group already removed"))?;

            Ok(Staged::new(
                ActionKey::DeleteGroup(group_id),
                ApiCall::DeleteGroup {
                    challenge_id,
                    group_id,
                },
                move |store: &mut StateStore| {
                    store.restore_group(index, removed);
                    if was_member && store.membership() == MembershipState::Unjoined {
                        store.set_membership(Some(group_id));
                    }
                },
                |_: &mut StateStore, _: &IgnoredAny| {},
            ))
        })
        .await
        .map(|_| ())
    }

    /// Marks one requirement instance in the current user's group.
    pub async fn toggle_item(&self, key: &str, completed: bool) -> Result<ProgressReply> {
        let challenge_id = self.challenge_id.clone();
        let parsed = try_decode_progress_key(key).map_err(|e| SyncError::validation(e.to_string()))?;
        let key = key.to_string();
        self.perform(move |store| {
            let group_id = acting_group(store)?;
            if !store.challenge().requirements.contains(&parsed) {
                return Err(SyncError::validation(format!(
                    "no requirement matches {}",
                    key
                )));
            }
            let prior = store
                .progress(group_id)
                .and_then(|p| p.get(&key))
                .copied();
            store.set_group_progress_key(group_id, &key, completed);

            let undo_key = key.clone();
            let reconcile_key = key.clone();
            Ok(Staged::new(
                ActionKey::Progress(group_id, key.clone()),
                ApiCall::SetProgress {
                    challenge_id,
                    group_id,
                    key,
                    completed,
                },
                move |store: &mut StateStore| match prior {
                    Some(done) => {
                        store.set_group_progress_key(group_id, &undo_key, done);
                    }
                    None => {
                        store.clear_group_progress_key(group_id, &undo_key);
                    }
                },
                move |store: &mut StateStore, reply: &ProgressReply| {
                    if let Some(done) = reply.completed {
                        store.set_group_progress_key(group_id, &reconcile_key, done);
                    }
                },
            ))
        })
        .await
    }

    /// Sets a group's penalty text. An empty text clears it; a positive duration makes it timed.
    pub async fn set_penalty(
        &self,
        group_id: GroupId,
        text: &str,
        duration_seconds: Option<u64>,
    ) -> Result<PenaltyReply> {
        let challenge_id = self.challenge_id.clone();
        let text = text.trim().to_string();
        self.perform(move |store| {
            if store.challenge().is_shared() {
                require_participant(store)?;
            }
            if text.chars().count() > MAX_PENALTY_TEXT_LEN {
                return Err(SyncError::validation(format!(
                    "penalty text is limited to {} characters",
                    MAX_PENALTY_TEXT_LEN
                )));
            }
            if duration_seconds.map_or(false, |d| d > MAX_PENALTY_DURATION_SECONDS) {
                return Err(SyncError::validation(format!(
                    "penalty duration is limited to {} seconds",
                    MAX_PENALTY_DURATION_SECONDS
                )));
            }
            let (prior_text, prior_meta) = existing_group(store, group_id)
                .map(|g| (g.active_penalty_text.clone(), g.penalty_meta.clone()))?;
            let meta = duration_seconds.filter(|d| *d > 0).map(|d| PenaltyMeta {
                duration_seconds: d,
                applied_at: Utc::now(),
            });
            store.set_group_penalty(group_id, &text, meta);

            Ok(Staged::new(
                ActionKey::Penalty(group_id),
                ApiCall::SetPenalty {
                    challenge_id,
                    group_id,
                    text,
                    duration_seconds,
                },
                move |store: &mut StateStore| {
                    store.set_group_penalty(group_id, &prior_text, prior_meta);
                },
                move |store: &mut StateStore, reply: &PenaltyReply| {
                    store.set_group_penalty(group_id, &reply.text, reply.meta.clone());
                },
            ))
        })
        .await
    }

    pub async fn clear_penalty(&self, group_id: GroupId) -> Result<PenaltyReply> {
        self.set_penalty(group_id, "", None).await
    }

    pub async fn save_player_names(
        &self,
        group_id: GroupId,
        slots: Vec<PlayerSlot>,
    ) -> Result<Vec<PlayerSlot>> {
        let challenge_id = self.challenge_id.clone();
        self.perform(move |store| {
            if store.challenge().is_local {
                return Err(SyncError::validation(
                    "local challenges have no player slots",
                ));
            }
            require_participant(store)?;
            let prior = existing_group(store, group_id).map(|g| g.player_slots.clone())?;
            if slots.len() > store.capacity() as usize {
                return Err(SyncError::validation(format!(
                    "a group has at most {} player slots",
                    store.capacity()
                )));
            }
            let slots: Vec<PlayerSlot> = slots
                .into_iter()
                .map(|slot| PlayerSlot {
                    display_name: slot.display_name.trim().to_string(),
                    account_name: slot.account_name,
                })
                .collect();
            if slots
                .iter()
                .any(|s| s.display_name.chars().count() > MAX_PLAYER_NAME_LEN)
            {
                return Err(SyncError::validation(format!(
                    "player names are limited to {} characters",
                    MAX_PLAYER_NAME_LEN
                )));
            }
            store.set_player_slots(group_id, slots.clone());

            Ok(Staged::new(
                ActionKey::PlayerNames(group_id),
                ApiCall::SavePlayerNames {
                    challenge_id,
                    group_id,
                    slots,
                },
                move |store: &mut StateStore| {
                    store.set_player_slots(group_id, prior);
                },
                move |store: &mut StateStore, reply: &PlayerNamesReply| {
                    store.set_player_slots(group_id, reply.slots.clone());
                },
            ))
        })
        .await
        .map(|reply: PlayerNamesReply| reply.slots)
    }

    pub async fn authorize_user(&self, username: &str) -> Result<Vec<String>> {
        let challenge_id = self.challenge_id.clone();
        let username = username.trim().to_string();
        self.perform(move |store| {
            require_creator(store, "authorize users")?;
            if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
                return Err(SyncError::validation(format!(
                    "usernames must be 1-{} characters",
                    MAX_USERNAME_LEN
                )));
            }
            let prior = store.authorized_users().to_vec();
            if prior.contains(&username) {
                return Err(SyncError::validation(format!(
                    "{} is already authorized",
                    username
                )));
            }
            let mut users = prior.clone();
            users.push(username.clone());
            store.set_authorized_users(users);

            Ok(Staged::new(
                ActionKey::Authorize,
                ApiCall::AuthorizeUser {
                    challenge_id,
                    username,
                },
                move |store: &mut StateStore| store.set_authorized_users(prior),
                |store: &mut StateStore, reply: &AuthorizeReply| {
                    store.set_authorized_users(reply.authorized_users.clone());
                },
            ))
        })
        .await
        .map(|reply: AuthorizeReply| reply.authorized_users)
    }

    pub async fn start_timer(&self) -> Result<Timer> {
        self.timer_action(TimerAction::Start).await
    }

    pub async fn stop_timer(&self) -> Result<Timer> {
        self.timer_action(TimerAction::Stop).await
    }

    pub async fn reset_timer(&self) -> Result<Timer> {
        self.timer_action(TimerAction::Reset).await
    }

    async fn timer_action(&self, action: TimerAction) -> Result<Timer> {
        let challenge_id = self.challenge_id.clone();
        self.perform(move |store| {
            require_creator(store, "control the timer")?;
            let prior = store.timer().clone();
            let now = Utc::now();
            let next = match action {
                TimerAction::Start => prior.started(now),
                TimerAction::Stop => prior.stopped(now),
                TimerAction::Reset => Timer::reset(),
            };
            store.set_timer(next.clone());

            Ok(Staged::new(
                ActionKey::Timer,
                ApiCall::Timer {
                    challenge_id,
                    action,
                    timer: next,
                },
                move |store: &mut StateStore| store.set_timer(prior),
                |store: &mut StateStore, reply: &TimerReply| store.set_timer(reply.timer.clone()),
            ))
        })
        .await
        .map(|reply: TimerReply| reply.timer)
    }

    /// Draws a participant and a penalty for the current group, then waits for the descriptor to
    /// come back through the channel before persisting the result. Local challenges replay their
    /// own descriptor directly.
    pub async fn trigger_penalty(&self) -> Result<PenaltySelectionDescriptor> {
        let (group_id, descriptor, echo) = {
            let mut inner = self.lock();
            let Inner {
                store,
                penalty,
                rng,
                ..
            } = &mut *inner;
            let group_id = acting_group(store)?;
            if penalty.is_awaiting_echo() {
                return Err(SyncError::validation(
                    "a penalty selection is already in progress",
                ));
            }
            let participants = participant_pool(store.challenge(), store.group(group_id));
            let penalties = self.config.penalty_source(store.challenge());
            let descriptor = draw_selection(rng, participants, &penalties);
            let echo = if store.challenge().is_local {
                None
            } else {
                Some(penalty.await_echo(group_id, &descriptor))
            };
            (group_id, descriptor, echo)
        };
        info!(
            group_id,
            participant = %descriptor.participant,
            penalty = ?descriptor.penalty,
            "penalty drawn"
        );

        let replayed = match echo {
            None => {
                let _ = self.handle_event(ChannelEvent::PenaltySelection {
                    group_id,
                    descriptor: descriptor.clone(),
                });
                descriptor
            }
            Some(echo) => {
                let submitted = self
                    .transport
                    .call(ApiCall::SubmitPenaltySelection {
                        challenge_id: self.challenge_id.clone(),
                        group_id,
                        descriptor,
                    })
                    .await;
                if let Err(err) = submitted {
                    self.lock().penalty.cancel_echo();
                    return Err(err.into());
                }
                echo.await.map_err(|_| SyncError::StaleResponse {
                    key: "penalty_selection".to_string(),
                })?
            }
        };

        self.set_penalty(group_id, &replayed.result_text(), None)
            .await?;
        Ok(replayed)
    }
}

fn existing_group(store: &StateStore, group_id: GroupId) -> Result<&Group> {
    store
        .group(group_id)
        .ok_or_else(|| SyncError::validation(format!("group {} does not exist", group_id)))
}

fn check_settled(group_id: GroupId) -> Result<()> {
    if group_id < 0 {
        return Err(SyncError::validation("group is still being created"));
    }
    Ok(())
}

fn require_participant(store: &StateStore) -> Result<()> {
    if !store.is_logged_in() {
        return Err(SyncError::authorization("log in first"));
    }
    if !store.is_authorized() {
        return Err(SyncError::authorization(
            "you are not authorized to participate in this challenge",
        ));
    }
    Ok(())
}

fn require_creator(store: &StateStore, what: &str) -> Result<()> {
    if store.challenge().is_local {
        return Err(SyncError::validation(format!(
            "cannot {} in a local challenge",
            what
        )));
    }
    if !store.is_logged_in() {
        return Err(SyncError::authorization("log in first"));
    }
    if !store.is_creator() {
        return Err(SyncError::authorization(format!(
            "only the challenge creator can {}",
            what
        )));
    }
    Ok(())
}

/// The group the user acts on: their membership group. Shared challenges also need a logged-in,
/// authorized user.
fn acting_group(store: &StateStore) -> Result<GroupId> {
    if store.challenge().is_shared() {
        require_participant(store)?;
    }
    store
        .current_group()
        .map(|g| g.id)
        .ok_or_else(|| SyncError::validation("join a group first"))
}
