use crate::error::ReconciliationWarning;
use crate::net::ChannelEvent;
use crate::store::StateStore;
use challenge_model::{GroupId, Timer};
use tracing::{debug, info};

// Applies server broadcasts to the store. Every handler writes full values, so applying the same
// event twice leaves the store exactly as applying it once. Echoes of our own optimistic writes
// need no special treatment for the same reason.

/// Store-level effect of one event. `penalty_selection` only checks its target here; replay is
/// driven by the session's penalty engine.
pub fn apply_event(
    store: &mut StateStore,
    event: &ChannelEvent,
) -> Result<(), ReconciliationWarning> {
    match event {
        ChannelEvent::FullResync {
            groups,
            current_group,
            authorized_users,
            timer,
        } => {
            info!(
                groups = groups.len(),
                current_group = ?current_group,
                "applying full resync"
            );
            store.replace_all(
                groups.clone(),
                *current_group,
                authorized_users.clone(),
                timer.clone(),
            );
            Ok(())
        }
        ChannelEvent::MembershipChanged {
            group_id,
            member_count,
            members,
        } => {
            known_group(store, *group_id)?;
            store.set_member_count(*group_id, *member_count, members.clone());
            if let (Some(members), Some(user)) = (members, store.challenge().current_user.clone())
            {
                let listed = members.iter().any(|m| *m == user);
                if listed {
                    store.set_membership(Some(*group_id));
                } else if store.membership().is_member_of(*group_id) {
                    store.set_membership(None);
                }
            }
            Ok(())
        }
        ChannelEvent::ProgressChanged {
            group_id,
            key,
            completed,
        } => {
            known_group(store, *group_id)?;
            if !store.challenge().requirements.contains_raw(key) {
                return Err(ReconciliationWarning::UnknownProgressKey {
                    group_id: *group_id,
                    key: key.clone(),
                });
            }
            store.set_group_progress_key(*group_id, key, *completed);
            Ok(())
        }
        ChannelEvent::PenaltyChanged {
            group_id,
            text,
            meta,
        } => {
            known_group(store, *group_id)?;
            store.set_group_penalty(*group_id, text, meta.clone());
            Ok(())
        }
        ChannelEvent::GroupCreated(group) => {
            // Our own optimistic placeholder for this name is superseded by the real group.
            store.remove_provisional_groups(Some(&group.name));
            store.upsert_group(group.clone());
            Ok(())
        }
        ChannelEvent::GroupRemoved { group_id } => {
            known_group(store, *group_id)?;
            store.remove_group(*group_id);
            Ok(())
        }
        ChannelEvent::PlayerNamesChanged { group_id, slots } => {
            known_group(store, *group_id)?;
            store.set_player_slots(*group_id, slots.clone());
            Ok(())
        }
        ChannelEvent::PenaltySelection { group_id, .. } => known_group(store, *group_id),
        ChannelEvent::TimerStarted { timer } | ChannelEvent::TimerStopped { timer } => {
            store.set_timer(timer.clone());
            Ok(())
        }
        ChannelEvent::TimerReset => {
            store.set_timer(Timer::reset());
            Ok(())
        }
    }
}

fn known_group(store: &StateStore, group_id: GroupId) -> Result<(), ReconciliationWarning> {
    if store.has_group(group_id) {
        Ok(())
    } else {
        debug!(group_id, "event for group not in store");
        Err(ReconciliationWarning::UnknownGroup(group_id))
    }
}
