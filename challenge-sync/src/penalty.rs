use challenge_model::constants::{PARTICIPANT_FALLBACK, PLAYER_PLACEHOLDER};
use challenge_model::rng::{pick_uniform, pick_weighted, spin};
use challenge_model::{Challenge, Group, GroupId, PenaltyEntry, PenaltySelectionDescriptor};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};

// Penalty resolution. The initiator draws once and ships a descriptor; every client, the
// initiator included, animates from the descriptor that comes back over the channel.

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PenaltyPhase {
    #[default]
    Idle,
    SelectingParticipant {
        group_id: GroupId,
        descriptor: PenaltySelectionDescriptor,
    },
    SelectingPenalty {
        group_id: GroupId,
        descriptor: PenaltySelectionDescriptor,
    },
    Resolved {
        group_id: GroupId,
        descriptor: PenaltySelectionDescriptor,
        result: String,
    },
}

impl PenaltyPhase {
    /// Entry phase for a replayed descriptor. Wheels with nothing to show are skipped: a lone
    /// participant has no participant wheel, and a no-penalty draw has no penalty wheel.
    pub fn start(group_id: GroupId, descriptor: PenaltySelectionDescriptor) -> Self {
        if descriptor.has_participant_wheel() {
            PenaltyPhase::SelectingParticipant {
                group_id,
                descriptor,
            }
        } else if descriptor.has_penalty() {
            PenaltyPhase::SelectingPenalty {
                group_id,
                descriptor,
            }
        } else {
            resolved(group_id, descriptor)
        }
    }

    /// Exhaustive transition function for one animation step.
    pub fn advance(self) -> Self {
        match self {
            PenaltyPhase::Idle => PenaltyPhase::Idle,
            PenaltyPhase::SelectingParticipant {
                group_id,
                descriptor,
            } => {
                if descriptor.has_penalty() {
                    PenaltyPhase::SelectingPenalty {
                        group_id,
                        descriptor,
                    }
                } else {
                    resolved(group_id, descriptor)
                }
            }
            PenaltyPhase::SelectingPenalty {
                group_id,
                descriptor,
            } => resolved(group_id, descriptor),
            done @ PenaltyPhase::Resolved { .. } => done,
        }
    }

    pub fn finish(mut self) -> Self {
        while !matches!(self, PenaltyPhase::Idle | PenaltyPhase::Resolved { .. }) {
            self = self.advance();
        }
        self
    }

    /// The angle the wheel currently on screen should stop at.
    pub fn stop_angle(&self) -> Option<f64> {
        match self {
            PenaltyPhase::SelectingParticipant { descriptor, .. } => {
                Some(descriptor.participant_pick_angle)
            }
            PenaltyPhase::SelectingPenalty { descriptor, .. } => descriptor.penalty_pick_angle,
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&str> {
        match self {
            PenaltyPhase::Resolved { result, .. } => Some(result),
            _ => None,
        }
    }
}

fn resolved(group_id: GroupId, descriptor: PenaltySelectionDescriptor) -> PenaltyPhase {
    let result = descriptor.result_text();
    PenaltyPhase::Resolved {
        group_id,
        descriptor,
        result,
    }
}

/// Names on the participant wheel. Only multi-group challenges with named slots get a real
/// wheel; everything else spins a single synthetic entry.
pub fn participant_pool(challenge: &Challenge, group: Option<&Group>) -> Vec<String> {
    match group {
        Some(group) if challenge.topology.is_multigroup && group.has_named_slots() => group
            .player_slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let name = slot.display_name.trim();
                if name.is_empty() {
                    format!("{} {}", PLAYER_PLACEHOLDER, i + 1)
                } else {
                    name.to_string()
                }
            })
            .collect(),
        _ => vec![PARTICIPANT_FALLBACK.to_string()],
    }
}

/// Runs both draws and records names plus stop angles. Entries without positive probability are
/// left off the penalty wheel entirely.
pub fn draw_selection<R: Rng + ?Sized>(
    rng: &mut R,
    participants: Vec<String>,
    penalties: &[PenaltyEntry],
) -> PenaltySelectionDescriptor {
    let participants = if participants.is_empty() {
        vec![PARTICIPANT_FALLBACK.to_string()]
    } else {
        participants
    };
    let participant_index = pick_uniform(rng, participants.len()).unwrap_or(0);
    let participant_pick = spin(rng, participant_index, participants.len());

    let pool: Vec<PenaltyEntry> = penalties
        .iter()
        .filter(|e| e.is_drawable())
        .cloned()
        .collect();
    let weights: Vec<f64> = pool.iter().map(|e| e.probability).collect();
    let penalty_pick = pick_weighted(rng, &weights).map(|i| spin(rng, i, pool.len()));

    PenaltySelectionDescriptor {
        participant: participants[participant_pick.index].clone(),
        participant_pool: participants,
        participant_pick_angle: participant_pick.angle,
        penalty: penalty_pick.map(|p| pool[p.index].name.clone()),
        penalty_pick_angle: penalty_pick.map(|p| p.angle),
        penalty_pool: pool,
    }
}

struct PendingEcho {
    group_id: GroupId,
    digest: String,
    reply: oneshot::Sender<PenaltySelectionDescriptor>,
}

/// Replay state plus the initiator's wait for its own descriptor to come back.
#[derive(Default)]
pub struct PenaltyEngine {
    phase: PenaltyPhase,
    pending: Option<PendingEcho>,
}

impl PenaltyEngine {
    pub fn phase(&self) -> &PenaltyPhase {
        &self.phase
    }

    /// True while an initiator is still waiting. A wait whose receiver was dropped no longer
    /// counts.
    pub fn is_awaiting_echo(&self) -> bool {
        self.pending
            .as_ref()
            .map_or(false, |p| !p.reply.is_closed())
    }

    pub fn await_echo(
        &mut self,
        group_id: GroupId,
        descriptor: &PenaltySelectionDescriptor,
    ) -> oneshot::Receiver<PenaltySelectionDescriptor> {
        let (reply, receiver) = oneshot::channel();
        self.pending = Some(PendingEcho {
            group_id,
            digest: descriptor.digest(),
            reply,
        });
        receiver
    }

    pub fn cancel_echo(&mut self) {
        if self.pending.take().is_some() {
            debug!("penalty echo wait cancelled");
        }
    }

    /// Starts replaying a broadcast descriptor and releases the initiator if it is its own.
    /// Names are replayed as sent even when the angles disagree with them.
    pub fn replay(&mut self, group_id: GroupId, descriptor: PenaltySelectionDescriptor) {
        let is_own = self
            .pending
            .as_ref()
            .map(|p| p.group_id == group_id && p.digest == descriptor.digest())
            .unwrap_or(false);
        if is_own {
            if let Some(pending) = self.pending.take() {
                let _ = pending.reply.send(descriptor.clone());
            }
        }
        info!(
            group_id,
            participant = %descriptor.participant,
            penalty = ?descriptor.penalty,
            own = is_own,
            "replaying penalty selection"
        );
        self.phase = PenaltyPhase::start(group_id, descriptor);
    }

    pub fn advance(&mut self) -> &PenaltyPhase {
        self.phase = std::mem::take(&mut self.phase).advance();
        &self.phase
    }

    pub fn finish(&mut self) -> &PenaltyPhase {
        self.phase = std::mem::take(&mut self.phase).finish();
        &self.phase
    }

    pub fn dismiss(&mut self) {
        self.phase = PenaltyPhase::Idle;
    }
}
