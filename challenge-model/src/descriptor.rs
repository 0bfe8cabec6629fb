use crate::crypto::digest_json;
use crate::rng::segment_at_angle;
use crate::types::PenaltyEntry;
use serde::{Deserialize, Serialize};

// The replicated outcome of one penalty resolution. Observers never draw; they replay the
// names and stop angles carried here.

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PenaltySelectionDescriptor {
    pub participant: String,
    #[serde(default)]
    pub participant_pool: Vec<String>,
    pub participant_pick_angle: f64,
    /// `None` for a "no penalty" resolution.
    #[serde(default)]
    pub penalty: Option<String>,
    #[serde(default)]
    pub penalty_pool: Vec<PenaltyEntry>,
    #[serde(default)]
    pub penalty_pick_angle: Option<f64>,
}

impl PenaltySelectionDescriptor {
    pub fn has_penalty(&self) -> bool {
        self.penalty.is_some()
    }

    /// Whether a participant wheel is worth showing at all.
    pub fn has_participant_wheel(&self) -> bool {
        self.participant_pool.len() > 1
    }

    pub fn penalty_entry(&self) -> Option<&PenaltyEntry> {
        let name = self.penalty.as_ref()?;
        self.penalty_pool.iter().find(|e| &e.name == name)
    }

    /// Text stored on the target group once the resolution completes.
    pub fn result_text(&self) -> String {
        let Some(name) = self.penalty.as_ref() else {
            return String::new();
        };
        let description = self
            .penalty_entry()
            .map(|e| e.description.trim())
            .unwrap_or_default();
        if description.is_empty() {
            format!("{} receives penalty: {}", self.participant, name)
        } else {
            format!(
                "{} receives penalty: {} ({})",
                self.participant, name, description
            )
        }
    }

    /// Checks that each angle lands on the entry it names. Empty pools carry no geometry and are
    /// accepted as-is.
    pub fn is_consistent(&self) -> bool {
        let participant_ok = self.participant_pool.is_empty()
            || segment_at_angle(self.participant_pick_angle, self.participant_pool.len())
                .and_then(|i| self.participant_pool.get(i))
                .map(|name| name == &self.participant)
                .unwrap_or(false);
        let penalty_ok = match (&self.penalty, self.penalty_pick_angle) {
            (None, _) => true,
            (Some(_), _) if self.penalty_pool.is_empty() => true,
            (Some(name), Some(angle)) => segment_at_angle(angle, self.penalty_pool.len())
                .and_then(|i| self.penalty_pool.get(i))
                .map(|entry| &entry.name == name)
                .unwrap_or(false),
            (Some(_), None) => false,
        };
        participant_ok && penalty_ok
    }

    pub fn digest(&self) -> String {
        digest_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replayed() -> PenaltySelectionDescriptor {
        PenaltySelectionDescriptor {
            participant: "Alex".into(),
            participant_pool: vec![],
            participant_pick_angle: 42.0,
            penalty: Some("Push-ups".into()),
            penalty_pool: vec![],
            penalty_pick_angle: Some(210.5),
        }
    }

    #[test]
    fn result_text_without_description() {
        assert_eq!(replayed().result_text(), "Alex receives penalty: Push-ups");
    }

    #[test]
    fn result_text_appends_description_from_pool() {
        let mut d = replayed();
        d.penalty_pool = vec![
            PenaltyEntry::new("Squats", "", 0.5),
            PenaltyEntry::new("Push-ups", "Ten of them", 0.5),
        ];
        assert_eq!(
            d.result_text(),
            "Alex receives penalty: Push-ups (Ten of them)"
        );
        assert!(d.is_consistent());
    }

    #[test]
    fn no_penalty_yields_empty_text() {
        let mut d = replayed();
        d.penalty = None;
        d.penalty_pick_angle = None;
        assert_eq!(d.result_text(), "");
        assert!(d.is_consistent());
    }

    #[test]
    fn mismatched_angle_is_inconsistent() {
        let mut d = replayed();
        d.participant_pool = vec!["Alex".into(), "Sam".into()];
        d.participant_pick_angle = 270.0;
        assert!(!d.is_consistent());
        d.participant_pick_angle = 42.0;
        assert!(d.is_consistent());
    }
}
