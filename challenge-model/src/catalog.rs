use crate::requirements::{NormalItem, RequirementModel, Segment};
use crate::types::PenaltyEntry;
use std::collections::BTreeMap;

// Built-in penalty source and a starter requirement model. Kept separate so balance tweaks stay
// isolated from the engine.

pub fn build_penalty_catalog() -> Vec<PenaltyEntry> {
    let mut penalties = Vec::new();
    penalties.extend(light());
    penalties.extend(medium());
    penalties.extend(heavy());
    penalties
}

fn light() -> Vec<PenaltyEntry> {
    vec![
        PenaltyEntry::new("Swap Controller Hand", "Play with your off hand", 0.20),
        PenaltyEntry::new("No Minimap", "Hide the minimap", 0.20),
    ]
}

fn medium() -> Vec<PenaltyEntry> {
    vec![
        PenaltyEntry::new("Push-ups", "Ten of them, right now", 0.15),
        PenaltyEntry::new("Muted Audio", "Turn the game sound off", 0.15),
        PenaltyEntry::new("Inverted Camera", "Invert the camera axis", 0.10),
    ]
}

fn heavy() -> Vec<PenaltyEntry> {
    vec![
        PenaltyEntry::new("Restart Item", "Reset the current item", 0.10),
        PenaltyEntry::new("Blindfold Run", "First minute with eyes closed", 0.10),
    ]
}

/// Small model used when a local challenge is created without its own requirements.
pub fn starter_requirements() -> RequirementModel {
    let normal: BTreeMap<String, NormalItem> = [("SpeedRun", 1, 3), ("Collectible", 3, 1)]
        .iter()
        .map(|(name, count, difficulty)| {
            (
                name.to_string(),
                NormalItem {
                    count: *count,
                    difficulty: *difficulty,
                },
            )
        })
        .collect();
    let mut group = BTreeMap::new();
    group.insert("Boss".to_string(), 2);
    RequirementModel {
        normal,
        segments: vec![Segment {
            length: 2,
            segment_difficulty: 2,
            group,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_weights_sum_to_one() {
        let total: f64 = build_penalty_catalog().iter().map(|p| p.probability).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn starter_requirements_are_valid() {
        let model = starter_requirements();
        assert!(model.validate().is_ok());
        assert_eq!(model.total(), 6);
    }
}
