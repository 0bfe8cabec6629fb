use crate::constants::SEGMENT_LABEL;
use crate::requirements::{encode_progress_key, segment_keys, ProgressKey, RequirementModel};
use crate::types::ProgressMap;
use serde::{Deserialize, Serialize};

// Progress aggregation over the requirement model. Only keys the model enumerates are read, so
// inert keys in a progress map never count.

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct ProgressSummary {
    pub completed: u32,
    pub total: u32,
    pub percentage: u32,
}

impl ProgressSummary {
    fn from_counts(completed: u32, total: u32) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            // Any completed item shows as at least 1%, and only a full set shows 100%.
            let rounded = (100.0 * completed as f64 / total as f64).round() as u32;
            let ceiling = if completed < total { 99 } else { 100 };
            rounded.max(completed.min(1)).min(ceiling)
        };
        Self {
            completed,
            total,
            percentage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SegmentProgress {
    pub index: usize,
    pub label: String,
    pub summary: ProgressSummary,
}

pub fn compute_progress(requirements: &RequirementModel, progress: &ProgressMap) -> ProgressSummary {
    let mut completed = 0;
    let mut total = 0;
    for (name, item) in &requirements.normal {
        total += item.count;
        completed += (0..item.count)
            .filter(|i| is_done(progress, &ProgressKey::normal(name, *i)))
            .count() as u32;
    }
    for (index, segment) in requirements.segments.iter().enumerate() {
        let keys = segment_keys(index, segment);
        total += keys.len() as u32;
        completed += keys.iter().filter(|k| is_done(progress, k)).count() as u32;
    }
    ProgressSummary::from_counts(completed, total)
}

pub fn segment_breakdown(
    requirements: &RequirementModel,
    progress: &ProgressMap,
) -> Vec<SegmentProgress> {
    requirements
        .segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let keys = segment_keys(index, segment);
            let completed = keys.iter().filter(|k| is_done(progress, k)).count() as u32;
            SegmentProgress {
                index,
                label: segment_label(index),
                summary: ProgressSummary::from_counts(completed, keys.len() as u32),
            }
        })
        .collect()
}

/// User-facing label for a 0-based segment index.
pub fn segment_label(index: usize) -> String {
    format!("{} {}", SEGMENT_LABEL, index + 1)
}

fn is_done(progress: &ProgressMap, key: &ProgressKey) -> bool {
    progress
        .get(&encode_progress_key(key))
        .copied()
        .unwrap_or(false)
}
