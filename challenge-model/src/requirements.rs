use crate::constants::{NORMAL_KEY_PREFIX, SEGMENT_KEY_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// The requirement model and the progress key contract. Every component that reads or writes
// completion state goes through `encode_progress_key` / `try_decode_progress_key`.

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct NormalItem {
    pub count: u32,
    #[serde(default)]
    pub difficulty: u32,
}

/// An ordered ("back-to-back") block of items. Index is 0-based internally.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Segment {
    pub length: u32,
    #[serde(default)]
    pub segment_difficulty: u32,
    #[serde(default)]
    pub group: BTreeMap<String, u32>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct RequirementModel {
    #[serde(default)]
    pub normal: BTreeMap<String, NormalItem>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgressKey {
    Normal {
        item: String,
        instance: u32,
    },
    Segment {
        segment: usize,
        item: String,
        instance: u32,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyDecodeError {
    #[error("unrecognized progress key prefix: {0:?}")]
    UnknownPrefix(String),
    #[error("progress key {0:?} has no instance index")]
    MissingInstance(String),
    #[error("progress key {0:?} has a malformed instance index")]
    BadInstance(String),
    #[error("progress key {0:?} has a malformed segment index")]
    BadSegment(String),
    #[error("progress key {0:?} has an empty item name")]
    EmptyItem(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequirementError {
    #[error("requirement item names must not be empty")]
    EmptyItemName,
    #[error("requirement {item:?} must have a positive count")]
    ZeroCount { item: String },
    #[error("segment {label} must have a positive length and at least one item")]
    EmptySegment { label: usize },
}

impl ProgressKey {
    pub fn normal(item: &str, instance: u32) -> Self {
        ProgressKey::Normal {
            item: item.to_string(),
            instance,
        }
    }

    pub fn segment(segment: usize, item: &str, instance: u32) -> Self {
        ProgressKey::Segment {
            segment,
            item: item.to_string(),
            instance,
        }
    }

    pub fn item(&self) -> &str {
        match self {
            ProgressKey::Normal { item, .. } | ProgressKey::Segment { item, .. } => item,
        }
    }

    pub fn instance(&self) -> u32 {
        match self {
            ProgressKey::Normal { instance, .. } | ProgressKey::Segment { instance, .. } => {
                *instance
            }
        }
    }
}

pub fn encode_progress_key(key: &ProgressKey) -> String {
    match key {
        ProgressKey::Normal { item, instance } => {
            format!("{}_{}_{}", NORMAL_KEY_PREFIX, item, instance)
        }
        ProgressKey::Segment {
            segment,
            item,
            instance,
        } => format!("{}_{}_{}_{}", SEGMENT_KEY_PREFIX, segment, item, instance),
    }
}

pub fn try_decode_progress_key(raw: &str) -> Result<ProgressKey, KeyDecodeError> {
    let (prefix, rest) = raw
        .split_once('_')
        .ok_or_else(|| KeyDecodeError::UnknownPrefix(raw.to_string()))?;
    match prefix {
        NORMAL_KEY_PREFIX => {
            let (item, instance) = split_instance(raw, rest)?;
            Ok(ProgressKey::Normal { item, instance })
        }
        SEGMENT_KEY_PREFIX => {
            let (segment, rest) = rest
                .split_once('_')
                .ok_or_else(|| KeyDecodeError::BadSegment(raw.to_string()))?;
            let segment = segment
                .parse::<usize>()
                .map_err(|_| KeyDecodeError::BadSegment(raw.to_string()))?;
            let (item, instance) = split_instance(raw, rest)?;
            Ok(ProgressKey::Segment {
                segment,
                item,
                instance,
            })
        }
        _ => Err(KeyDecodeError::UnknownPrefix(raw.to_string())),
    }
}

// Item names may contain underscores, so the instance index is taken from the right.
fn split_instance(raw: &str, rest: &str) -> Result<(String, u32), KeyDecodeError> {
    let (item, instance) = rest
        .rsplit_once('_')
        .ok_or_else(|| KeyDecodeError::MissingInstance(raw.to_string()))?;
    if item.is_empty() {
        return Err(KeyDecodeError::EmptyItem(raw.to_string()));
    }
    let instance = instance
        .parse::<u32>()
        .map_err(|_| KeyDecodeError::BadInstance(raw.to_string()))?;
    Ok((item.to_string(), instance))
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_progress_key(self))
    }
}

impl FromStr for ProgressKey {
    type Err = KeyDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        try_decode_progress_key(s)
    }
}

impl RequirementModel {
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Required count for the item a key points at, if the item exists.
    pub fn count_for(&self, key: &ProgressKey) -> Option<u32> {
        match key {
            ProgressKey::Normal { item, .. } => self.normal.get(item).map(|n| n.count),
            ProgressKey::Segment { segment, item, .. } => self
                .segments
                .get(*segment)
                .and_then(|s| s.group.get(item))
                .copied(),
        }
    }

    pub fn contains(&self, key: &ProgressKey) -> bool {
        self.count_for(key)
            .map(|count| key.instance() < count)
            .unwrap_or(false)
    }

    /// Decodes and checks a raw key in one step. Malformed keys are simply not contained.
    pub fn contains_raw(&self, raw: &str) -> bool {
        try_decode_progress_key(raw)
            .map(|key| self.contains(&key))
            .unwrap_or(false)
    }

    pub fn total(&self) -> u32 {
        let normal: u32 = self.normal.values().map(|n| n.count).sum();
        let segments: u32 = self
            .segments
            .iter()
            .map(|s| s.group.values().sum::<u32>())
            .sum();
        normal + segments
    }

    /// Every valid key, normal items first (by name), then segments in order.
    pub fn keys(&self) -> Vec<ProgressKey> {
        let mut keys = Vec::with_capacity(self.total() as usize);
        for (name, item) in &self.normal {
            for instance in 0..item.count {
                keys.push(ProgressKey::normal(name, instance));
            }
        }
        for (index, segment) in self.segments.iter().enumerate() {
            keys.extend(segment_keys(index, segment));
        }
        keys
    }

    pub fn validate(&self) -> Result<(), RequirementError> {
        for (name, item) in &self.normal {
            if name.trim().is_empty() {
                return Err(RequirementError::EmptyItemName);
            }
            if item.count == 0 {
                return Err(RequirementError::ZeroCount { item: name.clone() });
            }
        }
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.length == 0 || segment.group.is_empty() {
                return Err(RequirementError::EmptySegment { label: index + 1 });
            }
            for (name, count) in &segment.group {
                if name.trim().is_empty() {
                    return Err(RequirementError::EmptyItemName);
                }
                if *count == 0 {
                    return Err(RequirementError::ZeroCount { item: name.clone() });
                }
            }
        }
        Ok(())
    }
}

pub fn segment_keys(index: usize, segment: &Segment) -> Vec<ProgressKey> {
    segment
        .group
        .iter()
        .flat_map(|(name, count)| (0..*count).map(move |i| ProgressKey::segment(index, name, i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> RequirementModel {
        let mut normal = BTreeMap::new();
        normal.insert(
            "SpeedRun".to_string(),
            NormalItem {
                count: 2,
                difficulty: 3,
            },
        );
        let mut group = BTreeMap::new();
        group.insert("Boss_Rush".to_string(), 1);
        RequirementModel {
            normal,
            segments: vec![Segment {
                length: 1,
                segment_difficulty: 2,
                group,
            }],
        }
    }

    #[test]
    fn normal_key_matches_wire_format() {
        assert_eq!(
            encode_progress_key(&ProgressKey::normal("SpeedRun", 0)),
            "normal_SpeedRun_0"
        );
        assert_eq!(
            try_decode_progress_key("normal_SpeedRun_0").unwrap(),
            ProgressKey::normal("SpeedRun", 0)
        );
    }

    #[test]
    fn segment_key_keeps_underscores_in_item_name() {
        let key = try_decode_progress_key("b2b_3_Boss_Rush_12").unwrap();
        assert_eq!(key, ProgressKey::segment(3, "Boss_Rush", 12));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!(
            try_decode_progress_key("bingo_x_1"),
            Err(KeyDecodeError::UnknownPrefix(_))
        ));
        assert!(matches!(
            try_decode_progress_key("normal_SpeedRun"),
            Err(KeyDecodeError::BadInstance(_)) | Err(KeyDecodeError::MissingInstance(_))
        ));
        assert!(matches!(
            try_decode_progress_key("b2b_x_Item_0"),
            Err(KeyDecodeError::BadSegment(_))
        ));
        assert!(matches!(
            try_decode_progress_key("normal__0"),
            Err(KeyDecodeError::EmptyItem(_))
        ));
    }

    #[test]
    fn contains_enforces_instance_bound() {
        let model = sample();
        assert!(model.contains_raw("normal_SpeedRun_1"));
        assert!(!model.contains_raw("normal_SpeedRun_2"));
        assert!(model.contains_raw("b2b_0_Boss_Rush_0"));
        assert!(!model.contains_raw("b2b_1_Boss_Rush_0"));
        assert!(!model.contains_raw("normal_Unknown_0"));
    }

    #[test]
    fn keys_walk_normal_then_segments() {
        let keys: Vec<String> = sample().keys().iter().map(encode_progress_key).collect();
        assert_eq!(
            keys,
            vec!["normal_SpeedRun_0", "normal_SpeedRun_1", "b2b_0_Boss_Rush_0"]
        );
        assert_eq!(sample().total(), 3);
    }

    #[test]
    fn validate_rejects_empty_segments_and_zero_counts() {
        let mut model = sample();
        assert!(model.validate().is_ok());
        model.segments.push(Segment {
            length: 0,
            segment_difficulty: 0,
            group: BTreeMap::new(),
        });
        assert_eq!(
            model.validate(),
            Err(RequirementError::EmptySegment { label: 2 })
        );
        let mut model = sample();
        model.normal.get_mut("SpeedRun").unwrap().count = 0;
        assert!(matches!(
            model.validate(),
            Err(RequirementError::ZeroCount { .. })
        ));
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            item in "[A-Za-z][A-Za-z0-9_ ]{0,12}",
            segment in 0usize..50,
            instance in 0u32..1000,
            is_segment in any::<bool>(),
        ) {
            let key = if is_segment {
                ProgressKey::segment(segment, &item, instance)
            } else {
                ProgressKey::normal(&item, instance)
            };
            prop_assert_eq!(try_decode_progress_key(&encode_progress_key(&key)), Ok(key));
        }
    }
}
