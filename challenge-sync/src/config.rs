use challenge_model::catalog::build_penalty_catalog;
use challenge_model::{Challenge, PenaltyEntry};
use serde::{Deserialize, Serialize};

// Per-session settings. Everything is defaulted so an empty JSON object is a valid config.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Room ids are `{room_prefix}-{challenge_id}`.
    pub room_prefix: String,
    /// Join the only group of a single-group challenge on load when capacity remains.
    pub auto_join: bool,
    /// Fixed seed for reproducible draws. Unset draws from the thread RNG once per session.
    pub rng_seed: Option<u64>,
    /// Overrides the built-in penalty catalog when the challenge carries no penalties.
    pub penalty_catalog: Option<Vec<PenaltyEntry>>,
    /// Fetch a full snapshot after every channel (re)connect.
    pub resync_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room_prefix: "challenge".to_string(),
            auto_join: true,
            rng_seed: None,
            penalty_catalog: None,
            resync_on_connect: true,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn room_id(&self, challenge_id: &str) -> String {
        format!("{}-{}", self.room_prefix, challenge_id)
    }

    /// Penalty source in priority order: the challenge's own list, the configured catalog,
    /// then the built-in catalog.
    pub fn penalty_source(&self, challenge: &Challenge) -> Vec<PenaltyEntry> {
        if !challenge.penalties.is_empty() {
            return challenge.penalties.clone();
        }
        self.penalty_catalog
            .clone()
            .unwrap_or_else(build_penalty_catalog)
    }
}
