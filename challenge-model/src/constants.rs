// Shared tuning constants. Both the model and the sync session read these so limits agree on
// every client.
pub const NORMAL_KEY_PREFIX: &str = "normal";
pub const SEGMENT_KEY_PREFIX: &str = "b2b";
pub const SEGMENT_LABEL: &str = "Segment";

pub const MAX_GROUP_NAME_LEN: usize = 64;
pub const MAX_PLAYER_NAME_LEN: usize = 32;
pub const MAX_PENALTY_TEXT_LEN: usize = 512;
pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_PENALTY_DURATION_SECONDS: u64 = 24 * 60 * 60;

pub const WHEEL_DEGREES: f64 = 360.0;
pub const WHEEL_OFFSET_MIN: f64 = 0.1;
pub const WHEEL_OFFSET_MAX: f64 = 0.9;

pub const PARTICIPANT_FALLBACK: &str = "Participant";
pub const PLAYER_PLACEHOLDER: &str = "Player";
pub const LOCAL_GROUP_NAME: &str = "Local";
