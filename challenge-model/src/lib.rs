//! Data model shared by every challenge client: requirements and progress keys, progress
//! aggregation, the challenge timer, and the draw/replay helpers behind penalty wheels.
//!
//! Nothing here performs I/O; the sync crate owns mutation and transport.

pub mod catalog;
pub mod constants;
pub mod crypto;
pub mod descriptor;
pub mod progress;
pub mod requirements;
pub mod rng;
pub mod snapshot;
pub mod timer;
pub mod types;

pub use descriptor::PenaltySelectionDescriptor;
pub use progress::{compute_progress, segment_breakdown, ProgressSummary, SegmentProgress};
pub use requirements::{
    encode_progress_key, try_decode_progress_key, KeyDecodeError, NormalItem, ProgressKey,
    RequirementError, RequirementModel, Segment,
};
pub use snapshot::ChallengeSnapshot;
pub use timer::Timer;
pub use types::*;
