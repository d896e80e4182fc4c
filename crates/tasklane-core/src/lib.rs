//! TaskLane Core - Foundation types for the video-to-SOP pipeline
//!
//! This crate provides the types shared by every pipeline stage:
//! - Content-addressed run identity (ContentIdentity)
//! - Frame references and per-frame analysis outcomes
//! - Transcript representation
//! - Model roles
//! - The error taxonomy (fatal vs. absorbed)

pub mod error;
pub mod frame;
pub mod identity;
pub mod model;
pub mod transcript;

pub use error::{Result, TaskLaneError};
pub use frame::{
    AnalysisBatchResult, BoundingBox, Detection, FailureReason, FrameAnalysis, FrameFailure,
    FrameOutcome, FrameRef, RecognizedText,
};
pub use identity::{compute_identity, sanitize_stem, ContentIdentity};
pub use model::ModelRole;
pub use transcript::{Transcript, TranscriptSegment};

/// Pipeline defaults shared by the library crates and the CLI.
pub mod defaults {
    /// Frames sampled per second of video.
    pub const SAMPLING_RATE_HZ: f64 = 1.0;

    /// Frames per analysis batch.
    pub const BATCH_SIZE: usize = 10;

    /// Upper bound on concurrently running frame tasks.
    pub const MAX_CONCURRENCY: usize = 4;

    /// Text fragments shorter than this many characters are treated as OCR noise.
    pub const MIN_TEXT_LEN: usize = 3;

    /// Per-frame analysis timeout in seconds.
    pub const FRAME_TIMEOUT_SECS: u64 = 120;

    /// Hex characters of the content digest used in artifact names.
    pub const DIGEST_PREFIX_LEN: usize = 16;
}
