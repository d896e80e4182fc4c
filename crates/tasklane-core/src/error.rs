//! Error types for TaskLane.

use crate::model::ModelRole;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for TaskLane operations.
///
/// Variants split into two families. Fatal errors abort a run at the stage
/// where they occur; the others are absorbed where they happen and only
/// surface as log lines or as data (tombstones, empty fields).
#[derive(Error, Debug)]
pub enum TaskLaneError {
    #[error("Source unreadable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Model unavailable for role {role}: {cause}")]
    ModelUnavailable { role: ModelRole, cause: String },

    #[error("Frame extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Snapshot corrupted for role {role}: {reason}")]
    SnapshotCorrupted { role: ModelRole, reason: String },

    #[error("Snapshot write failed for role {role}: {reason}")]
    SnapshotWriteFailed { role: ModelRole, reason: String },

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Text recognition degraded: {0}")]
    TextRecognitionDegraded(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl TaskLaneError {
    /// Whether this error must stop the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::SourceUnreadable { .. }
            | Self::ModelUnavailable { .. }
            | Self::ExtractionFailed(_)
            | Self::TranscriptionFailed(_)
            | Self::SynthesisFailed(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::InvalidParameter(_) => true,
            Self::SnapshotCorrupted { .. }
            | Self::SnapshotWriteFailed { .. }
            | Self::Detection(_)
            | Self::TextRecognitionDegraded(_) => false,
        }
    }
}

impl From<serde_json::Error> for TaskLaneError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for TaskLane operations.
pub type Result<T> = std::result::Result<T, TaskLaneError>;
