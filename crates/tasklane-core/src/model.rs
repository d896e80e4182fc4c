//! Model roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A capability the pipeline needs, independent of the model that provides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelRole {
    /// Speech-to-text over the source audio.
    Transcription,
    /// Object detection plus text recognition over sampled frames.
    Vision,
}

impl ModelRole {
    /// Every role the pipeline loads.
    pub const ALL: [ModelRole; 2] = [ModelRole::Transcription, ModelRole::Vision];

    /// Stable tag used in logs and snapshot filenames.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Vision => "detection+text-recognition",
        }
    }

    /// Filesystem-safe snapshot name.
    pub fn snapshot_name(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription.snapshot.json",
            Self::Vision => "vision.snapshot.json",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
