//! Frame references and per-frame analysis outcomes.
//!
//! A frame flows through the pipeline as a [`FrameRef`] (where it lives on disk
//! and where it sits on the video timeline) and comes back from analysis as a
//! [`FrameOutcome`]: either a [`FrameAnalysis`] or a [`FrameFailure`] tombstone.
//! Outcomes are plain data and are never mutated after the engine returns them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A sampled frame, in extraction order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRef {
    /// Position on the sampled timeline (0-based).
    pub index: usize,
    /// Image file holding the frame.
    pub location: PathBuf,
    /// Presentation time of the frame in seconds.
    pub timestamp_secs: f64,
}

impl FrameRef {
    /// Create a frame reference.
    pub fn new(index: usize, location: impl Into<PathBuf>, timestamp_secs: f64) -> Self {
        Self {
            index,
            location: location.into(),
            timestamp_secs,
        }
    }

    /// File name of the frame, for reports.
    pub fn name(&self) -> String {
        self.location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("frame_{:04}", self.index))
    }
}

/// Axis-aligned box in pixel coordinates, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Box area in square pixels.
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).abs() * (self.y2 - self.y1).abs()
    }
}

/// A detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label (e.g. "person", "laptop").
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Location within the frame.
    pub bounding_box: BoundingBox,
}

/// A line of recognized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

/// Successful analysis of one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub index: usize,
    /// Frame file name.
    pub frame: String,
    pub timestamp_secs: f64,
    pub detections: Vec<Detection>,
    /// Recognized text with noise fragments removed.
    pub text_fragments: Vec<String>,
    /// True when text recognition failed and `text_fragments` was left empty.
    #[serde(default)]
    pub text_degraded: bool,
}

/// Why a frame could not be analyzed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The frame file is missing or unreadable.
    MissingFrame(String),
    /// The detection step returned an error.
    Detection(String),
    /// The task exceeded its time budget.
    Timeout { secs: f64 },
    /// The task died unexpectedly (panic, cancelled worker).
    Unexpected(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFrame(d) => write!(f, "missing frame: {d}"),
            Self::Detection(d) => write!(f, "detection failed: {d}"),
            Self::Timeout { secs } => write!(f, "timed out after {secs:.1}s"),
            Self::Unexpected(d) => write!(f, "unexpected failure: {d}"),
        }
    }
}

/// Tombstone for a frame whose analysis failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameFailure {
    pub index: usize,
    pub frame: String,
    pub reason: FailureReason,
}

/// Result of analyzing one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FrameOutcome {
    Analyzed(FrameAnalysis),
    Failed(FrameFailure),
}

impl FrameOutcome {
    /// Timeline index of the frame this outcome belongs to.
    pub fn index(&self) -> usize {
        match self {
            Self::Analyzed(a) => a.index,
            Self::Failed(f) => f.index,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn as_analysis(&self) -> Option<&FrameAnalysis> {
        match self {
            Self::Analyzed(a) => Some(a),
            Self::Failed(_) => None,
        }
    }

    pub fn as_failure(&self) -> Option<&FrameFailure> {
        match self {
            Self::Analyzed(_) => None,
            Self::Failed(f) => Some(f),
        }
    }
}

/// Ordered outcomes of an analysis pass.
///
/// Always sorted by frame index, regardless of the order in which the
/// underlying tasks completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBatchResult {
    outcomes: Vec<FrameOutcome>,
}

impl AnalysisBatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one batch worth of outcomes, restoring index order first.
    pub fn extend_batch(&mut self, mut batch: Vec<FrameOutcome>) {
        batch.sort_by_key(FrameOutcome::index);
        self.outcomes.extend(batch);
    }

    pub fn outcomes(&self) -> &[FrameOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Successful analyses in index order.
    pub fn successes(&self) -> impl Iterator<Item = &FrameAnalysis> {
        self.outcomes.iter().filter_map(FrameOutcome::as_analysis)
    }

    /// Tombstones in index order.
    pub fn failures(&self) -> impl Iterator<Item = &FrameFailure> {
        self.outcomes.iter().filter_map(FrameOutcome::as_failure)
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Copy of this result with tombstones removed.
    pub fn without_failures(&self) -> Self {
        Self {
            outcomes: self
                .outcomes
                .iter()
                .filter(|o| !o.is_failure())
                .cloned()
                .collect(),
        }
    }
}
