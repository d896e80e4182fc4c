//! Speech transcript representation.

use serde::{Deserialize, Serialize};

/// A timed span of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    pub text: String,
}

/// A complete transcript of the source audio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
    /// Full text as reported by the transcriber.
    pub text: String,
    /// Detected or requested language code.
    #[serde(default)]
    pub language: Option<String>,
}

impl Transcript {
    /// Build a transcript from segments, deriving `text` by joining them.
    pub fn from_segments(segments: Vec<TranscriptSegment>, language: Option<String>) -> Self {
        let text = join_segments(&segments);
        Self {
            segments,
            text,
            language,
        }
    }

    /// Plain text for prompting: segment texts joined with spaces, or the
    /// top-level `text` when there are no segments.
    pub fn plain_text(&self) -> String {
        if self.segments.is_empty() {
            self.text.trim().to_string()
        } else {
            join_segments(&self.segments)
        }
    }

    /// End time of the last segment, in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.segments.iter().map(|s| s.end).fold(0.0, f64::max)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.text.trim().is_empty()
    }
}

fn join_segments(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
