//! Audio extraction for the speech model.
//!
//! whisper.cpp wants 16 kHz mono PCM, so the source track is resampled into a
//! WAV file next to the other run artifacts.

use std::path::{Path, PathBuf};
use tasklane_core::{Result, TaskLaneError};
use tracing::info;

/// Sample rate expected by the speech model.
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;

/// Extract the audio track of `source` into `output` as 16 kHz mono WAV.
#[derive(Debug, Clone)]
pub struct AudioExtractionJob {
    pub source: PathBuf,
    pub output: PathBuf,
}

impl AudioExtractionJob {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
        }
    }

    /// Build the FFmpeg command arguments.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            self.source.to_string_lossy().into_owned(),
            "-vn".into(),
            "-ac".into(),
            "1".into(),
            "-ar".into(),
            SPEECH_SAMPLE_RATE.to_string(),
            "-c:a".into(),
            "pcm_s16le".into(),
            self.output.to_string_lossy().into_owned(),
        ]
    }

    /// Run the extraction, returning the WAV path.
    pub fn run(&self) -> Result<&Path> {
        if let Some(parent) = self.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(
            source = %self.source.display(),
            output = %self.output.display(),
            "Extracting audio for transcription"
        );
        crate::run_ffmpeg(&self.ffmpeg_args()).map_err(|e| {
            TaskLaneError::TranscriptionFailed(format!("audio extraction failed: {e}"))
        })?;
        Ok(&self.output)
    }
}
