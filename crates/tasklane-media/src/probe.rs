//! Media file probing to get metadata without full decode.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use tasklane_core::{Result, TaskLaneError};

/// Information about a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProbe {
    /// File path
    pub path: String,
    /// Duration in seconds (0 when unknown)
    pub duration_secs: f64,
    /// Container format
    pub format: String,
    /// Video streams
    pub video_streams: Vec<VideoStreamInfo>,
    /// Number of audio streams
    pub audio_stream_count: usize,
}

/// Information about a video stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
}

impl MediaProbe {
    /// Probe a media file with `ffprobe`.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        if !path.exists() {
            return Err(TaskLaneError::SourceUnreadable {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }

        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TaskLaneError::ExtractionFailed(format!("Failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TaskLaneError::ExtractionFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.chars().take(500).collect::<String>()
            )));
        }

        Self::from_ffprobe_json(&path_str, &String::from_utf8_lossy(&output.stdout))
    }

    /// Parse `ffprobe -print_format json -show_format -show_streams` output.
    pub fn from_ffprobe_json(path: &str, json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;

        let format = value.get("format");
        let duration_secs = format
            .and_then(|f| f.get("duration"))
            .and_then(|d| d.as_str())
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);
        let format_name = format
            .and_then(|f| f.get("format_name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();

        let mut video_streams = Vec::new();
        let mut audio_stream_count = 0;
        let streams = value
            .get("streams")
            .and_then(|s| s.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();

        for stream in streams {
            match stream.get("codec_type").and_then(|t| t.as_str()) {
                Some("video") => video_streams.push(VideoStreamInfo {
                    index: stream.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize,
                    codec: stream
                        .get("codec_name")
                        .and_then(|c| c.as_str())
                        .unwrap_or("unknown")
                        .to_string(),
                    width: stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32,
                    height: stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32,
                }),
                Some("audio") => audio_stream_count += 1,
                _ => {}
            }
        }

        Ok(Self {
            path: path.to_string(),
            duration_secs,
            format: format_name,
            video_streams,
            audio_stream_count,
        })
    }

    /// Check if the file has video.
    pub fn has_video(&self) -> bool {
        !self.video_streams.is_empty()
    }

    /// Check if the file has audio.
    pub fn has_audio(&self) -> bool {
        self.audio_stream_count > 0
    }

    /// Get the primary video stream info.
    pub fn primary_video(&self) -> Option<&VideoStreamInfo> {
        self.video_streams.first()
    }
}
