//! Frame sampling via FFmpeg.
//!
//! Frames are written as `{key}_frame_%04d.png` into the frames directory, so
//! repeated runs on the same input overwrite the same files.

use crate::probe::MediaProbe;
use std::path::{Path, PathBuf};
use tasklane_core::{FrameRef, Result, TaskLaneError};
use tracing::{debug, info, warn};

/// Turns a video into an ordered list of sampled frames.
pub trait FrameExtractor: Send + Sync {
    /// Sample `source` at `sampling_rate_hz` and return the frames in timeline order.
    ///
    /// Frame files are named after `key` and placed in `frames_dir`.
    fn extract(
        &self,
        source: &Path,
        sampling_rate_hz: f64,
        frames_dir: &Path,
        key: &str,
    ) -> Result<Vec<FrameRef>>;
}

/// A single frame-sampling invocation.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub source: PathBuf,
    pub frames_dir: PathBuf,
    pub key: String,
    pub sampling_rate_hz: f64,
}

impl ExtractionJob {
    pub fn new(
        source: impl Into<PathBuf>,
        frames_dir: impl Into<PathBuf>,
        key: impl Into<String>,
        sampling_rate_hz: f64,
    ) -> Self {
        Self {
            source: source.into(),
            frames_dir: frames_dir.into(),
            key: key.into(),
            sampling_rate_hz,
        }
    }

    /// Prefix shared by every frame file of this job.
    pub fn frame_prefix(&self) -> String {
        format!("{}_frame_", self.key)
    }

    /// Output pattern handed to ffmpeg.
    pub fn output_pattern(&self) -> PathBuf {
        self.frames_dir
            .join(format!("{}%04d.png", self.frame_prefix()))
    }

    /// Build the FFmpeg command arguments.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            self.source.to_string_lossy().into_owned(),
            "-vf".into(),
            format!("fps={}", self.sampling_rate_hz),
            "-vcodec".into(),
            "png".into(),
            self.output_pattern().to_string_lossy().into_owned(),
        ]
    }

    /// Remove frames left over from an earlier run with the same key.
    pub fn clear_stale_frames(&self) -> Result<usize> {
        let mut removed = 0;
        for (_, path) in self.list_frame_files()? {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, key = %self.key, "Removed stale frames");
        }
        Ok(removed)
    }

    /// Collect this job's frame files in timeline order.
    pub fn collect_frames(&self) -> Result<Vec<FrameRef>> {
        let files = self.list_frame_files()?;
        Ok(files
            .into_iter()
            .enumerate()
            .map(|(index, (_, path))| {
                FrameRef::new(index, path, index as f64 / self.sampling_rate_hz)
            })
            .collect())
    }

    /// Frame files matching this job's prefix, sorted by their numeric suffix.
    fn list_frame_files(&self) -> Result<Vec<(u64, PathBuf)>> {
        if !self.frames_dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = self.frame_prefix();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.frames_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(number) = rest.strip_suffix(".png") else {
                continue;
            };
            if let Ok(n) = number.parse::<u64>() {
                files.push((n, path));
            }
        }
        // Numeric sort; lexical order breaks past frame 9999.
        files.sort_by_key(|(n, _)| *n);
        Ok(files)
    }
}

/// [`FrameExtractor`] backed by the `ffmpeg` binary.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameExtractor;

impl FfmpegFrameExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FrameExtractor for FfmpegFrameExtractor {
    fn extract(
        &self,
        source: &Path,
        sampling_rate_hz: f64,
        frames_dir: &Path,
        key: &str,
    ) -> Result<Vec<FrameRef>> {
        if !(sampling_rate_hz > 0.0 && sampling_rate_hz.is_finite()) {
            return Err(TaskLaneError::InvalidParameter(format!(
                "sampling rate must be positive, got {sampling_rate_hz}"
            )));
        }

        match MediaProbe::probe(source) {
            Ok(probe) => ensure_has_video(&probe, sampling_rate_hz)?,
            Err(e) => warn!(error = %e, "Could not probe source video, extracting anyway"),
        }

        std::fs::create_dir_all(frames_dir)?;
        let job = ExtractionJob::new(source, frames_dir, key, sampling_rate_hz);
        job.clear_stale_frames()?;

        info!(
            source = %source.display(),
            fps = sampling_rate_hz,
            "Extracting frames"
        );
        crate::run_ffmpeg(&job.ffmpeg_args()).map_err(TaskLaneError::ExtractionFailed)?;

        let frames = job.collect_frames()?;
        info!(count = frames.len(), dir = %frames_dir.display(), "Frame extraction complete");
        Ok(frames)
    }
}

/// Reject sources the probe found no video stream in.
pub fn ensure_has_video(probe: &MediaProbe, sampling_rate_hz: f64) -> Result<()> {
    let Some(video) = probe.primary_video() else {
        return Err(TaskLaneError::ExtractionFailed(format!(
            "{} has no video stream",
            probe.path
        )));
    };
    info!(
        duration_secs = probe.duration_secs,
        codec = %video.codec,
        width = video.width,
        height = video.height,
        expected_frames = (probe.duration_secs * sampling_rate_hz).ceil() as u64,
        "Probed source video"
    );
    Ok(())
}
