//! TaskLane Media - FFmpeg integration for the pipeline's media stages
//!
//! This crate handles:
//! - Frame sampling into content-addressed image files
//! - Audio extraction for the speech model
//! - Media file probing

pub mod audio;
pub mod extract;
pub mod probe;

pub use audio::AudioExtractionJob;
pub use extract::{ExtractionJob, FfmpegFrameExtractor, FrameExtractor};
pub use probe::MediaProbe;

/// Whether an `ffmpeg` binary is reachable.
pub fn ffmpeg_available() -> bool {
    ffmpeg_sidecar::command::ffmpeg_is_installed()
}

/// Run `ffmpeg` with the given arguments to completion.
///
/// Error lines from ffmpeg's log are folded into the returned message when the
/// process exits unsuccessfully.
pub(crate) fn run_ffmpeg(args: &[String]) -> std::result::Result<(), String> {
    use ffmpeg_sidecar::command::FfmpegCommand;
    use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};

    tracing::debug!(args = ?args, "Spawning ffmpeg");

    let mut child = FfmpegCommand::new()
        .args(args)
        .spawn()
        .map_err(|e| format!("failed to spawn ffmpeg: {e}"))?;

    let mut errors = Vec::new();
    let events = child
        .iter()
        .map_err(|e| format!("failed to read ffmpeg output: {e}"))?;
    for event in events {
        match event {
            FfmpegEvent::Error(msg) | FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) => {
                tracing::debug!(error = %msg, "ffmpeg reported an error");
                errors.push(msg);
            }
            _ => {}
        }
    }

    let status = child
        .wait()
        .map_err(|e| format!("failed to wait for ffmpeg: {e}"))?;
    if !status.success() {
        let detail: String = errors.join("; ").chars().take(500).collect();
        return Err(format!("ffmpeg exited with status {status}: {detail}"));
    }
    Ok(())
}
