//! Subcommand implementations.

use crate::config::AppConfig;
use anyhow::{bail, Context as _, Result};
use std::path::{Path, PathBuf};
use tasklane_ai::{PipelineOrchestrator, PipelineProgress, PipelineRun, PipelineStage};
use tracing::{error, info};

/// Extensions picked up by directory batch mode.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi", "mkv"];

/// Whether `path` has a supported video extension (any case).
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Videos directly inside `dir`, sorted by path.
pub fn find_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_video(&path) {
            videos.push(path);
        }
    }
    videos.sort();
    Ok(videos)
}

/// Prints a line per stage transition.
fn progress_printer() -> impl FnMut(PipelineProgress) {
    let mut last_stage = None;
    move |p: PipelineProgress| {
        if last_stage != Some(p.stage) || p.stage == PipelineStage::Analyzed {
            eprintln!("[{:>3.0}%] {}", p.overall_progress * 100.0, p.message);
            last_stage = Some(p.stage);
        }
    }
}

fn report(run: &PipelineRun) {
    let failed = run.analysis.failure_count();
    println!("SOP:        {}", run.artifacts.sop.display());
    println!("Identity:   {}", run.identity.key());
    println!(
        "Frames:     {} extracted, {} analyzed, {} failed",
        run.frames.len(),
        run.analysis.success_count(),
        failed
    );
    println!("Steps:      {}", run.steps.len());
    println!("Time:       {:.1}s", run.total_secs());
}

/// Process a single video.
pub async fn run_video(config: &AppConfig, video: &Path) -> Result<()> {
    let orchestrator = config.orchestrator()?;
    let run = orchestrator
        .run_with_progress(video, progress_printer())
        .await
        .with_context(|| format!("Failed to process {}", video.display()))?;
    report(&run);
    Ok(())
}

/// Process every video in a directory, one after another.
///
/// A failed video is reported and the rest still run.
pub async fn run_batch(config: &AppConfig, dir: Option<&Path>) -> Result<()> {
    let dir = dir.unwrap_or(&config.input_dir);
    let videos = find_videos(dir)?;
    if videos.is_empty() {
        println!("No videos found in {}", dir.display());
        return Ok(());
    }

    let orchestrator: PipelineOrchestrator = config.orchestrator()?;
    info!(count = videos.len(), dir = %dir.display(), "Processing directory");

    let mut failed = Vec::new();
    for (i, video) in videos.iter().enumerate() {
        println!("\n[{}/{}] {}", i + 1, videos.len(), video.display());
        match orchestrator
            .run_with_progress(video, progress_printer())
            .await
        {
            Ok(run) => report(&run),
            Err(e) => {
                error!(
                    video = %video.display(),
                    stage = %e.stage,
                    error = %e.source,
                    "Video failed"
                );
                println!("FAILED during {}: {}", e.stage, e.source);
                failed.push(video.clone());
            }
        }
    }

    println!(
        "\nProcessed {} videos: {} succeeded, {} failed",
        videos.len(),
        videos.len() - failed.len(),
        failed.len()
    );
    if !failed.is_empty() {
        bail!("{} of {} videos failed", failed.len(), videos.len());
    }
    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "MISSING"
    }
}

fn binary_present(binary: &Path) -> bool {
    binary.is_file() || which::which(binary).is_ok()
}

/// Report which tools, models and directories are available.
pub fn check_setup(config: &AppConfig) -> Result<()> {
    let ffmpeg = tasklane_media::ffmpeg_available();
    let whisper = binary_present(&config.transcriber.whisper_binary);
    let weights = config.transcriber.model_path.is_file();
    let tesseract = binary_present(&config.vision.tesseract_binary);
    let detector = config
        .vision
        .detector_command
        .as_deref()
        .and_then(|cmd| cmd.split_whitespace().next())
        .map(|program| binary_present(Path::new(program)));
    let api_key = config.api_key_configured();

    println!("Tools");
    println!("  ffmpeg:          {}", mark(ffmpeg));
    println!(
        "  whisper:         {} ({})",
        mark(whisper),
        config.transcriber.whisper_binary.display()
    );
    println!(
        "  whisper weights: {} ({})",
        mark(weights),
        config.transcriber.model_path.display()
    );
    println!(
        "  tesseract:       {} ({})",
        mark(tesseract),
        config.vision.tesseract_binary.display()
    );
    match detector {
        Some(present) => println!("  detector:        {}", mark(present)),
        None => println!("  detector:        not configured (text only)"),
    }
    println!("  API key:         {}", if api_key { "set" } else { "MISSING" });

    println!("Directories");
    let input_exists = config.input_dir.is_dir();
    println!(
        "  input:  {} ({})",
        mark(input_exists),
        config.input_dir.display()
    );
    println!(
        "  output: {} ({})",
        if config.output_dir.is_dir() {
            "ok"
        } else {
            "will be created"
        },
        config.output_dir.display()
    );
    match &config.snapshot_dir {
        Some(dir) => println!("  model snapshots: {}", dir.display()),
        None => println!("  model snapshots: disabled"),
    }
    if input_exists {
        let count = find_videos(&config.input_dir)?.len();
        println!("  videos in input: {count}");
    }

    let ready = ffmpeg && whisper && weights && tesseract && api_key;
    println!();
    if ready {
        println!("Setup looks good.");
    } else {
        println!("Setup incomplete; see MISSING entries above.");
    }
    Ok(())
}
