//! Application configuration.
//!
//! Values come from command-line flags, falling back to environment
//! variables (a `.env` file is loaded into the environment first), then to
//! built-in defaults.

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tasklane_ai::{
    AnalysisConfig, ArtifactStore, ChatCompletionsSynthesizer, FsSnapshotStore, KeepArtifacts,
    ModelCache, NullSnapshotStore, PipelineConfig, PipelineOrchestrator, SidecarVisionProvider,
    SnapshotStore, SynthesisConfig, TombstonePolicy, TranscriberConfig, VisionConfig,
    WhisperProvider,
};
use tasklane_core::defaults;
use tasklane_media::FfmpegFrameExtractor;

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory scanned by `batch` when no directory is given
    #[arg(long, env = "TASKLANE_INPUT_DIR", default_value = "input_videos", global = true)]
    pub input_dir: PathBuf,

    /// Root directory for transcripts, frames, analyses and SOPs
    #[arg(long, env = "TASKLANE_OUTPUT_DIR", default_value = "output", global = true)]
    pub output_dir: PathBuf,

    /// API key for the chat-completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Chat-completions endpoint
    #[arg(
        long,
        env = "OPENAI_API_URL",
        default_value = "https://api.openai.com/v1/chat/completions",
        global = true
    )]
    pub api_url: String,

    /// Model used to write the SOP
    #[arg(long, env = "SOP_MODEL", default_value = "gpt-4o", global = true)]
    pub sop_model: String,

    /// whisper.cpp weights file
    #[arg(
        long,
        env = "WHISPER_MODEL",
        default_value = "models/ggml-base.en.bin",
        global = true
    )]
    pub whisper_model: PathBuf,

    /// whisper.cpp binary (searched on PATH when omitted)
    #[arg(long, env = "WHISPER_BINARY", global = true)]
    pub whisper_binary: Option<PathBuf>,

    /// Expected SHA-256 of the whisper weights
    #[arg(long, env = "WHISPER_MODEL_SHA256", global = true)]
    pub whisper_sha256: Option<String>,

    /// Transcription language (auto-detected when omitted)
    #[arg(long, env = "WHISPER_LANGUAGE", global = true)]
    pub language: Option<String>,

    /// Object detector command; the frame path is appended as the last argument
    #[arg(long, env = "DETECTOR_COMMAND", global = true)]
    pub detector_command: Option<String>,

    /// Tesseract binary
    #[arg(long, env = "TESSERACT_BINARY", default_value = "tesseract", global = true)]
    pub tesseract_binary: PathBuf,

    /// Frames sampled per second of video
    #[arg(
        long,
        env = "FRAME_EXTRACTION_FPS",
        default_value_t = defaults::SAMPLING_RATE_HZ,
        global = true
    )]
    pub fps: f64,

    /// Frames per analysis batch
    #[arg(
        long,
        env = "TASKLANE_BATCH_SIZE",
        default_value_t = defaults::BATCH_SIZE,
        global = true
    )]
    pub batch_size: usize,

    /// Frames analyzed at the same time
    #[arg(
        long,
        env = "TASKLANE_MAX_CONCURRENCY",
        default_value_t = defaults::MAX_CONCURRENCY,
        global = true
    )]
    pub max_concurrency: usize,

    /// Per-frame analysis timeout in seconds (0 disables)
    #[arg(
        long,
        env = "TASKLANE_FRAME_TIMEOUT_SECS",
        default_value_t = defaults::FRAME_TIMEOUT_SECS,
        global = true
    )]
    pub frame_timeout_secs: u64,

    /// Directory for model snapshots
    #[arg(long, env = "TASKLANE_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Do not read or write model snapshots
    #[arg(long, global = true)]
    pub no_model_cache: bool,

    /// Tell the SOP writer which frames could not be analyzed
    #[arg(long, global = true)]
    pub keep_tombstones: bool,

    /// Do not keep the transcript file
    #[arg(long, global = true)]
    pub discard_transcript: bool,

    /// Delete extracted frames after analysis
    #[arg(long, global = true)]
    pub discard_frames: bool,

    /// Do not keep the frame analysis file
    #[arg(long, global = true)]
    pub discard_analysis: bool,

    /// Do not write the run summary
    #[arg(long, global = true)]
    pub discard_summary: bool,
}

/// Resolved configuration for every pipeline component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub snapshot_dir: Option<PathBuf>,
    pub transcriber: TranscriberConfig,
    pub vision: VisionConfig,
    pub synthesis: SynthesisConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let transcriber = TranscriberConfig {
            whisper_binary: settings
                .whisper_binary
                .clone()
                .unwrap_or_else(TranscriberConfig::find_whisper_binary),
            model_path: settings.whisper_model.clone(),
            language: settings.language.clone(),
            expected_sha256: settings.whisper_sha256.clone(),
            ..TranscriberConfig::default()
        };

        let vision = VisionConfig {
            detector_command: settings
                .detector_command
                .clone()
                .filter(|c| !c.trim().is_empty()),
            tesseract_binary: settings.tesseract_binary.clone(),
            ..VisionConfig::default()
        };

        let synthesis = SynthesisConfig {
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            model: settings.sop_model.clone(),
            ..SynthesisConfig::default()
        };

        let pipeline = PipelineConfig {
            sampling_rate_hz: settings.fps,
            analysis: AnalysisConfig {
                batch_size: settings.batch_size,
                max_concurrency: settings.max_concurrency,
                task_timeout: (settings.frame_timeout_secs > 0)
                    .then(|| Duration::from_secs(settings.frame_timeout_secs)),
                ..AnalysisConfig::default()
            },
            tombstone_policy: if settings.keep_tombstones {
                TombstonePolicy::Keep
            } else {
                TombstonePolicy::Drop
            },
            keep: KeepArtifacts {
                transcript: !settings.discard_transcript,
                frames: !settings.discard_frames,
                analysis: !settings.discard_analysis,
                summary: !settings.discard_summary,
            },
        };

        let snapshot_dir = if settings.no_model_cache {
            None
        } else {
            Some(
                settings
                    .cache_dir
                    .clone()
                    .unwrap_or_else(|| FsSnapshotStore::default_location().dir().to_path_buf()),
            )
        };

        Self {
            input_dir: settings.input_dir.clone(),
            output_dir: settings.output_dir.clone(),
            snapshot_dir,
            transcriber,
            vision,
            synthesis,
            pipeline,
        }
    }

    pub fn api_key_configured(&self) -> bool {
        !self.synthesis.api_key.trim().is_empty()
    }

    /// Model cache with both providers registered.
    pub fn model_cache(&self) -> ModelCache {
        let store: Arc<dyn SnapshotStore> = match &self.snapshot_dir {
            Some(dir) => Arc::new(FsSnapshotStore::new(dir)),
            None => Arc::new(NullSnapshotStore),
        };
        ModelCache::new(store)
            .with_provider(Arc::new(WhisperProvider::new(self.transcriber.clone())))
            .with_provider(Arc::new(SidecarVisionProvider::new(self.vision.clone())))
    }

    /// Wire up a pipeline with the production collaborators.
    pub fn orchestrator(&self) -> Result<PipelineOrchestrator> {
        let synthesizer = ChatCompletionsSynthesizer::new(self.synthesis.clone())
            .context("SOP synthesizer is not configured (set OPENAI_API_KEY)")?;
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(self.model_cache()),
            Arc::new(FfmpegFrameExtractor::new()),
            Arc::new(synthesizer),
            ArtifactStore::new(&self.output_dir),
            self.pipeline.clone(),
        )
        .context("Invalid pipeline settings")?;
        Ok(orchestrator)
    }
}
