//! Video-to-SOP pipeline orchestration.
//!
//! Stages run strictly in order:
//! 1. Content identity (SHA-256 of the input)
//! 2. Model loading (both roles in parallel, through the model cache)
//! 3. Audio transcription
//! 4. Frame extraction
//! 5. Frame analysis (batched, concurrent, tombstones for failed frames)
//! 6. SOP synthesis
//! 7. Persistence
//!
//! Any fatal error stops the run and is reported with the stage it happened
//! in. Frame failures are never fatal. Artifacts written before a failure are
//! left in place.
//!
//! Reports progress through a callback so a CLI can display a progress bar.

use crate::analysis::{AnalysisConfig, FrameAnalysisEngine};
use crate::artifact_store::{AnalysisArtifact, ArtifactStore};
use crate::error::{AtStage, PipelineError, PipelineResult};
use crate::model_cache::ModelCache;
use crate::synthesis::{extract_steps, NarrativeSynthesizer, SopStep, VisualSummary};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tasklane_core::{
    compute_identity, defaults, AnalysisBatchResult, ContentIdentity, FrameRef, ModelRole, Result,
    TaskLaneError, Transcript,
};
use tasklane_media::FrameExtractor;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pipeline stages. Each names the state reached once its work is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Init,
    IdentityComputed,
    ModelsReady,
    Transcribed,
    FramesExtracted,
    Analyzed,
    Synthesized,
    Persisted,
    Done,
}

impl PipelineStage {
    /// Display name for the work leading to this stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Init => "Preparing output",
            Self::IdentityComputed => "Computing content identity",
            Self::ModelsReady => "Loading models",
            Self::Transcribed => "Transcribing audio",
            Self::FramesExtracted => "Extracting frames",
            Self::Analyzed => "Analyzing frames",
            Self::Synthesized => "Synthesizing SOP",
            Self::Persisted => "Saving artifacts",
            Self::Done => "Done",
        }
    }

    /// Weight of this stage in overall progress (out of 100).
    fn weight(&self) -> f32 {
        match self {
            Self::Init => 0.0,
            Self::IdentityComputed => 5.0,
            Self::ModelsReady => 10.0,
            Self::Transcribed => 25.0,
            Self::FramesExtracted => 10.0,
            Self::Analyzed => 30.0,
            Self::Synthesized => 15.0,
            Self::Persisted => 5.0,
            Self::Done => 0.0,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "initialization",
            Self::IdentityComputed => "identity computation",
            Self::ModelsReady => "model loading",
            Self::Transcribed => "transcription",
            Self::FramesExtracted => "frame extraction",
            Self::Analyzed => "frame analysis",
            Self::Synthesized => "synthesis",
            Self::Persisted => "persistence",
            Self::Done => "completion",
        };
        f.write_str(name)
    }
}

/// What synthesis sees of failed frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TombstonePolicy {
    /// Synthesis sees only successful frames. Tombstones stay in the analysis artifact.
    #[default]
    Drop,
    /// Synthesis is told which frames have no visual data.
    Keep,
}

/// Intermediate artifacts to keep on disk. The SOP is always written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepArtifacts {
    pub transcript: bool,
    pub frames: bool,
    pub analysis: bool,
    pub summary: bool,
}

impl Default for KeepArtifacts {
    fn default() -> Self {
        Self {
            transcript: true,
            frames: true,
            analysis: true,
            summary: true,
        }
    }
}

/// Configuration for the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Frames sampled per second of video.
    pub sampling_rate_hz: f64,
    pub analysis: AnalysisConfig,
    pub tombstone_policy: TombstonePolicy,
    pub keep: KeepArtifacts,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: defaults::SAMPLING_RATE_HZ,
            analysis: AnalysisConfig::default(),
            tombstone_policy: TombstonePolicy::default(),
            keep: KeepArtifacts::default(),
        }
    }
}

/// Progress of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineProgress {
    /// Stage being worked towards.
    pub stage: PipelineStage,
    /// Overall progress (0.0 to 1.0).
    pub overall_progress: f32,
    /// Stage-specific progress (0.0 to 1.0).
    pub stage_progress: f32,
    /// Human-readable status message.
    pub message: String,
}

/// Wall time spent reaching a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: PipelineStage,
    pub secs: f64,
}

/// Files written by a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub sop: PathBuf,
    pub transcript: Option<PathBuf>,
    pub analysis: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub frames_dir: Option<PathBuf>,
}

/// The outcome of a successful run. Never mutated once returned.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub source: PathBuf,
    pub identity: ContentIdentity,
    pub transcript: Transcript,
    pub frames: Vec<FrameRef>,
    /// Every frame outcome, tombstones included.
    pub analysis: AnalysisBatchResult,
    pub sop_text: String,
    pub steps: Vec<SopStep>,
    pub artifacts: RunArtifacts,
    pub timings: Vec<StageTiming>,
}

impl PipelineRun {
    pub fn total_secs(&self) -> f64 {
        self.timings.iter().map(|t| t.secs).sum()
    }
}

/// Persisted description of a run, `{key}_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub video_name: String,
    pub video_path: PathBuf,
    pub identity: ContentIdentity,
    pub transcript_segments: usize,
    pub transcript_text: String,
    pub frames_extracted: usize,
    pub frames_analyzed: usize,
    pub frames_failed: usize,
    pub tombstone_policy: TombstonePolicy,
    pub visual_summary: VisualSummary,
    pub sop_path: PathBuf,
    pub steps: Vec<SopStep>,
    pub timings: Vec<StageTiming>,
}

/// Emits progress and records stage timings.
struct StageTracker<F: FnMut(PipelineProgress)> {
    callback: F,
    completed_weight: f32,
    current: Option<(PipelineStage, Instant)>,
    timings: Vec<StageTiming>,
}

impl<F: FnMut(PipelineProgress)> StageTracker<F> {
    fn new(callback: F) -> Self {
        Self {
            callback,
            completed_weight: 0.0,
            current: None,
            timings: Vec::new(),
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        self.finish_current();
        self.current = Some((stage, Instant::now()));
        self.emit(stage, 0.0, stage.display_name().to_string());
    }

    /// Report progress within the current stage.
    fn report(&mut self, stage_progress: f32, message: String) {
        if let Some((stage, _)) = self.current {
            self.emit(stage, stage_progress.clamp(0.0, 1.0), message);
        }
    }

    fn finish_current(&mut self) {
        if let Some((stage, started)) = self.current.take() {
            self.completed_weight += stage.weight();
            self.timings.push(StageTiming {
                stage,
                secs: started.elapsed().as_secs_f64(),
            });
        }
    }

    /// Close the current stage and hand back all timings.
    fn close(&mut self) -> Vec<StageTiming> {
        self.finish_current();
        self.timings.clone()
    }

    fn done(&mut self) {
        self.finish_current();
        (self.callback)(PipelineProgress {
            stage: PipelineStage::Done,
            overall_progress: 1.0,
            stage_progress: 1.0,
            message: PipelineStage::Done.display_name().into(),
        });
    }

    fn emit(&mut self, stage: PipelineStage, stage_progress: f32, message: String) {
        let overall = (self.completed_weight + stage.weight() * stage_progress) / 100.0;
        (self.callback)(PipelineProgress {
            stage,
            overall_progress: overall.min(1.0),
            stage_progress,
            message,
        });
    }
}

/// Run a blocking step off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TaskLaneError::Io(std::io::Error::other(format!("worker task failed: {e}"))))?
}

/// Keep fatal errors as they are; fold anything else into `wrap`.
fn fatal_or(e: TaskLaneError, wrap: impl FnOnce(String) -> TaskLaneError) -> TaskLaneError {
    if e.is_fatal() {
        e
    } else {
        wrap(e.to_string())
    }
}

/// Sequences the pipeline stages for one video at a time.
pub struct PipelineOrchestrator {
    cache: Arc<ModelCache>,
    extractor: Arc<dyn FrameExtractor>,
    synthesizer: Arc<dyn NarrativeSynthesizer>,
    store: ArtifactStore,
    config: PipelineConfig,
    engine: FrameAnalysisEngine,
}

impl PipelineOrchestrator {
    /// Create an orchestrator. Fails on invalid analysis settings.
    pub fn new(
        cache: Arc<ModelCache>,
        extractor: Arc<dyn FrameExtractor>,
        synthesizer: Arc<dyn NarrativeSynthesizer>,
        store: ArtifactStore,
        config: PipelineConfig,
    ) -> Result<Self> {
        if !(config.sampling_rate_hz > 0.0 && config.sampling_rate_hz.is_finite()) {
            return Err(TaskLaneError::InvalidParameter(format!(
                "sampling rate must be positive, got {}",
                config.sampling_rate_hz
            )));
        }
        let engine = FrameAnalysisEngine::new(config.analysis.clone())?;
        Ok(Self {
            cache,
            extractor,
            synthesizer,
            store,
            config,
            engine,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run the pipeline on one video.
    pub async fn run(&self, source: &Path) -> PipelineResult<PipelineRun> {
        self.run_with_progress(source, |_| {}).await
    }

    /// Run the pipeline, calling `progress` at every stage transition and
    /// after every analysis batch.
    pub async fn run_with_progress(
        &self,
        source: &Path,
        progress: impl FnMut(PipelineProgress),
    ) -> PipelineResult<PipelineRun> {
        let run_id = Uuid::new_v4();
        let mut tracker = StageTracker::new(progress);
        let result = self.execute(run_id, source, &mut tracker).await;
        match &result {
            Ok(run) => info!(
                run_id = %run_id,
                key = %run.identity.key(),
                sop = %run.artifacts.sop.display(),
                total_secs = run.total_secs(),
                "Pipeline complete"
            ),
            Err(e) => error!(
                run_id = %run_id,
                stage = %e.stage,
                error = %e.source,
                "Pipeline failed"
            ),
        }
        result
    }

    async fn execute<F: FnMut(PipelineProgress)>(
        &self,
        run_id: Uuid,
        source: &Path,
        tracker: &mut StageTracker<F>,
    ) -> PipelineResult<PipelineRun> {
        use PipelineStage::*;

        // ── Init ──────────────────────────────────────────────────────────
        tracker.enter(Init);
        info!(run_id = %run_id, source = %source.display(), "Starting pipeline");
        self.store.ensure_dirs().at_stage(Init)?;

        // ── Content identity ──────────────────────────────────────────────
        tracker.enter(IdentityComputed);
        let path = source.to_path_buf();
        let identity = blocking(move || compute_identity(&path))
            .await
            .at_stage(IdentityComputed)?;
        let key = identity.key();
        info!(run_id = %run_id, key = %key, "Content identity computed");

        // ── Models (parallel across roles) ────────────────────────────────
        tracker.enter(ModelsReady);
        let (speech, vision) = tokio::try_join!(
            self.cache.get(ModelRole::Transcription),
            self.cache.get(ModelRole::Vision)
        )
        .at_stage(ModelsReady)?;
        let speech = speech.speech().ok_or_else(|| {
            PipelineError::new(
                ModelsReady,
                TaskLaneError::ModelUnavailable {
                    role: ModelRole::Transcription,
                    cause: "cached handle is not a speech model".into(),
                },
            )
        })?;
        let vision = vision.vision().ok_or_else(|| {
            PipelineError::new(
                ModelsReady,
                TaskLaneError::ModelUnavailable {
                    role: ModelRole::Vision,
                    cause: "cached handle is not a vision model".into(),
                },
            )
        })?;

        // ── Transcription ─────────────────────────────────────────────────
        tracker.enter(Transcribed);
        let audio_source = source.to_path_buf();
        let transcript = blocking(move || speech.transcribe(&audio_source))
            .await
            .map_err(|e| fatal_or(e, TaskLaneError::TranscriptionFailed))
            .at_stage(Transcribed)?;
        info!(
            segments = transcript.segments.len(),
            chars = transcript.plain_text().len(),
            "Transcript ready"
        );
        let transcript_path = self
            .keep_or_discard(
                self.config.keep.transcript,
                self.store.transcript_path(&identity),
                || self.store.save_transcript(&identity, &transcript),
            )
            .at_stage(Transcribed)?;

        // ── Frame extraction ──────────────────────────────────────────────
        tracker.enter(FramesExtracted);
        let extractor = Arc::clone(&self.extractor);
        let frames_dir = self.store.frames_dir();
        let extract_source = source.to_path_buf();
        let rate = self.config.sampling_rate_hz;
        let frame_key = key.clone();
        let frames = blocking(move || {
            extractor.extract(&extract_source, rate, &frames_dir, &frame_key)
        })
        .await
        .map_err(|e| fatal_or(e, TaskLaneError::ExtractionFailed))
        .at_stage(FramesExtracted)?;
        info!(frames = frames.len(), "Frames extracted");

        // ── Frame analysis ────────────────────────────────────────────────
        tracker.enter(Analyzed);
        let analysis = self
            .engine
            .analyze_with_progress(&frames, vision, |batch| {
                tracker.report(
                    batch.frames_done as f32 / batch.frames_total as f32,
                    format!(
                        "Analyzed batch {}/{} ({} of {} frames)",
                        batch.batch_index + 1,
                        batch.batch_count,
                        batch.frames_done,
                        batch.frames_total
                    ),
                );
            })
            .await;
        if analysis.failure_count() > 0 {
            warn!(
                failed = analysis.failure_count(),
                total = analysis.len(),
                "Some frames could not be analyzed"
            );
        }
        let visual_summary = VisualSummary::from_analyses(analysis.successes());
        let analysis_path = self
            .keep_or_discard(
                self.config.keep.analysis,
                self.store.analysis_path(&identity),
                || {
                    self.store.save_analysis(
                        &identity,
                        &AnalysisArtifact {
                            identity: identity.clone(),
                            sampling_rate_hz: self.config.sampling_rate_hz,
                            frames_total: frames.len(),
                            frames_analyzed: analysis.success_count(),
                            frames_failed: analysis.failure_count(),
                            visual_summary: visual_summary.clone(),
                            result: analysis.clone(),
                        },
                    )
                },
            )
            .at_stage(Analyzed)?;
        let frames_dir = if self.config.keep.frames {
            Some(self.store.frames_dir())
        } else {
            self.store.remove_frames(&frames).at_stage(Analyzed)?;
            None
        };

        // ── Synthesis ─────────────────────────────────────────────────────
        tracker.enter(Synthesized);
        let synthesis_view = match self.config.tombstone_policy {
            TombstonePolicy::Drop => analysis.without_failures(),
            TombstonePolicy::Keep => analysis.clone(),
        };
        debug!(
            policy = ?self.config.tombstone_policy,
            frames = synthesis_view.len(),
            "Handing analyses to synthesis"
        );
        let sop_text = self
            .synthesizer
            .synthesize(&transcript, &synthesis_view)
            .await
            .map_err(|e| fatal_or(e, TaskLaneError::SynthesisFailed))
            .at_stage(Synthesized)?;
        let steps = extract_steps(&sop_text);
        info!(steps = steps.len(), chars = sop_text.len(), "SOP synthesized");

        // ── Persistence ───────────────────────────────────────────────────
        tracker.enter(Persisted);
        let sop_path = self.store.save_sop(&identity, &sop_text).at_stage(Persisted)?;

        let timings = tracker.close();
        let summary_path = if self.config.keep.summary {
            let summary = RunSummary {
                run_id,
                video_name: source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                video_path: source.to_path_buf(),
                identity: identity.clone(),
                transcript_segments: transcript.segments.len(),
                transcript_text: transcript.plain_text(),
                frames_extracted: frames.len(),
                frames_analyzed: analysis.success_count(),
                frames_failed: analysis.failure_count(),
                tombstone_policy: self.config.tombstone_policy,
                visual_summary,
                sop_path: sop_path.clone(),
                steps: steps.clone(),
                timings: timings.clone(),
            };
            Some(self.store.save_summary(&identity, &summary).at_stage(Persisted)?)
        } else {
            self.store
                .discard(&self.store.summary_path(&identity))
                .at_stage(Persisted)?;
            None
        };
        tracker.done();

        Ok(PipelineRun {
            run_id,
            source: source.to_path_buf(),
            identity,
            transcript,
            frames,
            analysis,
            sop_text,
            steps,
            artifacts: RunArtifacts {
                sop: sop_path,
                transcript: transcript_path,
                analysis: analysis_path,
                summary: summary_path,
                frames_dir,
            },
            timings,
        })
    }

    /// Write an intermediate artifact, or remove a stale copy left by an
    /// earlier run that kept it.
    fn keep_or_discard(
        &self,
        keep: bool,
        path: PathBuf,
        save: impl FnOnce() -> Result<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        if keep {
            save().map(Some)
        } else {
            self.store.discard(&path)?;
            Ok(None)
        }
    }
}
