//! Batched, concurrent frame analysis.
//!
//! Frames are split into consecutive batches. Batches run strictly one after
//! another; inside a batch every frame gets its own task, and a semaphore
//! shared by all batches caps how many run at once. Each task runs the
//! blocking model calls on a dedicated rayon pool, with detection and text
//! recognition side by side.
//!
//! A frame that cannot be analyzed becomes a [`FrameFailure`] tombstone in the
//! result. Nothing a single frame does can fail the whole call.

use crate::models::{Deadline, VisionModel};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tasklane_core::{
    defaults, AnalysisBatchResult, FailureReason, FrameAnalysis, FrameFailure, FrameOutcome,
    FrameRef, RecognizedText, Result, TaskLaneError,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Configuration for the analysis engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Frames per batch.
    pub batch_size: usize,
    /// Upper bound on frames analyzed at the same time.
    pub max_concurrency: usize,
    /// Per-frame time budget. `None` waits indefinitely.
    pub task_timeout: Option<Duration>,
    /// Text fragments shorter than this many characters are dropped.
    pub min_text_len: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            max_concurrency: defaults::MAX_CONCURRENCY,
            task_timeout: Some(Duration::from_secs(defaults::FRAME_TIMEOUT_SECS)),
            min_text_len: defaults::MIN_TEXT_LEN,
        }
    }
}

/// Reported after each batch has fully drained.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    /// 0-based batch number.
    pub batch_index: usize,
    pub batch_count: usize,
    /// Frames in this batch.
    pub batch_len: usize,
    /// Tombstones produced by this batch.
    pub batch_failures: usize,
    /// Frames finished so far, this batch included.
    pub frames_done: usize,
    pub frames_total: usize,
}

/// Runs a vision model over frames in bounded, ordered batches.
pub struct FrameAnalysisEngine {
    config: AnalysisConfig,
    /// Long-lived permit pool, reused by every batch.
    permits: Arc<Semaphore>,
    /// Threads that execute the blocking model calls.
    workers: Arc<rayon::ThreadPool>,
    concurrency: usize,
}

impl FrameAnalysisEngine {
    /// Create an engine. Fails with `InvalidParameter` for a zero batch size
    /// or concurrency.
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(TaskLaneError::InvalidParameter(
                "batch_size must be at least 1".into(),
            ));
        }
        if config.max_concurrency == 0 {
            return Err(TaskLaneError::InvalidParameter(
                "max_concurrency must be at least 1".into(),
            ));
        }

        // More permits than frames per batch could never be used.
        let concurrency = config.max_concurrency.min(config.batch_size);
        if concurrency < config.max_concurrency {
            debug!(
                requested = config.max_concurrency,
                batch_size = config.batch_size,
                "Clamping concurrency to batch size"
            );
        }

        // Two threads per in-flight frame: detection and text recognition.
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency * 2)
            .thread_name(|i| format!("tasklane-frame-{i}"))
            .build()
            .map_err(|e| {
                TaskLaneError::InvalidParameter(format!("cannot start frame workers: {e}"))
            })?;

        Ok(Self {
            config,
            permits: Arc::new(Semaphore::new(concurrency)),
            workers: Arc::new(workers),
            concurrency,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Effective concurrency after clamping.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Analyze `frames` in timeline order.
    pub async fn analyze(
        &self,
        frames: &[FrameRef],
        model: Arc<dyn VisionModel>,
    ) -> AnalysisBatchResult {
        self.analyze_with_progress(frames, model, |_| {}).await
    }

    /// Analyze `frames`, calling `on_batch` after each batch drains.
    pub async fn analyze_with_progress(
        &self,
        frames: &[FrameRef],
        model: Arc<dyn VisionModel>,
        mut on_batch: impl FnMut(&BatchProgress),
    ) -> AnalysisBatchResult {
        let mut result = AnalysisBatchResult::new();
        if frames.is_empty() {
            debug!("No frames to analyze");
            return result;
        }

        let batch_count = frames.len().div_ceil(self.config.batch_size);
        info!(
            frames = frames.len(),
            batches = batch_count,
            batch_size = self.config.batch_size,
            concurrency = self.concurrency,
            "Starting frame analysis"
        );
        let started = Instant::now();

        for (batch_index, batch) in frames.chunks(self.config.batch_size).enumerate() {
            debug!(
                batch = batch_index + 1,
                of = batch_count,
                frames = batch.len(),
                "Analyzing batch"
            );
            let outcomes = self.run_batch(batch, &model).await;
            let batch_failures = outcomes.iter().filter(|o| o.is_failure()).count();
            result.extend_batch(outcomes);

            let progress = BatchProgress {
                batch_index,
                batch_count,
                batch_len: batch.len(),
                batch_failures,
                frames_done: result.len(),
                frames_total: frames.len(),
            };
            debug!(
                batch = batch_index + 1,
                of = batch_count,
                failures = batch_failures,
                "Batch complete"
            );
            on_batch(&progress);
        }

        info!(
            analyzed = result.success_count(),
            failed = result.failure_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Frame analysis complete"
        );
        result
    }

    /// Run one batch to completion. Returns one outcome per frame, in
    /// completion order.
    async fn run_batch(
        &self,
        batch: &[FrameRef],
        model: &Arc<dyn VisionModel>,
    ) -> Vec<FrameOutcome> {
        let mut tasks = JoinSet::new();
        for frame in batch {
            tasks.spawn(analyze_task(
                frame.clone(),
                Arc::clone(model),
                Arc::clone(&self.permits),
                Arc::clone(&self.workers),
                self.config.task_timeout,
                self.config.min_text_len,
            ));
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Frame task aborted"),
            }
        }

        // A task that died before reporting still owes its frame a tombstone.
        if outcomes.len() < batch.len() {
            let seen: HashSet<usize> = outcomes.iter().map(FrameOutcome::index).collect();
            for frame in batch.iter().filter(|f| !seen.contains(&f.index)) {
                outcomes.push(tombstone(
                    frame,
                    FailureReason::Unexpected("task aborted".into()),
                ));
            }
        }
        outcomes
    }
}

async fn analyze_task(
    frame: FrameRef,
    model: Arc<dyn VisionModel>,
    permits: Arc<Semaphore>,
    workers: Arc<rayon::ThreadPool>,
    task_timeout: Option<Duration>,
    min_text_len: usize,
) -> FrameOutcome {
    let Ok(_permit) = permits.acquire_owned().await else {
        return tombstone(&frame, FailureReason::Unexpected("worker pool closed".into()));
    };

    let deadline = task_timeout.map_or_else(Deadline::none, Deadline::after);
    let job_frame = frame.clone();
    let mut work = tokio::task::spawn_blocking(move || {
        analyze_frame(&workers, &*model, &job_frame, deadline, min_text_len)
    });

    let joined = match task_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut work).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(frame = %frame.name(), timeout_secs = limit.as_secs_f64(), "Frame timed out");
                // The permit stays held until the model call has returned, so
                // a hung frame never lets extra work onto the worker pool.
                if let Err(e) = work.await {
                    debug!(frame = %frame.name(), error = %e, "Timed-out frame task failed");
                }
                return tombstone(
                    &frame,
                    FailureReason::Timeout {
                        secs: limit.as_secs_f64(),
                    },
                );
            }
        },
        None => work.await,
    };

    match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            let detail = if e.is_panic() {
                "analysis panicked".to_string()
            } else {
                e.to_string()
            };
            warn!(frame = %frame.name(), error = %detail, "Frame task failed");
            tombstone(&frame, FailureReason::Unexpected(detail))
        }
    }
}

/// Blocking analysis of a single frame.
fn analyze_frame(
    workers: &rayon::ThreadPool,
    model: &dyn VisionModel,
    frame: &FrameRef,
    deadline: Deadline,
    min_text_len: usize,
) -> FrameOutcome {
    if !frame.location.is_file() {
        warn!(frame = %frame.location.display(), "Frame file missing");
        return tombstone(
            frame,
            FailureReason::MissingFrame(frame.location.display().to_string()),
        );
    }

    let (detected, recognized) = workers.join(
        || model.detect(frame, deadline),
        || model.recognize_text(frame, deadline),
    );

    let detections = match detected {
        Ok(detections) => detections,
        Err(e) => {
            warn!(frame = %frame.name(), error = %e, "Detection failed");
            return tombstone(frame, FailureReason::Detection(e.to_string()));
        }
    };

    let (text_fragments, text_degraded) = match recognized {
        Ok(lines) => (meaningful_text(lines, min_text_len), false),
        Err(e) => {
            let err = match e {
                TaskLaneError::TextRecognitionDegraded(_) => e,
                other => TaskLaneError::TextRecognitionDegraded(other.to_string()),
            };
            warn!(frame = %frame.name(), error = %err, "Continuing without text");
            (Vec::new(), true)
        }
    };

    FrameOutcome::Analyzed(FrameAnalysis {
        index: frame.index,
        frame: frame.name(),
        timestamp_secs: frame.timestamp_secs,
        detections,
        text_fragments,
        text_degraded,
    })
}

/// Trimmed text lines at least `min_len` characters long.
pub fn meaningful_text(lines: Vec<RecognizedText>, min_len: usize) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| line.text.trim().to_string())
        .filter(|text| text.chars().count() >= min_len)
        .collect()
}

fn tombstone(frame: &FrameRef, reason: FailureReason) -> FrameOutcome {
    FrameOutcome::Failed(FrameFailure {
        index: frame.index,
        frame: frame.name(),
        reason,
    })
}
