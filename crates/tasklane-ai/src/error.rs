//! Error types for the orchestration layer.

use crate::pipeline::PipelineStage;
use tasklane_core::TaskLaneError;
use thiserror::Error;

/// A fatal error, tagged with the stage the run was in when it occurred.
#[derive(Debug, Error)]
#[error("pipeline failed during {stage}: {source}")]
pub struct PipelineError {
    /// Stage that was being attempted.
    pub stage: PipelineStage,
    /// Underlying cause.
    #[source]
    pub source: TaskLaneError,
}

impl PipelineError {
    pub fn new(stage: PipelineStage, source: TaskLaneError) -> Self {
        Self { stage, source }
    }
}

/// Result type alias for pipeline runs.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Attach a stage to a fallible step.
pub(crate) trait AtStage<T> {
    fn at_stage(self, stage: PipelineStage) -> PipelineResult<T>;
}

impl<T> AtStage<T> for tasklane_core::Result<T> {
    fn at_stage(self, stage: PipelineStage) -> PipelineResult<T> {
        self.map_err(|source| PipelineError::new(stage, source))
    }
}
