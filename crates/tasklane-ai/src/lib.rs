//! TaskLane AI - model management, frame analysis and SOP synthesis
//!
//! Provides the pipeline that turns a tutorial video into an SOP:
//! - Shared model cache with on-disk snapshots
//! - Speech transcription (whisper.cpp)
//! - Object detection and text recognition (sidecar detector, Tesseract)
//! - Batched, bounded-concurrency frame analysis
//! - SOP synthesis through a chat-completions endpoint
//! - Content-addressed artifact storage

pub mod analysis;
pub mod artifact_store;
pub mod error;
pub mod model_cache;
pub mod models;
pub mod pipeline;
pub mod snapshot;
pub mod synthesis;
pub mod transcribe;
pub mod vision;

pub use analysis::{AnalysisConfig, BatchProgress, FrameAnalysisEngine};
pub use artifact_store::{AnalysisArtifact, ArtifactStore};
pub use error::{PipelineError, PipelineResult};
pub use model_cache::ModelCache;
pub use models::{Deadline, ModelHandle, ModelProvider, SpeechModel, VisionModel};
pub use pipeline::{
    KeepArtifacts, PipelineConfig, PipelineOrchestrator, PipelineProgress, PipelineRun,
    PipelineStage, RunArtifacts, RunSummary, StageTiming, TombstonePolicy,
};
pub use snapshot::{FsSnapshotStore, NullSnapshotStore, SnapshotStore};
pub use synthesis::{
    ChatCompletionsSynthesizer, NarrativeSynthesizer, SopStep, SynthesisConfig, VisualSummary,
};
pub use transcribe::{TranscriberConfig, WhisperModel, WhisperProvider};
pub use vision::{SidecarVisionModel, SidecarVisionProvider, VisionConfig};
