//! Model capabilities and the providers that build them.
//!
//! A [`ModelHandle`] is the expensive, shared, read-only object the
//! [`ModelCache`](crate::model_cache::ModelCache) hands out. Each handle comes
//! from a [`ModelProvider`], which also owns the snapshot codec for its role.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tasklane_core::{Detection, FrameRef, ModelRole, RecognizedText, Result, Transcript};

/// Speech-to-text capability.
pub trait SpeechModel: Send + Sync {
    /// Transcribe the audio track of `source`.
    fn transcribe(&self, source: &Path) -> Result<Transcript>;
}

/// Point in time after which a blocking model call should give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No limit.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(limit: Duration) -> Self {
        Self(Some(Instant::now() + limit))
    }

    /// Time left, or `None` when unbounded. Zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }
}

/// Object detection and text recognition over single frames.
///
/// Both calls are blocking and may be invoked from many threads at once.
/// Implementations stop their work and return an error once `deadline`
/// has passed.
pub trait VisionModel: Send + Sync {
    fn detect(&self, frame: &FrameRef, deadline: Deadline) -> Result<Vec<Detection>>;

    fn recognize_text(&self, frame: &FrameRef, deadline: Deadline) -> Result<Vec<RecognizedText>>;
}

/// A constructed model, shared read-only between callers.
#[derive(Clone)]
pub enum ModelHandle {
    Speech(Arc<dyn SpeechModel>),
    Vision(Arc<dyn VisionModel>),
}

impl ModelHandle {
    /// Role this handle serves.
    pub fn role(&self) -> ModelRole {
        match self {
            Self::Speech(_) => ModelRole::Transcription,
            Self::Vision(_) => ModelRole::Vision,
        }
    }

    pub fn speech(&self) -> Option<Arc<dyn SpeechModel>> {
        match self {
            Self::Speech(model) => Some(Arc::clone(model)),
            Self::Vision(_) => None,
        }
    }

    pub fn vision(&self) -> Option<Arc<dyn VisionModel>> {
        match self {
            Self::Vision(model) => Some(Arc::clone(model)),
            Self::Speech(_) => None,
        }
    }

    /// Whether both handles point at the same constructed model.
    pub fn same_instance(&self, other: &ModelHandle) -> bool {
        self.data_ptr() == other.data_ptr()
    }

    fn data_ptr(&self) -> *const () {
        match self {
            Self::Speech(model) => Arc::as_ptr(model) as *const (),
            Self::Vision(model) => Arc::as_ptr(model) as *const (),
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("role", &self.role())
            .field("ptr", &self.data_ptr())
            .finish()
    }
}

/// Builds handles for one role and converts them to and from snapshot bytes.
///
/// All methods are blocking; the cache calls them off the async runtime.
pub trait ModelProvider: Send + Sync {
    fn role(&self) -> ModelRole;

    /// Build a handle from scratch. This is the expensive path.
    fn construct(&self) -> Result<ModelHandle>;

    /// Encode a handle built by this provider for durable storage.
    fn encode_snapshot(&self, handle: &ModelHandle) -> Result<Vec<u8>>;

    /// Rebuild a handle from snapshot bytes.
    ///
    /// Any error means the snapshot is unusable and a fresh construction follows.
    fn decode_snapshot(&self, bytes: &[u8]) -> Result<ModelHandle>;
}
