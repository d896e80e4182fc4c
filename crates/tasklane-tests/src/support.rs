//! In-process collaborators shared by the integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tasklane_ai::synthesis::build_prompt;
use tasklane_ai::{
    ArtifactStore, Deadline, FsSnapshotStore, ModelCache, ModelHandle, ModelProvider,
    NarrativeSynthesizer, PipelineConfig, PipelineOrchestrator, SpeechModel, VisionModel,
};
use tasklane_core::{
    AnalysisBatchResult, BoundingBox, Detection, FrameRef, ModelRole, RecognizedText, Result,
    TaskLaneError, Transcript, TranscriptSegment,
};
use tasklane_media::FrameExtractor;
use tempfile::TempDir;

// ── Models ─────────────────────────────────────────────────────

pub struct ScriptedSpeech;

impl SpeechModel for ScriptedSpeech {
    fn transcribe(&self, _source: &Path) -> Result<Transcript> {
        Ok(Transcript::from_segments(
            vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 2.0,
                    text: "Open the settings menu".into(),
                },
                TranscriptSegment {
                    start: 2.0,
                    end: 4.0,
                    text: "then press save".into(),
                },
            ],
            Some("en".into()),
        ))
    }
}

/// A whisper run that always crashes.
pub struct FailingSpeech;

impl SpeechModel for FailingSpeech {
    fn transcribe(&self, _source: &Path) -> Result<Transcript> {
        Err(TaskLaneError::TranscriptionFailed(
            "whisper.cpp exited with status 1".into(),
        ))
    }
}

/// Sees a button and the text "Save changes" in every frame, except frames
/// listed in `failing`, whose detection errors out.
#[derive(Default)]
pub struct ScriptedVision {
    pub failing: HashSet<usize>,
}

impl VisionModel for ScriptedVision {
    fn detect(&self, frame: &FrameRef, _deadline: Deadline) -> Result<Vec<Detection>> {
        if self.failing.contains(&frame.index) {
            return Err(TaskLaneError::Detection("detector crashed".into()));
        }
        Ok(vec![Detection {
            label: "button".into(),
            confidence: 0.9,
            bounding_box: BoundingBox::default(),
        }])
    }

    fn recognize_text(
        &self,
        _frame: &FrameRef,
        _deadline: Deadline,
    ) -> Result<Vec<RecognizedText>> {
        Ok(vec![
            RecognizedText {
                text: "Save changes".into(),
                confidence: 0.95,
            },
            RecognizedText {
                text: "ok".into(),
                confidence: 0.4,
            },
        ])
    }
}

/// Hands out a fixed handle and counts how it was obtained.
pub struct FakeProvider {
    handle: ModelHandle,
    pub constructs: AtomicUsize,
    pub decodes: AtomicUsize,
}

impl FakeProvider {
    pub fn new(handle: ModelHandle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            constructs: AtomicUsize::new(0),
            decodes: AtomicUsize::new(0),
        })
    }

    pub fn constructs(&self) -> usize {
        self.constructs.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl ModelProvider for FakeProvider {
    fn role(&self) -> ModelRole {
        self.handle.role()
    }

    fn construct(&self) -> Result<ModelHandle> {
        self.constructs.fetch_add(1, Ordering::SeqCst);
        Ok(self.handle.clone())
    }

    fn encode_snapshot(&self, _handle: &ModelHandle) -> Result<Vec<u8>> {
        Ok(self.role().tag().as_bytes().to_vec())
    }

    fn decode_snapshot(&self, bytes: &[u8]) -> Result<ModelHandle> {
        if bytes != self.role().tag().as_bytes() {
            return Err(TaskLaneError::Serialization("unexpected snapshot".into()));
        }
        self.decodes.fetch_add(1, Ordering::SeqCst);
        Ok(self.handle.clone())
    }
}

// ── Extraction ─────────────────────────────────────────────────

/// Writes `frames` placeholder images, skipping indices in `missing`.
/// With `failure` set, writes nothing and reports an FFmpeg error instead.
pub struct FakeExtractor {
    pub frames: usize,
    pub missing: HashSet<usize>,
    pub failure: Option<String>,
}

impl FrameExtractor for FakeExtractor {
    fn extract(
        &self,
        _source: &Path,
        sampling_rate_hz: f64,
        frames_dir: &Path,
        key: &str,
    ) -> Result<Vec<FrameRef>> {
        if let Some(reason) = &self.failure {
            return Err(TaskLaneError::ExtractionFailed(reason.clone()));
        }
        std::fs::create_dir_all(frames_dir)?;
        let mut frames = Vec::with_capacity(self.frames);
        for index in 0..self.frames {
            let path = frames_dir.join(format!("{key}_frame_{:04}.png", index + 1));
            if !self.missing.contains(&index) {
                std::fs::write(&path, b"png")?;
            }
            frames.push(FrameRef::new(index, path, index as f64 / sampling_rate_hz));
        }
        Ok(frames)
    }
}

// ── Synthesis ──────────────────────────────────────────────────

/// Records what it was asked to synthesize. Fails when `reply` is `None`.
pub struct RecordingSynthesizer {
    reply: Option<String>,
    pub seen: Mutex<Vec<AnalysisBatchResult>>,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingSynthesizer {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(text.to_string()),
            seen: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            seen: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl NarrativeSynthesizer for RecordingSynthesizer {
    async fn synthesize(
        &self,
        transcript: &Transcript,
        analysis: &AnalysisBatchResult,
    ) -> Result<String> {
        self.prompts.lock().push(build_prompt(transcript, analysis));
        self.seen.lock().push(analysis.clone());
        self.reply
            .clone()
            .ok_or_else(|| TaskLaneError::SynthesisFailed("endpoint returned 500".into()))
    }
}

pub const SOP_TEXT: &str = "1. Open the settings menu\n2. Click Save changes\n";

// ── Harness ────────────────────────────────────────────────────

/// A complete pipeline wired to fakes inside a temp directory.
pub struct Harness {
    pub tmp: TempDir,
    pub speech: Arc<FakeProvider>,
    pub vision: Arc<FakeProvider>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub cache: Arc<ModelCache>,
    pub store: ArtifactStore,
}

impl Harness {
    pub fn new(vision: ScriptedVision, synthesizer: Arc<RecordingSynthesizer>) -> Self {
        Self::with_speech(Arc::new(ScriptedSpeech), vision, synthesizer)
    }

    pub fn with_speech(
        speech: Arc<dyn SpeechModel>,
        vision: ScriptedVision,
        synthesizer: Arc<RecordingSynthesizer>,
    ) -> Self {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let speech = FakeProvider::new(ModelHandle::Speech(speech));
        let vision = FakeProvider::new(ModelHandle::Vision(Arc::new(vision)));
        let cache = Arc::new(
            ModelCache::new(Arc::new(FsSnapshotStore::new(tmp.path().join("models"))))
                .with_provider(speech.clone())
                .with_provider(vision.clone()),
        );
        let store = ArtifactStore::new(tmp.path().join("output"));
        Self {
            tmp,
            speech,
            vision,
            synthesizer,
            cache,
            store,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ScriptedVision::default(), RecordingSynthesizer::replying(SOP_TEXT))
    }

    pub fn orchestrator(
        &self,
        extractor: FakeExtractor,
        config: PipelineConfig,
    ) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            Arc::clone(&self.cache),
            Arc::new(extractor),
            self.synthesizer.clone(),
            self.store.clone(),
            config,
        )
        .expect("valid pipeline config")
    }

    /// Write a fake video with the given bytes.
    pub fn video(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let dir = self.tmp.path().join("input");
        std::fs::create_dir_all(&dir).expect("failed to create input dir");
        let path = dir.join(name);
        std::fs::write(&path, bytes).expect("failed to write video");
        path
    }
}

pub fn extractor(frames: usize) -> FakeExtractor {
    FakeExtractor {
        frames,
        missing: HashSet::new(),
        failure: None,
    }
}

pub fn failing_extractor(reason: &str) -> FakeExtractor {
    FakeExtractor {
        failure: Some(reason.to_string()),
        ..extractor(0)
    }
}
