//! Audio transcription using whisper.cpp as a sidecar process.
//!
//! Extracts audio from the video via FFmpeg, then runs whisper.cpp and parses
//! its JSON output into timed segments.
//!
//! Building the model verifies the weights file's SHA-256, which is slow for
//! multi-gigabyte weights. The snapshot records the verified digest together
//! with the file's size and modification time, so a warm start only has to
//! stat the file.

use crate::models::{ModelHandle, ModelProvider, SpeechModel};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tasklane_core::{ModelRole, Result, TaskLaneError, Transcript, TranscriptSegment};
use tasklane_media::AudioExtractionJob;
use tracing::{debug, info, warn};

/// Configuration for the transcription engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriberConfig {
    /// Path to the whisper.cpp binary.
    pub whisper_binary: PathBuf,
    /// Path to the whisper model file (.bin).
    pub model_path: PathBuf,
    /// Language code (None = auto-detect).
    pub language: Option<String>,
    /// Number of threads to use.
    pub threads: u32,
    /// Expected SHA-256 of the weights, hex. Checked on construction when set.
    pub expected_sha256: Option<String>,
    /// Where intermediate WAV and JSON files are written.
    pub scratch_dir: PathBuf,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            whisper_binary: Self::find_whisper_binary(),
            model_path: PathBuf::new(),
            language: None,
            threads: num_cpus::get() as u32,
            expected_sha256: None,
            scratch_dir: std::env::temp_dir(),
        }
    }
}

impl TranscriberConfig {
    /// Search PATH for a whisper.cpp binary.
    pub fn find_whisper_binary() -> PathBuf {
        for name in &["whisper-cli", "whisper-cpp", "whisper", "main"] {
            if which::which(name).is_ok() {
                return PathBuf::from(name);
            }
        }
        PathBuf::from("whisper-cpp")
    }
}

/// Whisper.cpp-based speech model.
#[derive(Debug)]
pub struct WhisperModel {
    binary: PathBuf,
    model_path: PathBuf,
    language: Option<String>,
    threads: u32,
    scratch_dir: PathBuf,
}

impl WhisperModel {
    fn run_whisper(&self, wav: &Path, output_prefix: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(wav)
            .arg("-oj")
            .arg("-of")
            .arg(output_prefix)
            .arg("-t")
            .arg(self.threads.to_string())
            .arg("-l")
            .arg(self.language.as_deref().unwrap_or("auto"));

        let output = cmd
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
            .map_err(|e| {
                TaskLaneError::TranscriptionFailed(format!(
                    "failed to run {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stderr = %stderr, "whisper.cpp failed");
            return Err(TaskLaneError::TranscriptionFailed(format!(
                "whisper.cpp exited with status {}: {}",
                output.status,
                stderr.chars().take(500).collect::<String>()
            )));
        }

        let json_path = output_prefix.with_extension("json");
        let json = std::fs::read_to_string(&json_path).map_err(|e| {
            TaskLaneError::TranscriptionFailed(format!(
                "whisper.cpp produced no JSON output at {}: {e}",
                json_path.display()
            ))
        })?;
        let _ = std::fs::remove_file(&json_path);
        Ok(json)
    }
}

impl SpeechModel for WhisperModel {
    fn transcribe(&self, source: &Path) -> Result<Transcript> {
        let scratch = self
            .scratch_dir
            .join(format!("tasklane-{}", uuid::Uuid::new_v4().simple()));
        let wav = scratch.with_extension("wav");

        AudioExtractionJob::new(source, &wav).run()?;
        info!(
            source = %source.display(),
            model = %self.model_path.display(),
            "Starting transcription"
        );
        let result = self.run_whisper(&wav, &scratch);
        let _ = std::fs::remove_file(&wav);

        let json = result?;
        debug!(json_len = json.len(), "Parsing whisper output");
        let transcript = parse_whisper_json(&json)?;
        info!(
            segments = transcript.segments.len(),
            duration_secs = transcript.duration_secs(),
            "Transcription complete"
        );
        Ok(transcript)
    }
}

/// Parse whisper.cpp JSON output into a Transcript.
pub fn parse_whisper_json(json_str: &str) -> Result<Transcript> {
    // whisper.cpp JSON format:
    // { "result": { "language": "en" },
    //   "transcription": [ { "offsets": { "from": 0, "to": 2000 }, "text": " Hello world" } ] }
    let value: serde_json::Value = serde_json::from_str(json_str).map_err(|e| {
        TaskLaneError::TranscriptionFailed(format!("failed to parse whisper JSON: {e}"))
    })?;

    let mut segments = Vec::new();
    if let Some(transcription) = value.get("transcription").and_then(|v| v.as_array()) {
        for segment in transcription {
            let text = segment
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if text.is_empty() {
                continue;
            }

            let offset = |key: &str| {
                segment
                    .get("offsets")
                    .and_then(|o| o.get(key))
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0)
                    / 1000.0
            };
            segments.push(TranscriptSegment {
                start: offset("from"),
                end: offset("to"),
                text,
            });
        }
    }

    let language = value
        .get("result")
        .and_then(|r| r.get("language"))
        .and_then(|l| l.as_str())
        .map(String::from);

    Ok(Transcript::from_segments(segments, language))
}

/// Identity of a verified weights file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WhisperSnapshot {
    binary: PathBuf,
    model_path: PathBuf,
    model_size: u64,
    model_modified_nanos: u64,
    weights_sha256: String,
}

/// Provider for [`WhisperModel`].
pub struct WhisperProvider {
    config: TranscriberConfig,
    verified: Mutex<Option<WhisperSnapshot>>,
}

impl WhisperProvider {
    pub fn new(config: TranscriberConfig) -> Self {
        Self {
            config,
            verified: Mutex::new(None),
        }
    }

    fn unavailable(cause: impl Into<String>) -> TaskLaneError {
        TaskLaneError::ModelUnavailable {
            role: ModelRole::Transcription,
            cause: cause.into(),
        }
    }

    fn handle(&self, binary: PathBuf) -> ModelHandle {
        ModelHandle::Speech(Arc::new(WhisperModel {
            binary,
            model_path: self.config.model_path.clone(),
            language: self.config.language.clone(),
            threads: self.config.threads.max(1),
            scratch_dir: self.config.scratch_dir.clone(),
        }))
    }
}

/// Size and modification time of a file, for cheap change detection.
fn file_fingerprint(path: &Path) -> std::io::Result<(u64, u64)> {
    let meta = std::fs::metadata(path)?;
    let modified = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Ok((meta.len(), modified))
}

/// Stream a file through SHA-256.
fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

impl ModelProvider for WhisperProvider {
    fn role(&self) -> ModelRole {
        ModelRole::Transcription
    }

    fn construct(&self) -> Result<ModelHandle> {
        let binary = which::which(&self.config.whisper_binary).map_err(|e| {
            Self::unavailable(format!(
                "whisper.cpp binary not found ({}): {e}",
                self.config.whisper_binary.display()
            ))
        })?;

        let model_path = &self.config.model_path;
        if model_path.as_os_str().is_empty() || !model_path.is_file() {
            return Err(Self::unavailable(format!(
                "whisper weights not found at '{}'",
                model_path.display()
            )));
        }

        info!(model = %model_path.display(), "Verifying whisper weights");
        let (model_size, model_modified_nanos) = file_fingerprint(model_path)
            .map_err(|e| Self::unavailable(format!("cannot stat weights: {e}")))?;
        let digest = sha256_file(model_path)
            .map_err(|e| Self::unavailable(format!("cannot read weights: {e}")))?;
        if let Some(expected) = &self.config.expected_sha256 {
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(Self::unavailable(format!(
                    "weights checksum mismatch: expected {expected}, got {digest}"
                )));
            }
        }

        *self.verified.lock() = Some(WhisperSnapshot {
            binary: binary.clone(),
            model_path: model_path.clone(),
            model_size,
            model_modified_nanos,
            weights_sha256: digest,
        });
        Ok(self.handle(binary))
    }

    fn encode_snapshot(&self, _handle: &ModelHandle) -> Result<Vec<u8>> {
        let verified = self.verified.lock().clone().ok_or_else(|| {
            TaskLaneError::SnapshotWriteFailed {
                role: ModelRole::Transcription,
                reason: "no verified weights to record".into(),
            }
        })?;
        Ok(serde_json::to_vec(&verified)?)
    }

    fn decode_snapshot(&self, bytes: &[u8]) -> Result<ModelHandle> {
        let snapshot: WhisperSnapshot = serde_json::from_slice(bytes)?;
        let stale = |reason: String| TaskLaneError::SnapshotCorrupted {
            role: ModelRole::Transcription,
            reason,
        };

        if snapshot.model_path != self.config.model_path {
            return Err(stale(format!(
                "snapshot is for weights '{}'",
                snapshot.model_path.display()
            )));
        }
        let binary = which::which(&self.config.whisper_binary).map_err(|e| {
            stale(format!(
                "whisper binary '{}' not found: {e}",
                self.config.whisper_binary.display()
            ))
        })?;
        if binary != snapshot.binary {
            return Err(stale(format!(
                "snapshot is for whisper binary '{}'",
                snapshot.binary.display()
            )));
        }
        let current = file_fingerprint(&snapshot.model_path).map_err(|e| stale(e.to_string()))?;
        if current != (snapshot.model_size, snapshot.model_modified_nanos) {
            return Err(stale("weights changed since the snapshot was taken".into()));
        }
        if let Some(expected) = &self.config.expected_sha256 {
            if !expected.eq_ignore_ascii_case(&snapshot.weights_sha256) {
                return Err(stale(
                    "snapshot digest does not match the expected checksum".into(),
                ));
            }
        }

        *self.verified.lock() = Some(snapshot);
        Ok(self.handle(binary))
    }
}
