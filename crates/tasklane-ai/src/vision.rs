//! Object detection and OCR through sidecar processes.
//!
//! Detection runs a configured command with the frame path appended as the
//! last argument. The command prints a JSON array of detections on stdout:
//!
//! ```text
//! [{"label": "laptop", "confidence": 0.91, "bbox": [12.0, 40.0, 310.0, 260.0]}]
//! ```
//!
//! Text recognition runs `tesseract <frame> stdout tsv` and groups the word
//! rows into lines.

use crate::models::{Deadline, ModelHandle, ModelProvider, VisionModel};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tasklane_core::{
    BoundingBox, Detection, FrameRef, ModelRole, RecognizedText, Result, TaskLaneError,
};
use tracing::{debug, info, warn};

/// Configuration for the sidecar vision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Detector command line, e.g. `yolo-detect --weights yolov8n.pt`.
    /// `None` disables detection; frames then carry text only.
    pub detector_command: Option<String>,
    /// Path or name of the tesseract binary.
    pub tesseract_binary: PathBuf,
    /// Tesseract language pack.
    pub ocr_language: String,
    /// Detections below this confidence are discarded.
    pub min_detection_confidence: f32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            detector_command: None,
            tesseract_binary: PathBuf::from("tesseract"),
            ocr_language: "eng".into(),
            min_detection_confidence: 0.25,
        }
    }
}

/// Resolved sidecar invocations. This is also the snapshot payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ResolvedVision {
    detector: Option<Vec<String>>,
    tesseract: PathBuf,
    ocr_language: String,
    min_detection_confidence: f32,
}

/// Vision model backed by external processes.
#[derive(Debug)]
pub struct SidecarVisionModel {
    resolved: ResolvedVision,
}

/// How often a sidecar with a deadline is checked for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

impl SidecarVisionModel {
    /// Run a sidecar to completion and return its stdout. A child still
    /// running at `deadline` is killed.
    fn run(program: &mut Command, deadline: Deadline) -> std::result::Result<String, String> {
        let mut child = program
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn: {e}"))?;

        // Pipes are drained on their own threads so a chatty child never blocks.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match deadline.remaining() {
            None => child.wait().map_err(|e| format!("wait failed: {e}"))?,
            Some(_) => loop {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) if deadline.expired() => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err("deadline passed, process killed".into());
                    }
                    Ok(None) => std::thread::sleep(POLL_INTERVAL),
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(format!("wait failed: {e}"));
                    }
                }
            },
        };

        let stdout = collect(stdout);
        if !status.success() {
            let stderr = collect(stderr);
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(format!(
                "exited with status {status}: {}",
                stderr.trim().chars().take(300).collect::<String>()
            ));
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl VisionModel for SidecarVisionModel {
    fn detect(&self, frame: &FrameRef, deadline: Deadline) -> Result<Vec<Detection>> {
        let Some(argv) = &self.resolved.detector else {
            return Ok(Vec::new());
        };
        let Some((program, args)) = argv.split_first() else {
            return Ok(Vec::new());
        };

        let stdout = Self::run(
            Command::new(program).args(args).arg(&frame.location),
            deadline,
        )
        .map_err(|e| TaskLaneError::Detection(format!("{}: {e}", frame.name())))?;
        let detections = parse_detections(&stdout, self.resolved.min_detection_confidence)?;
        debug!(frame = %frame.name(), count = detections.len(), "Detections");
        Ok(detections)
    }

    fn recognize_text(&self, frame: &FrameRef, deadline: Deadline) -> Result<Vec<RecognizedText>> {
        let stdout = Self::run(
            Command::new(&self.resolved.tesseract)
                .arg(&frame.location)
                .arg("stdout")
                .args(["-l", &self.resolved.ocr_language])
                .arg("tsv"),
            deadline,
        )
        .map_err(|e| TaskLaneError::TextRecognitionDegraded(format!("{}: {e}", frame.name())))?;
        Ok(parse_tesseract_tsv(&stdout))
    }
}

#[derive(Deserialize)]
struct RawDetection {
    #[serde(alias = "class", alias = "name")]
    label: String,
    #[serde(alias = "score", alias = "conf")]
    confidence: f32,
    #[serde(default, alias = "box", alias = "xyxy")]
    bbox: [f32; 4],
}

/// Parse the detector's JSON array, dropping low-confidence entries.
pub fn parse_detections(json: &str, min_confidence: f32) -> Result<Vec<Detection>> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawDetection> = serde_json::from_str(trimmed)
        .map_err(|e| TaskLaneError::Detection(format!("unparseable detector output: {e}")))?;
    Ok(raw
        .into_iter()
        .map(|d| Detection {
            label: d.label,
            confidence: d.confidence.clamp(0.0, 1.0),
            bounding_box: BoundingBox {
                x1: d.bbox[0],
                y1: d.bbox[1],
                x2: d.bbox[2],
                y2: d.bbox[3],
            },
        })
        .filter(|d| d.confidence >= min_confidence)
        .collect())
}

/// Group tesseract TSV word rows into lines.
///
/// Line confidence is the mean word confidence scaled to [0, 1]. Lines come
/// back in reading order.
pub fn parse_tesseract_tsv(tsv: &str) -> Vec<RecognizedText> {
    // (block, paragraph, line) -> (words, confidence sum)
    let mut lines: Vec<((u32, u32, u32), Vec<String>, f32)> = Vec::new();
    let mut positions: HashMap<(u32, u32, u32), usize> = HashMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let word = cols[11].trim();
        if conf < 0.0 || word.is_empty() {
            continue;
        }
        let key = (
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        let pos = *positions.entry(key).or_insert_with(|| {
            lines.push((key, Vec::new(), 0.0));
            lines.len() - 1
        });
        lines[pos].1.push(word.to_string());
        lines[pos].2 += conf;
    }

    lines
        .into_iter()
        .map(|(_, words, conf_sum)| RecognizedText {
            confidence: (conf_sum / words.len() as f32 / 100.0).clamp(0.0, 1.0),
            text: words.join(" "),
        })
        .collect()
}

/// Provider for [`SidecarVisionModel`].
pub struct SidecarVisionProvider {
    config: VisionConfig,
    /// Most recent model handed out, kept for snapshot encoding.
    built: Mutex<Option<Arc<SidecarVisionModel>>>,
}

impl SidecarVisionProvider {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            config,
            built: Mutex::new(None),
        }
    }

    fn unavailable(cause: impl Into<String>) -> TaskLaneError {
        TaskLaneError::ModelUnavailable {
            role: ModelRole::Vision,
            cause: cause.into(),
        }
    }

    fn resolve(&self) -> Result<ResolvedVision> {
        let tesseract = which::which(&self.config.tesseract_binary).map_err(|e| {
            Self::unavailable(format!(
                "tesseract not found ({}): {e}",
                self.config.tesseract_binary.display()
            ))
        })?;

        let detector = match self.config.detector_command.as_deref().map(str::trim) {
            Some(cmd) if !cmd.is_empty() => {
                let mut argv: Vec<String> = cmd.split_whitespace().map(String::from).collect();
                let program = which::which(&argv[0]).map_err(|e| {
                    Self::unavailable(format!("detector command not found ({}): {e}", argv[0]))
                })?;
                argv[0] = program.to_string_lossy().into_owned();
                Some(argv)
            }
            _ => {
                warn!("No detector command configured; frames will carry text only");
                None
            }
        };

        Ok(ResolvedVision {
            detector,
            tesseract,
            ocr_language: self.config.ocr_language.clone(),
            min_detection_confidence: self.config.min_detection_confidence,
        })
    }

    fn handle(&self, resolved: ResolvedVision) -> ModelHandle {
        let model = Arc::new(SidecarVisionModel { resolved });
        *self.built.lock() = Some(Arc::clone(&model));
        ModelHandle::Vision(model)
    }
}

impl ModelProvider for SidecarVisionProvider {
    fn role(&self) -> ModelRole {
        ModelRole::Vision
    }

    fn construct(&self) -> Result<ModelHandle> {
        let resolved = self.resolve()?;
        let detector = resolved.detector.as_ref().map(|argv| argv.join(" "));
        info!(
            tesseract = %resolved.tesseract.display(),
            detector = detector.as_deref().unwrap_or("none"),
            "Vision sidecars resolved"
        );
        Ok(self.handle(resolved))
    }

    fn encode_snapshot(&self, handle: &ModelHandle) -> Result<Vec<u8>> {
        let built = self.built.lock().clone();
        let model = built
            .filter(|model| handle.same_instance(&ModelHandle::Vision(model.clone())))
            .ok_or_else(|| TaskLaneError::SnapshotWriteFailed {
                role: ModelRole::Vision,
                reason: "handle was not built by this provider".into(),
            })?;
        Ok(serde_json::to_vec(&model.resolved)?)
    }

    /// Accepts a snapshot only if it matches what the current configuration
    /// resolves to, binaries included.
    fn decode_snapshot(&self, bytes: &[u8]) -> Result<ModelHandle> {
        let snapshot: ResolvedVision = serde_json::from_slice(bytes)?;
        let stale = |reason: String| TaskLaneError::SnapshotCorrupted {
            role: ModelRole::Vision,
            reason,
        };

        let current = self.resolve().map_err(|e| stale(e.to_string()))?;
        if current.tesseract != snapshot.tesseract {
            return Err(stale(format!(
                "snapshot is for tesseract '{}'",
                snapshot.tesseract.display()
            )));
        }
        if current.detector != snapshot.detector {
            return Err(stale("detector command changed".into()));
        }
        if current != snapshot {
            return Err(stale("vision settings changed".into()));
        }

        Ok(self.handle(snapshot))
    }
}
