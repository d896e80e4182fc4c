//! Narrative synthesis: turning a transcript and frame analyses into an SOP.
//!
//! The synthesizer is a network call to an OpenAI-compatible chat-completions
//! endpoint. No frame images are sent, only the transcript text and a compact
//! summary of what the frames contained.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};
use tasklane_core::{AnalysisBatchResult, FrameAnalysis, Result, TaskLaneError, Transcript};
use tracing::{debug, info};

/// Detected text entries included in the prompt, at most.
const MAX_PROMPT_TEXT_ENTRIES: usize = 200;

const SYSTEM_PROMPT: &str = "You are an expert technical writer specializing in creating clear, \
step-by-step Standard Operating Procedures (SOPs). You excel at converting video content into \
structured, actionable instructions.";

/// Drafts procedure text from a transcript and frame analyses.
#[async_trait]
pub trait NarrativeSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        transcript: &Transcript,
        analysis: &AnalysisBatchResult,
    ) -> Result<String>;
}

/// Aggregate view of what the analyzed frames contained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualSummary {
    pub total_frames: usize,
    pub total_objects: usize,
    pub total_text_fragments: usize,
    /// Object label -> number of detections, sorted by label.
    pub object_counts: BTreeMap<String, usize>,
    pub unique_objects: Vec<String>,
    /// Distinct text fragments in order of first appearance.
    pub detected_text: Vec<String>,
    pub avg_objects_per_frame: f64,
    pub avg_text_per_frame: f64,
}

impl VisualSummary {
    /// Summarize successful frame analyses.
    pub fn from_analyses<'a>(analyses: impl IntoIterator<Item = &'a FrameAnalysis>) -> Self {
        let mut summary = Self::default();
        let mut seen_text = HashSet::new();
        for analysis in analyses {
            summary.total_frames += 1;
            summary.total_objects += analysis.detections.len();
            summary.total_text_fragments += analysis.text_fragments.len();
            for detection in &analysis.detections {
                *summary
                    .object_counts
                    .entry(detection.label.clone())
                    .or_insert(0) += 1;
            }
            for text in &analysis.text_fragments {
                if seen_text.insert(text.as_str()) {
                    summary.detected_text.push(text.clone());
                }
            }
        }

        summary.unique_objects = summary.object_counts.keys().cloned().collect();
        if summary.total_frames > 0 {
            let frames = summary.total_frames as f64;
            summary.avg_objects_per_frame = summary.total_objects as f64 / frames;
            summary.avg_text_per_frame = summary.total_text_fragments as f64 / frames;
        }
        summary
    }

    /// One-line description used in prompts.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.object_counts.is_empty() {
            let objects: Vec<String> = self
                .object_counts
                .iter()
                .map(|(label, count)| format!("{label} ({count})"))
                .collect();
            parts.push(format!("Objects detected: {}", objects.join(", ")));
        }
        if !self.detected_text.is_empty() {
            let shown: Vec<&str> = self
                .detected_text
                .iter()
                .take(MAX_PROMPT_TEXT_ENTRIES)
                .map(String::as_str)
                .collect();
            parts.push(format!("Text detected: {}", shown.join(", ")));
        }
        if parts.is_empty() {
            "No significant visual elements detected".into()
        } else {
            parts.join("; ")
        }
    }
}

/// Build the user prompt for SOP synthesis.
///
/// Tombstones present in `analysis` are listed so the writer knows which
/// moments of the video have no visual evidence.
pub fn build_prompt(transcript: &Transcript, analysis: &AnalysisBatchResult) -> String {
    let transcript_text = transcript.plain_text();
    let transcript_text = if transcript_text.is_empty() {
        "(no speech detected)".to_string()
    } else {
        transcript_text
    };
    let visual = VisualSummary::from_analyses(analysis.successes()).describe();

    let mut gaps = String::new();
    for failure in analysis.failures() {
        gaps.push_str(&format!(
            "- Frame {} ({}): no visual data ({})\n",
            failure.index, failure.frame, failure.reason
        ));
    }
    let gaps = if gaps.is_empty() {
        String::new()
    } else {
        format!("\nFRAMES WITHOUT VISUAL DATA:\n{gaps}")
    };

    format!(
        "You are an expert technical writer creating a Standard Operating Procedure (SOP) from video content.

VIDEO TRANSCRIPT:
{transcript_text}

VISUAL ANALYSIS:
{visual}
{gaps}
TASK: Create a clear, numbered step-by-step SOP based on the video content. Consider both the audio narration and visual elements.

REQUIREMENTS:
1. Use numbered steps (1, 2, 3, etc.)
2. Be specific and actionable
3. Include relevant visual cues when mentioned
4. Use clear, professional language
5. Keep steps concise but complete
6. Focus on the main workflow/task being demonstrated

FORMAT:
1. [First step description]
2. [Second step description]
3. [Continue with numbered steps...]

Generate the SOP now:
"
    )
}

/// A numbered step parsed out of SOP text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SopStep {
    pub step_number: u32,
    pub description: String,
}

/// Parse lines of the form `N. description` into steps.
pub fn extract_steps(sop_text: &str) -> Vec<SopStep> {
    sop_text
        .lines()
        .filter_map(|line| {
            let (number, rest) = line.trim().split_once('.')?;
            let step_number = number.trim().parse().ok()?;
            let description = rest.trim();
            if description.is_empty() {
                return None;
            }
            Some(SopStep {
                step_number,
                description: description.to_string(),
            })
        })
        .collect()
}

/// Configuration for the chat-completions synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// API endpoint URL.
    pub api_url: String,
    /// API key. Never written to disk.
    #[serde(skip)]
    pub api_key: String,
    /// Model to use.
    pub model: String,
    /// Maximum tokens for the response.
    pub max_tokens: u32,
    pub temperature: f32,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".into(),
            api_key: String::new(),
            model: "gpt-4o".into(),
            max_tokens: 2000,
            temperature: 0.3,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the first choice's text out of a chat-completions response body.
fn completion_text(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| TaskLaneError::SynthesisFailed(format!("unparseable response: {e}")))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| TaskLaneError::SynthesisFailed("response contained no text".into()))
}

/// OpenAI-compatible chat-completions client.
pub struct ChatCompletionsSynthesizer {
    config: SynthesisConfig,
    client: reqwest::Client,
}

impl ChatCompletionsSynthesizer {
    /// Create a synthesizer. Fails when no API key is configured.
    pub fn new(config: SynthesisConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(TaskLaneError::InvalidParameter(
                "an API key is required for SOP synthesis".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TaskLaneError::InvalidParameter(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }
}

#[async_trait]
impl NarrativeSynthesizer for ChatCompletionsSynthesizer {
    async fn synthesize(
        &self,
        transcript: &Transcript,
        analysis: &AnalysisBatchResult,
    ) -> Result<String> {
        let prompt = build_prompt(transcript, analysis);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        info!(model = %self.config.model, prompt_chars = prompt.len(), "Requesting SOP draft");
        let start = Instant::now();
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| TaskLaneError::SynthesisFailed(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TaskLaneError::SynthesisFailed(format!("reading response: {e}")))?;
        if !status.is_success() {
            return Err(TaskLaneError::SynthesisFailed(format!(
                "API error ({status}): {}",
                body.chars().take(500).collect::<String>()
            )));
        }

        let text = completion_text(&body)?;
        debug!(
            chars = text.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "SOP draft received"
        );
        Ok(text)
    }
}
