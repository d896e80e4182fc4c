//! Content-addressed artifact storage.
//!
//! Every file a run writes is named after the run's [`ContentIdentity`] key,
//! so re-running on the same bytes overwrites the same files.
//!
//! Format:
//! ```text
//! output/
//!   transcripts/{key}_transcript.json
//!   frames/{key}_frame_0001.png ...
//!   visual_data/{key}_analysis.json   # every outcome, tombstones included
//!   sops/{key}_sop.txt
//!   {key}_summary.json
//! ```

use crate::pipeline::RunSummary;
use crate::synthesis::VisualSummary;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tasklane_core::{
    AnalysisBatchResult, ContentIdentity, FrameRef, Result, TaskLaneError, Transcript,
};
use tempfile::NamedTempFile;
use tracing::debug;

/// Persisted record of a frame analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub identity: ContentIdentity,
    pub sampling_rate_hz: f64,
    pub frames_total: usize,
    pub frames_analyzed: usize,
    pub frames_failed: usize,
    pub visual_summary: VisualSummary,
    pub result: AnalysisBatchResult,
}

/// Manages artifact storage under an output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.root.join("transcripts")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    pub fn visual_data_dir(&self) -> PathBuf {
        self.root.join("visual_data")
    }

    pub fn sops_dir(&self) -> PathBuf {
        self.root.join("sops")
    }

    pub fn transcript_path(&self, id: &ContentIdentity) -> PathBuf {
        self.transcripts_dir()
            .join(format!("{}_transcript.json", id.key()))
    }

    pub fn analysis_path(&self, id: &ContentIdentity) -> PathBuf {
        self.visual_data_dir()
            .join(format!("{}_analysis.json", id.key()))
    }

    pub fn sop_path(&self, id: &ContentIdentity) -> PathBuf {
        self.sops_dir().join(format!("{}_sop.txt", id.key()))
    }

    pub fn summary_path(&self, id: &ContentIdentity) -> PathBuf {
        self.root.join(format!("{}_summary.json", id.key()))
    }

    /// Create the output directory tree.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.transcripts_dir(),
            self.frames_dir(),
            self.visual_data_dir(),
            self.sops_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn save_transcript(
        &self,
        id: &ContentIdentity,
        transcript: &Transcript,
    ) -> Result<PathBuf> {
        let path = self.transcript_path(id);
        write_json(&path, transcript)?;
        Ok(path)
    }

    pub fn load_transcript(&self, id: &ContentIdentity) -> Result<Transcript> {
        read_json(&self.transcript_path(id))
    }

    pub fn save_analysis(
        &self,
        id: &ContentIdentity,
        artifact: &AnalysisArtifact,
    ) -> Result<PathBuf> {
        let path = self.analysis_path(id);
        write_json(&path, artifact)?;
        Ok(path)
    }

    pub fn load_analysis(&self, id: &ContentIdentity) -> Result<AnalysisArtifact> {
        read_json(&self.analysis_path(id))
    }

    pub fn save_sop(&self, id: &ContentIdentity, sop_text: &str) -> Result<PathBuf> {
        let path = self.sop_path(id);
        write_atomic(&path, sop_text.as_bytes())?;
        Ok(path)
    }

    pub fn save_summary(&self, id: &ContentIdentity, summary: &RunSummary) -> Result<PathBuf> {
        let path = self.summary_path(id);
        write_json(&path, summary)?;
        Ok(path)
    }

    pub fn load_summary(&self, id: &ContentIdentity) -> Result<RunSummary> {
        read_json(&self.summary_path(id))
    }

    /// Check if an SOP exists for this identity.
    pub fn has_sop(&self, id: &ContentIdentity) -> bool {
        self.sop_path(id).exists()
    }

    /// Delete extracted frame files. Missing files are skipped.
    pub fn remove_frames(&self, frames: &[FrameRef]) -> Result<usize> {
        let mut removed = 0;
        for frame in frames {
            match std::fs::remove_file(&frame.location) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(removed, "Removed extracted frames");
        Ok(removed)
    }

    /// Delete an intermediate artifact if present.
    pub fn discard(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        TaskLaneError::Serialization(format!("failed to read {}: {e}", path.display()))
    })
}

/// Write-then-rename, so a reader sees either the old file or the new one.
/// Each writer gets its own temp file, so concurrent writers never share one.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote artifact");
    Ok(())
}
