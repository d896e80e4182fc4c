//! Content-addressed run identity.
//!
//! Every artifact a run writes is named `{stem}_{digest_prefix}_...`, where the
//! digest is a SHA-256 of the full input. Byte-identical inputs therefore map
//! onto the same artifact set, and a retry overwrites instead of duplicating.

use crate::defaults::DIGEST_PREFIX_LEN;
use crate::error::{Result, TaskLaneError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

/// Stable identity of one input video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentIdentity {
    /// Sanitized base name of the input file.
    pub stem: String,
    /// Full lowercase hex SHA-256 of the input bytes.
    pub digest: String,
}

impl ContentIdentity {
    /// Build an identity from an already-computed digest.
    pub fn new(stem: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            digest: digest.into(),
        }
    }

    /// Fixed-width digest prefix used in filenames.
    /// Counts characters, never splitting a multi-byte one.
    pub fn digest_prefix(&self) -> &str {
        match self.digest.char_indices().nth(DIGEST_PREFIX_LEN) {
            Some((end, _)) => &self.digest[..end],
            None => &self.digest,
        }
    }

    /// Artifact namespace: `{stem}_{digest_prefix}`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.stem, self.digest_prefix())
    }
}

/// Hash the full contents of `path` and derive its identity.
pub fn compute_identity(path: &Path) -> Result<ContentIdentity> {
    let unreadable = |source: std::io::Error| TaskLaneError::SourceUnreadable {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(unreadable)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf).map_err(unreadable)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = format!("{:x}", hasher.finalize());
    let raw_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ContentIdentity::new(sanitize_stem(&raw_stem), digest))
}

/// Reduce a file stem to characters safe for artifact names.
///
/// Keeps alphanumerics, space, `-` and `_`, trims trailing whitespace and
/// turns spaces into underscores. An empty result falls back to `video`.
pub fn sanitize_stem(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let cleaned = kept.trim_end().replace(' ', "_");
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}
