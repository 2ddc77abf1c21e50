use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

/// Hex digest length used inside cache keys
pub const SHORT_HASH_LEN: usize = 16;

/// A paper loaded from disk
#[derive(Debug, Clone)]
pub struct InputDocument {
    pub path: PathBuf,
    pub text: String,
    /// SHA-256 of the text
    pub hash: String,
}

/// Read a UTF-8 text file and hash its contents
pub fn read_input(path: &Path) -> PipelineResult<InputDocument> {
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let hash = content_hash(&text);
    info!(
        "Loaded {:?} ({} characters, hash {})",
        path,
        text.chars().count(),
        &hash[..SHORT_HASH_LEN]
    );
    Ok(InputDocument {
        path: path.to_path_buf(),
        text,
        hash,
    })
}

/// SHA-256 hex digest of a string
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Truncated SHA-256 of a value's JSON serialization
pub fn value_hash<T: Serialize + ?Sized>(value: &T) -> PipelineResult<String> {
    let bytes = serde_json::to_vec(value)?;
    let mut digest = format!("{:x}", Sha256::digest(&bytes));
    digest.truncate(SHORT_HASH_LEN);
    Ok(digest)
}
