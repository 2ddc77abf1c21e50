use std::path::PathBuf;

use thiserror::Error;

use crate::config::{ConfigError, Stage};
use crate::llm::LlmError;

/// Errors surfaced by a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("{stage} stage: external call failed after {attempts} attempt(s): {source}")]
    ExternalCall {
        stage: Stage,
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("{stage} stage: parse error: {message}")]
    Parse { stage: Stage, message: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stage the error is attributed to, when there is one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ExternalCall { stage, .. } | Self::Parse { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
