pub mod config;
pub mod error;
pub mod io;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod stages;

pub use config::{resolve, ConfigError, ConfigOverrides, PresetName, ResolvedConfig, RunOptions, Stage};
pub use error::{PipelineError, PipelineResult};
pub use llm::{ChatBackend, MockBackend, OpenAiClient, OpenAiConfig};
pub use models::{PipelineRun, PipelineState, ProgressEvent};
pub use pipeline::{NoProgress, Orchestrator, ProgressSink};
