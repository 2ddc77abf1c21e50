use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{PresetName, ResolvedConfig, Stage};
use crate::metrics::QualityMetrics;

/// Maximum characters carried in a progress preview
pub const PREVIEW_CHARS: usize = 500;

/// Output of one stage invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: Stage,
    /// Stage output as stored in the cache and intermediate file
    pub payload: Value,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub cache_key: String,
    /// Whether the payload was served from the cache
    #[serde(default)]
    pub from_cache: bool,
}

/// Timing and call accounting for a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    pub total_duration_ms: u64,
    pub stage_durations_ms: BTreeMap<Stage, u64>,
    pub api_calls: u64,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub cache_hits: u64,
    /// Approximation: characters / 4
    pub estimated_tokens: u64,
    /// Approximation from a fixed per-model rate table
    pub estimated_cost: f64,
}

/// Record of one pipeline run, persisted once at the end (success or failure)
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub input_hash: String,
    pub preset_name: PresetName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_file: Option<PathBuf>,
    pub config: ResolvedConfig,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub state: PipelineState,
    /// Completed stages, in execution order
    pub stage_results: Vec<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
    pub performance_metrics: PerformanceMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
}

impl PipelineRun {
    pub fn new(input_hash: String, config: ResolvedConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            input_hash,
            preset_name: config.preset,
            input_file: None,
            config,
            started_at: Utc::now(),
            finished_at: None,
            state: PipelineState::Idle,
            stage_results: Vec::new(),
            quality_metrics: None,
            performance_metrics: PerformanceMetrics::default(),
            final_output: None,
            error: None,
            failed_stage: None,
        }
    }

    pub fn record(&mut self, result: StageResult) {
        self.performance_metrics
            .stage_durations_ms
            .insert(result.stage_name, result.duration_ms);
        if result.from_cache {
            self.performance_metrics.cache_hits += 1;
        }
        self.stage_results.push(result);
    }

    pub fn result_for(&self, stage: Stage) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage_name == stage)
    }

    pub fn completed_stages(&self) -> Vec<Stage> {
        self.stage_results.iter().map(|r| r.stage_name).collect()
    }
}

/// Where a run is in the linear stage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running(Stage),
    Done,
    /// Absorbing; carries the stage that was running, if any
    Failed(Option<Stage>),
}

impl PipelineState {
    /// Move to the next state. `Done` and `Failed` do not move.
    pub fn advance(self) -> PipelineState {
        match self {
            PipelineState::Idle => PipelineState::Running(Stage::Split),
            PipelineState::Running(stage) => match stage.next() {
                Some(next) => PipelineState::Running(next),
                None => PipelineState::Done,
            },
            terminal => terminal,
        }
    }

    pub fn fail(self) -> PipelineState {
        match self {
            PipelineState::Running(stage) => PipelineState::Failed(Some(stage)),
            PipelineState::Failed(stage) => PipelineState::Failed(stage),
            _ => PipelineState::Failed(None),
        }
    }

    pub fn current_stage(self) -> Option<Stage> {
        match self {
            PipelineState::Running(stage) | PipelineState::Failed(Some(stage)) => Some(stage),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Running(stage) => write!(f, "running {stage}"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed(Some(stage)) => write!(f, "failed at {stage}"),
            PipelineState::Failed(None) => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Started,
    Completed,
    Cached,
    Failed,
}

/// Emitted before and after each stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: usize,
    pub name: String,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl ProgressEvent {
    pub fn started(stage: Stage) -> Self {
        Self {
            step: stage.step(),
            name: stage.display_name().to_string(),
            status: ProgressStatus::Started,
            preview: None,
        }
    }

    pub fn finished(stage: Stage, from_cache: bool, output: &str) -> Self {
        Self {
            step: stage.step(),
            name: stage.display_name().to_string(),
            status: if from_cache {
                ProgressStatus::Cached
            } else {
                ProgressStatus::Completed
            },
            preview: Some(preview(output)),
        }
    }

    pub fn failed(stage: Stage, error: &str) -> Self {
        Self {
            step: stage.step(),
            name: stage.display_name().to_string(),
            status: ProgressStatus::Failed,
            preview: Some(preview(error)),
        }
    }
}

/// First `PREVIEW_CHARS` characters, with an ellipsis when cut
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
