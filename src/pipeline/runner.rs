use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{PresetName, RunOptions, Stage};
use crate::error::PipelineResult;
use crate::io::{file_timestamp, value_hash, write_json_pretty};
use crate::models::StageResult;

/// A stage's typed value plus the record kept in the run
#[derive(Debug)]
pub struct StageOutput<T> {
    pub value: T,
    pub result: StageResult,
}

/// Wraps a single stage with cache lookup, timing, logging and persistence.
///
/// Cache entries live at `<result_dir>/cache/<stage>_<hash>_<preset>.json`
/// where the hash covers everything the stage consumes, including its
/// resolved parameters. There is no locking: concurrent writers of the same
/// key overwrite each other.
#[derive(Debug, Clone)]
pub struct StageRunner {
    preset: PresetName,
    result_dir: PathBuf,
    cache_dir: PathBuf,
    enable_caching: bool,
    save_intermediate: bool,
}

impl StageRunner {
    pub fn new(preset: PresetName, options: &RunOptions) -> Self {
        Self {
            preset,
            result_dir: options.result_dir.clone(),
            cache_dir: options.cache_dir(),
            enable_caching: options.enable_caching,
            save_intermediate: options.save_intermediate,
        }
    }

    pub fn cache_key<I: Serialize + ?Sized>(&self, stage: Stage, inputs: &I) -> PipelineResult<String> {
        Ok(format!("{}_{}_{}", stage, value_hash(inputs)?, self.preset))
    }

    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    /// Run `compute` unless a cached value exists for these inputs
    pub async fn run<T, I, F, Fut>(
        &self,
        stage: Stage,
        inputs: &I,
        compute: F,
    ) -> PipelineResult<StageOutput<T>>
    where
        T: Serialize + DeserializeOwned,
        I: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let cache_key = self.cache_key(stage, inputs)?;
        let started = Instant::now();

        if self.enable_caching {
            if let Some((value, payload)) = self.load_cached::<T>(stage, &cache_key) {
                info!(stage = %stage, "Step {}/7 {}: served from cache ({})", stage.step(), stage.display_name(), cache_key);
                let result = StageResult {
                    stage_name: stage,
                    payload,
                    duration_ms: started.elapsed().as_millis() as u64,
                    success: true,
                    timestamp: Utc::now(),
                    cache_key,
                    from_cache: true,
                };
                self.write_intermediate(&result)?;
                return Ok(StageOutput { value, result });
            }
        }

        info!(stage = %stage, "Step {}/7 {}: running", stage.step(), stage.display_name());
        let value = match compute().await {
            Ok(value) => value,
            Err(e) => {
                error!(stage = %stage, "Step {}/7 {} failed after {:.2}s: {}", stage.step(), stage.display_name(), started.elapsed().as_secs_f64(), e);
                return Err(e);
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let payload = serde_json::to_value(&value)?;

        if self.enable_caching {
            write_json_pretty(&self.cache_path(&cache_key), &payload)?;
            debug!(stage = %stage, "Cached as {}", cache_key);
        }

        let result = StageResult {
            stage_name: stage,
            payload,
            duration_ms,
            success: true,
            timestamp: Utc::now(),
            cache_key,
            from_cache: false,
        };
        self.write_intermediate(&result)?;
        info!(stage = %stage, "Step {}/7 {}: done in {:.2}s", stage.step(), stage.display_name(), duration_ms as f64 / 1000.0);

        Ok(StageOutput { value, result })
    }

    /// A cache entry that cannot be read or decoded counts as a miss
    fn load_cached<T: DeserializeOwned>(&self, stage: Stage, key: &str) -> Option<(T, Value)> {
        let path = self.cache_path(key);
        if !path.is_file() {
            return None;
        }
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(stage = %stage, "Ignoring unreadable cache entry {:?}: {}", path, e);
                return None;
            }
        };
        let payload: Value = match serde_json::from_str(&text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(stage = %stage, "Ignoring corrupt cache entry {:?}: {}", path, e);
                return None;
            }
        };
        match serde_json::from_value::<T>(payload.clone()) {
            Ok(value) => Some((value, payload)),
            Err(e) => {
                warn!(stage = %stage, "Ignoring cache entry {:?} with unexpected shape: {}", path, e);
                None
            }
        }
    }

    fn write_intermediate(&self, result: &StageResult) -> PipelineResult<()> {
        if !self.save_intermediate {
            return Ok(());
        }
        let path = intermediate_path(&self.result_dir, result);
        write_json_pretty(&path, result)?;
        debug!("Intermediate result written to {:?}", path);
        Ok(())
    }
}

/// `<result_dir>/<n>_<stage>_<timestamp>.json`
pub fn intermediate_path(result_dir: &Path, result: &StageResult) -> PathBuf {
    result_dir.join(format!(
        "{}_{}_{}.json",
        result.stage_name.step(),
        result.stage_name,
        file_timestamp(result.timestamp)
    ))
}
