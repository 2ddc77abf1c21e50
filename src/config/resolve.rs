use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::{ConfigOverrides, ModelParams, ParamOverride, Preset, PresetName, Stage};

const PROBABILITY: (f64, f64) = (0.0, 1.0);
const PENALTY: (f64, f64) = (-2.0, 2.0);
const BACKOFF_FACTOR: (f64, f64) = (1.0, 10.0);

/// Configuration problems, always raised before any external call
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown preset: {0} (available: fast, balanced, precision, research)")]
    UnknownPreset(String),

    #[error("{scope}: {field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        scope: String,
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{scope}: {field} must be a positive integer, got {value}")]
    NotPositive {
        scope: String,
        field: &'static str,
        value: i64,
    },
}

/// Score thresholds compared against the advisory heuristics
#[derive(Debug, Clone, Serialize)]
pub struct Thresholds {
    pub audit_score: f64,
    pub coherence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            audit_score: 0.7,
            coherence: 0.75,
        }
    }
}

/// A fully validated configuration for one run
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub preset: PresetName,
    /// Global parameters (preset base plus global overrides)
    pub params: ModelParams,
    /// Per-stage layer applied on top of `params`
    pub stage_overrides: BTreeMap<Stage, ParamOverride>,
    pub max_workers: usize,
    pub parallel_build: bool,
    pub retry_attempts: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// 1.0 means a fixed delay; larger values grow it after each failure
    pub retry_backoff_factor: f64,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    pub thresholds: Thresholds,
}

impl ResolvedConfig {
    /// Parameters for one stage: global values with the stage's keys on top
    pub fn stage_params(&self, stage: Stage) -> ModelParams {
        match self.stage_overrides.get(&stage) {
            Some(o) => self.params.merged(o),
            None => self.params.clone(),
        }
    }
}

/// Resolve a named preset plus optional overrides into a validated config.
///
/// Every bound is checked before anything is returned; a single violation
/// rejects the whole resolution.
pub fn resolve(
    preset_name: &str,
    overrides: Option<&ConfigOverrides>,
) -> Result<ResolvedConfig, ConfigError> {
    let preset_name: PresetName = preset_name.parse()?;
    resolve_preset(preset_name, overrides)
}

pub fn resolve_preset(
    preset_name: PresetName,
    overrides: Option<&ConfigOverrides>,
) -> Result<ResolvedConfig, ConfigError> {
    let preset = Preset::get(preset_name);
    let empty = ConfigOverrides::default();
    let overrides = overrides.unwrap_or(&empty);

    let global = overrides.global_params();
    validate_override("global", &global)?;

    let mut stage_overrides = preset.stage_overrides.clone();
    for (stage, o) in &overrides.stages {
        validate_override(stage.as_str(), o)?;
        let layered = stage_overrides
            .remove(stage)
            .map(|existing| layer(&existing, o))
            .unwrap_or_else(|| o.clone());
        stage_overrides.insert(*stage, layered);
    }

    let max_workers = match overrides.max_workers {
        Some(n) if n < 1 => {
            return Err(ConfigError::NotPositive {
                scope: "global".to_string(),
                field: "max_workers",
                value: n,
            });
        }
        Some(n) => n as usize,
        None => preset.max_workers,
    };

    let retry_attempts = match overrides.retry_attempts {
        Some(n) if n < 1 || n > u32::MAX as i64 => {
            return Err(ConfigError::NotPositive {
                scope: "global".to_string(),
                field: "retry_attempts",
                value: n,
            });
        }
        Some(n) => n as u32,
        None => 3,
    };

    let retry_backoff_factor = overrides.retry_backoff_factor.unwrap_or(1.0);
    check_range("global", "retry_backoff_factor", retry_backoff_factor, BACKOFF_FACTOR)?;

    let mut thresholds = Thresholds::default();
    if let Some(t) = overrides.audit_score_threshold {
        thresholds.audit_score = t;
    }
    if let Some(t) = overrides.coherence_threshold {
        thresholds.coherence = t;
    }
    check_range("global", "audit_score_threshold", thresholds.audit_score, PROBABILITY)?;
    check_range("global", "coherence_threshold", thresholds.coherence, PROBABILITY)?;

    let config = ResolvedConfig {
        preset: preset_name,
        params: preset.params.merged(&global),
        stage_overrides,
        max_workers,
        parallel_build: overrides.parallel_build.unwrap_or(true),
        retry_attempts,
        retry_delay: Duration::from_millis(overrides.retry_delay_ms.unwrap_or(1000)),
        retry_backoff_factor,
        request_timeout: Duration::from_secs(60),
        thresholds,
    };

    validate_params("global", &config.params)?;
    for stage in Stage::ALL {
        validate_params(stage.as_str(), &config.stage_params(stage))?;
    }

    Ok(config)
}

/// Stage-level layering: keys in `top` replace keys in `base`
fn layer(base: &ParamOverride, top: &ParamOverride) -> ParamOverride {
    ParamOverride {
        model: top.model.clone().or_else(|| base.model.clone()),
        temperature: top.temperature.or(base.temperature),
        top_p: top.top_p.or(base.top_p),
        max_tokens: top.max_tokens.or(base.max_tokens),
        frequency_penalty: top.frequency_penalty.or(base.frequency_penalty),
        presence_penalty: top.presence_penalty.or(base.presence_penalty),
    }
}

fn validate_override(scope: &str, o: &ParamOverride) -> Result<(), ConfigError> {
    if let Some(v) = o.temperature {
        check_range(scope, "temperature", v, PROBABILITY)?;
    }
    if let Some(v) = o.top_p {
        check_range(scope, "top_p", v, PROBABILITY)?;
    }
    if let Some(v) = o.frequency_penalty {
        check_range(scope, "frequency_penalty", v, PENALTY)?;
    }
    if let Some(v) = o.presence_penalty {
        check_range(scope, "presence_penalty", v, PENALTY)?;
    }
    if let Some(v) = o.max_tokens {
        if v < 1 || v > u32::MAX as i64 {
            return Err(ConfigError::NotPositive {
                scope: scope.to_string(),
                field: "max_tokens",
                value: v,
            });
        }
    }
    Ok(())
}

fn validate_params(scope: &str, p: &ModelParams) -> Result<(), ConfigError> {
    check_range(scope, "temperature", p.temperature, PROBABILITY)?;
    check_range(scope, "top_p", p.top_p, PROBABILITY)?;
    check_range(scope, "frequency_penalty", p.frequency_penalty, PENALTY)?;
    check_range(scope, "presence_penalty", p.presence_penalty, PENALTY)?;
    if p.max_tokens == 0 {
        return Err(ConfigError::NotPositive {
            scope: scope.to_string(),
            field: "max_tokens",
            value: 0,
        });
    }
    Ok(())
}

fn check_range(
    scope: &str,
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), ConfigError> {
    // NaN fails both comparisons and is rejected here
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            scope: scope.to_string(),
            field,
            value,
            min,
            max,
        })
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_balanced_defaults() {
        let config = resolve("balanced", None).unwrap();
        assert_eq!(config.preset, PresetName::Balanced);
        assert_eq!(config.params.model, "gpt-4o");
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_backoff_factor, 1.0);
    }

    #[test]
    fn test_backoff_factor_bounds() {
        let overrides = ConfigOverrides {
            retry_backoff_factor: Some(2.0),
            ..Default::default()
        };
        let config = resolve("precision", Some(&overrides)).unwrap();
        assert_eq!(config.retry_backoff_factor, 2.0);

        let overrides = ConfigOverrides {
            retry_backoff_factor: Some(0.5),
            ..Default::default()
        };
        let err = resolve("precision", Some(&overrides)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange { field: "retry_backoff_factor", .. }
        ));
    }

    #[test]
    fn test_stage_params_override_global() {
        let config = resolve("balanced", None).unwrap();
        let audit = config.stage_params(Stage::Audit);
        assert_eq!(audit.temperature, 0.05);
        assert_eq!(audit.max_tokens, 3072);
        assert_eq!(audit.model, "gpt-4o");

        let edit1 = config.stage_params(Stage::EditPass1);
        assert_eq!(edit1.frequency_penalty, 0.2);
    }

    #[test]
    fn test_fast_with_high_temperature_rejected() {
        let overrides = ConfigOverrides {
            temperature: Some(1.5),
            ..Default::default()
        };
        let err = resolve("fast", Some(&overrides)).unwrap_err();
        match err {
            ConfigError::OutOfRange { field, value, .. } => {
                assert_eq!(field, "temperature");
                assert_eq!(value, 1.5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_every_preset_rejects_bad_bounds() {
        let bad = [
            ConfigOverrides { temperature: Some(-0.1), ..Default::default() },
            ConfigOverrides { top_p: Some(1.01), ..Default::default() },
            ConfigOverrides { max_tokens: Some(0), ..Default::default() },
            ConfigOverrides { max_tokens: Some(-5), ..Default::default() },
            ConfigOverrides { audit_score_threshold: Some(2.0), ..Default::default() },
            ConfigOverrides { coherence_threshold: Some(-1.0), ..Default::default() },
            ConfigOverrides { temperature: Some(f64::NAN), ..Default::default() },
        ];
        for preset in PresetName::ALL {
            for overrides in &bad {
                assert!(
                    resolve_preset(preset, Some(overrides)).is_err(),
                    "{preset} accepted {overrides:?}"
                );
            }
        }
    }

    #[test]
    fn test_stage_override_validated() {
        let mut overrides = ConfigOverrides::default();
        overrides.stages.insert(
            Stage::GlobalCheck,
            ParamOverride {
                top_p: Some(3.0),
                ..Default::default()
            },
        );
        let err = resolve("research", Some(&overrides)).unwrap_err();
        assert!(err.to_string().starts_with("global_check"));
    }

    #[test]
    fn test_stage_override_layers_on_preset_table() {
        let mut overrides = ConfigOverrides::default();
        overrides.stages.insert(
            Stage::Audit,
            ParamOverride {
                model: Some("gpt-4".to_string()),
                ..Default::default()
            },
        );
        let config = resolve("balanced", Some(&overrides)).unwrap();
        let audit = config.stage_params(Stage::Audit);
        assert_eq!(audit.model, "gpt-4");
        assert_eq!(audit.temperature, 0.05);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(
            resolve("turbo", None),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let overrides = ConfigOverrides {
            max_workers: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            resolve("fast", Some(&overrides)),
            Err(ConfigError::NotPositive { field: "max_workers", .. })
        ));
    }
}
