use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Stage;

/// Sampling parameters sent with every chat completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Model name (e.g., "gpt-4o")
    pub model: String,
    /// Sampling temperature (0-1)
    pub temperature: f64,
    /// Nucleus sampling mass (0-1)
    pub top_p: f64,
    /// Maximum tokens in the response
    pub max_tokens: u32,
    /// Repetition penalty (-2 to 2)
    pub frequency_penalty: f64,
    /// New-topic penalty (-2 to 2)
    pub presence_penalty: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.3,
            top_p: 0.3,
            max_tokens: 4096,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

impl ModelParams {
    /// Layer an override on top of these parameters.
    ///
    /// `max_tokens` must already be validated as positive; a non-positive
    /// value here is ignored.
    pub fn merged(&self, o: &ParamOverride) -> ModelParams {
        ModelParams {
            model: o.model.clone().unwrap_or_else(|| self.model.clone()),
            temperature: o.temperature.unwrap_or(self.temperature),
            top_p: o.top_p.unwrap_or(self.top_p),
            max_tokens: o
                .max_tokens
                .and_then(|t| u32::try_from(t).ok())
                .filter(|&t| t > 0)
                .unwrap_or(self.max_tokens),
            frequency_penalty: o.frequency_penalty.unwrap_or(self.frequency_penalty),
            presence_penalty: o.presence_penalty.unwrap_or(self.presence_penalty),
        }
    }
}

/// A partial set of model parameters. Unknown field names are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Signed so that non-positive values reach validation instead of failing to parse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

impl ParamOverride {
    pub fn is_empty(&self) -> bool {
        self == &ParamOverride::default()
    }
}

/// Caller-supplied adjustments applied on top of a preset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_build: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    /// Growth factor between retry delays; 1.0 keeps the delay fixed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_score_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_threshold: Option<f64>,
    /// Per-stage parameter overrides, layered after the global ones
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stages: BTreeMap<Stage, ParamOverride>,
}

impl ConfigOverrides {
    /// Parse overrides from a JSON document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The global model-parameter part of the overrides
    pub fn global_params(&self) -> ParamOverride {
        ParamOverride {
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unset_fields() {
        let base = ModelParams::default();
        let merged = base.merged(&ParamOverride {
            temperature: Some(0.05),
            max_tokens: Some(2048),
            ..Default::default()
        });

        assert_eq!(merged.temperature, 0.05);
        assert_eq!(merged.max_tokens, 2048);
        assert_eq!(merged.top_p, base.top_p);
        assert_eq!(merged.model, base.model);
    }

    #[test]
    fn test_unknown_override_field_rejected() {
        let err = ConfigOverrides::from_json(r#"{"temprature": 0.2}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_stage_overrides_parse() {
        let overrides = ConfigOverrides::from_json(
            r#"{"temperature": 0.3, "stages": {"audit": {"temperature": 0.0, "max_tokens": 1024}}}"#,
        )
        .unwrap();

        assert_eq!(overrides.temperature, Some(0.3));
        let audit = &overrides.stages[&Stage::Audit];
        assert_eq!(audit.temperature, Some(0.0));
        assert_eq!(audit.max_tokens, Some(1024));
    }

    #[test]
    fn test_unknown_stage_field_rejected() {
        let result =
            ConfigOverrides::from_json(r#"{"stages": {"audit": {"strictness": "high"}}}"#);
        assert!(result.is_err());
    }
}
