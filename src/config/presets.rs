use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{ConfigError, ModelParams, ParamOverride, Stage};

/// Named quality/cost/latency trade-off points
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    Fast,
    #[default]
    Balanced,
    Precision,
    Research,
}

impl PresetName {
    pub const ALL: [PresetName; 4] = [
        PresetName::Fast,
        PresetName::Balanced,
        PresetName::Precision,
        PresetName::Research,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PresetName::Fast => "fast",
            PresetName::Balanced => "balanced",
            PresetName::Precision => "precision",
            PresetName::Research => "research",
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresetName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetName::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}

/// A static parameter bundle
#[derive(Debug, Clone, Serialize)]
pub struct Preset {
    pub name: PresetName,
    pub label: &'static str,
    pub description: &'static str,
    pub params: ModelParams,
    pub max_workers: usize,
    /// Relative cost factor used by the cost forecast
    pub cost_multiplier: f64,
    pub stage_overrides: BTreeMap<Stage, ParamOverride>,
}

impl Preset {
    pub fn get(name: PresetName) -> Preset {
        match name {
            PresetName::Fast => Preset {
                name,
                label: "Fast Processing",
                description: "Quick draft analysis",
                params: ModelParams {
                    model: "gpt-3.5-turbo".to_string(),
                    temperature: 0.4,
                    top_p: 0.5,
                    ..ModelParams::default()
                },
                max_workers: 5,
                cost_multiplier: 1.0,
                stage_overrides: BTreeMap::new(),
            },
            PresetName::Balanced => Preset {
                name,
                label: "Balanced",
                description: "Default balanced processing",
                params: ModelParams {
                    temperature: 0.2,
                    top_p: 0.3,
                    ..ModelParams::default()
                },
                max_workers: 3,
                cost_multiplier: 1.0,
                stage_overrides: stage_optimized(),
            },
            PresetName::Precision => Preset {
                name,
                label: "High Precision",
                description: "Publication quality analysis",
                params: ModelParams {
                    temperature: 0.1,
                    top_p: 0.2,
                    ..ModelParams::default()
                },
                max_workers: 2,
                cost_multiplier: 1.2,
                stage_overrides: stage_optimized(),
            },
            PresetName::Research => Preset {
                name,
                label: "Research Grade",
                description: "Maximum quality for research",
                params: ModelParams {
                    temperature: 0.05,
                    top_p: 0.1,
                    max_tokens: 8192,
                    ..ModelParams::default()
                },
                max_workers: 1,
                cost_multiplier: 1.5,
                stage_overrides: stage_optimized(),
            },
        }
    }

    pub fn all() -> Vec<Preset> {
        PresetName::ALL.into_iter().map(Preset::get).collect()
    }
}

fn sampling(temperature: f64, top_p: f64, max_tokens: i64) -> ParamOverride {
    ParamOverride {
        temperature: Some(temperature),
        top_p: Some(top_p),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

/// Stage-tuned sampling: low temperature where accuracy matters (audit,
/// global check), more freedom for the editing passes.
fn stage_optimized() -> BTreeMap<Stage, ParamOverride> {
    BTreeMap::from([
        (Stage::Split, sampling(0.1, 0.1, 2048)),
        (Stage::Build, sampling(0.2, 0.3, 4096)),
        (Stage::Fuse, sampling(0.15, 0.2, 6144)),
        (Stage::Audit, sampling(0.05, 0.1, 3072)),
        (
            Stage::EditPass1,
            ParamOverride {
                frequency_penalty: Some(0.2),
                presence_penalty: Some(0.1),
                ..sampling(0.25, 0.4, 4096)
            },
        ),
        (Stage::GlobalCheck, sampling(0.1, 0.2, 3072)),
        (
            Stage::EditPass2,
            ParamOverride {
                frequency_penalty: Some(0.15),
                presence_penalty: Some(0.05),
                ..sampling(0.2, 0.3, 4096)
            },
        ),
    ])
}
