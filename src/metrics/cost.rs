//! Token and cost estimates.
//!
//! These are rough approximations (four characters per token, a fixed
//! per-model price table) meant for forecasting, not billing.

use serde::Serialize;

use crate::config::{Preset, PresetName, Stage};

/// Price per 1k tokens used when the model is not in the table
pub const DEFAULT_RATE_PER_1K: f64 = 0.01;

/// Estimated token count: characters / 4, rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Dollars per 1k tokens for a model name
pub fn rate_per_1k(model: &str) -> f64 {
    let model = model.to_ascii_lowercase();
    if model.starts_with("gpt-4o") {
        0.01
    } else if model.starts_with("gpt-4") {
        0.03
    } else if model.starts_with("gpt-3.5") {
        0.002
    } else {
        DEFAULT_RATE_PER_1K
    }
}

pub fn estimate_cost(model: &str, tokens: u64) -> f64 {
    tokens as f64 / 1000.0 * rate_per_1k(model)
}

/// Expected spend of running one input through a preset
#[derive(Debug, Clone, Serialize)]
pub struct CostForecast {
    pub preset: PresetName,
    pub label: &'static str,
    pub model: String,
    pub input_tokens: u64,
    pub estimated_cost: f64,
}

/// Forecast for one preset: input tokens priced once per stage, scaled by the
/// preset's cost multiplier
pub fn forecast(text: &str, preset: &Preset) -> CostForecast {
    let input_tokens = estimate_tokens(text);
    let per_pass = estimate_cost(&preset.params.model, input_tokens);
    CostForecast {
        preset: preset.name,
        label: preset.label,
        model: preset.params.model.clone(),
        input_tokens,
        estimated_cost: per_pass * Stage::ALL.len() as f64 * preset.cost_multiplier,
    }
}

pub fn forecast_all(text: &str) -> Vec<CostForecast> {
    Preset::all().iter().map(|p| forecast(text, p)).collect()
}
