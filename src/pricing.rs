//! Static model pricing and context-size table.
//!
//! Prices are USD per million tokens. The table is keyed by provider name,
//! then model name; dated snapshot names (`claude-3-opus-20240229`) resolve
//! to the entry they extend.

use serde::Serialize;
use thiserror::Error;

/// Pricing and context size for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelInfo {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
    /// Maximum context window in tokens
    pub max_context_tokens: u64,
}

impl ModelInfo {
    /// Cost in dollars for the given token counts.
    ///
    /// # Formula
    /// `input / 1e6 * input_rate + output / 1e6 * output_rate`
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_million
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Unknown model '{model}' for provider '{provider}'")]
    UnknownModel { provider: String, model: String },
}

const fn info(input: f64, output: f64, context: u64) -> ModelInfo {
    ModelInfo {
        input_cost_per_million: input,
        output_cost_per_million: output,
        max_context_tokens: context,
    }
}

const MODELS: &[(&str, &[(&str, ModelInfo)])] = &[
    (
        "openai",
        &[
            ("gpt-3.5-turbo", info(1.5, 2.0, 16_385)),
            ("gpt-4", info(30.0, 60.0, 8_192)),
            ("gpt-4-turbo", info(10.0, 30.0, 128_000)),
        ],
    ),
    (
        "anthropic",
        &[
            ("claude-3-haiku", info(0.25, 1.25, 200_000)),
            ("claude-3-sonnet", info(3.0, 15.0, 200_000)),
            ("claude-3-opus", info(15.0, 75.0, 200_000)),
        ],
    ),
    (
        "xai",
        &[
            ("grok-4-fast-reasoning", info(0.20, 0.50, 2_000_000)),
            ("grok-code-fast-1", info(0.20, 1.50, 256_000)),
        ],
    ),
];

fn models_of(provider: &str) -> Option<&'static [(&'static str, ModelInfo)]> {
    MODELS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(provider.trim()))
        .map(|(_, models)| *models)
}

/// Look up pricing for a provider/model pair.
///
/// # Errors
/// `UnknownProvider` or `UnknownModel` when the pair is not in the table.
pub fn get_model_info(provider: &str, model: &str) -> Result<ModelInfo, PricingError> {
    let models =
        models_of(provider).ok_or_else(|| PricingError::UnknownProvider(provider.to_string()))?;
    let model = model.trim();

    if let Some((_, info)) = models.iter().find(|(name, _)| *name == model) {
        return Ok(*info);
    }

    // Longest key wins so "gpt-4-turbo-2024" never resolves to "gpt-4"
    models
        .iter()
        .filter(|(name, _)| {
            model
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('-'))
        })
        .max_by_key(|(name, _)| name.len())
        .map(|(_, info)| *info)
        .ok_or_else(|| PricingError::UnknownModel {
            provider: provider.to_string(),
            model: model.to_string(),
        })
}

/// Names of every provider in the table.
pub fn providers() -> Vec<&'static str> {
    MODELS.iter().map(|(name, _)| *name).collect()
}

/// Names of every model registered for `provider`.
pub fn models_for(provider: &str) -> Result<Vec<&'static str>, PricingError> {
    models_of(provider)
        .map(|models| models.iter().map(|(name, _)| *name).collect())
        .ok_or_else(|| PricingError::UnknownProvider(provider.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_resolve() {
        let gpt = get_model_info("openai", "gpt-3.5-turbo").unwrap();
        assert_eq!(gpt.input_cost_per_million, 1.5);
        assert_eq!(gpt.output_cost_per_million, 2.0);
        assert_eq!(gpt.max_context_tokens, 16_385);

        let grok = get_model_info("xai", "grok-4-fast-reasoning").unwrap();
        assert_eq!(grok.max_context_tokens, 2_000_000);
    }

    #[test]
    fn provider_lookup_is_case_insensitive() {
        assert!(get_model_info("OpenAI", "gpt-4").is_ok());
    }

    #[test]
    fn dated_snapshots_resolve_to_base_entry() {
        let sonnet = get_model_info("anthropic", "claude-3-sonnet-20240229").unwrap();
        assert_eq!(sonnet.input_cost_per_million, 3.0);

        let turbo = get_model_info("openai", "gpt-4-turbo-2024-04-09").unwrap();
        assert_eq!(turbo.input_cost_per_million, 10.0);
    }

    #[test]
    fn unknown_pairs_are_errors() {
        assert_eq!(
            get_model_info("mistral", "large"),
            Err(PricingError::UnknownProvider("mistral".into()))
        );
        assert!(matches!(
            get_model_info("openai", "gpt-4o"),
            Err(PricingError::UnknownModel { .. })
        ));
        assert!(matches!(
            get_model_info("openai", "gpt-4turbo"),
            Err(PricingError::UnknownModel { .. })
        ));
    }

    #[test]
    fn cost_formula() {
        let info = info(1.5, 2.0, 1000);
        assert!((info.cost(1_000_000, 500_000) - 2.5).abs() < 1e-9);
        assert_eq!(info.cost(0, 0), 0.0);
    }

    #[test]
    fn listing() {
        assert_eq!(providers(), vec!["openai", "anthropic", "xai"]);
        assert_eq!(models_for("xai").unwrap().len(), 2);
    }
}
