use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use restyle_contracts::config::ResolutionTier;
use restyle_contracts::runs::usage::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_PRICING_JSON: &str = include_str!("../resources/default_pricing.json");

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageTokens {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

impl ImageTokens {
    pub fn for_tier(&self, tier: ResolutionTier) -> u64 {
        match tier {
            ResolutionTier::Low => self.low,
            ResolutionTier::Medium => self.medium,
            ResolutionTier::High => self.high,
        }
    }
}

/// Per-token rates in USD per million tokens, plus billing constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub input_usd_per_million: f64,
    pub output_text_usd_per_million: f64,
    pub output_image_usd_per_million: f64,
    /// Tokens the service bills for each output image at a given tier.
    pub output_image_tokens: ImageTokens,
    pub usd_to_eur: f64,
    pub monthly_base_eur: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            input_usd_per_million: 2.0,
            output_text_usd_per_million: 12.0,
            output_image_usd_per_million: 120.0,
            output_image_tokens: ImageTokens {
                low: 1120,
                medium: 1120,
                high: 2000,
            },
            usd_to_eur: 0.84,
            monthly_base_eur: 18.0,
        }
    }
}

impl PricingTable {
    /// Built-in table with any `RESTYLE_PRICING_PATH` overrides merged on top.
    /// Overrides may name only the fields they change.
    pub fn load() -> Result<Self> {
        let mut merged: Value =
            serde_json::from_str(DEFAULT_PRICING_JSON).context("built-in pricing table is invalid")?;
        if let Some(path) = pricing_override_path() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading pricing overrides {}", path.display()))?;
            let overrides: Value = serde_json::from_str(&raw)
                .with_context(|| format!("invalid pricing overrides {}", path.display()))?;
            merge_values(&mut merged, overrides);
        }
        serde_json::from_value(merged).context("pricing table has missing or mistyped fields")
    }

    /// Estimated USD cost of one call, or `None` when the response carried no
    /// usable token counts. Output tokens beyond the images' fixed allotment
    /// are billed as text.
    pub fn estimate_cost_usd(
        &self,
        usage: Option<&TokenUsage>,
        image_count: u32,
        tier: ResolutionTier,
    ) -> Option<f64> {
        let usage = usage.filter(|usage| !usage.is_unmeasured())?;
        let prompt_tokens = usage.prompt_token_count.unwrap_or(0);
        let candidates_tokens = usage.candidates_token_count.unwrap_or(0);

        let image_tokens = u64::from(image_count) * self.output_image_tokens.for_tier(tier);
        let text_tokens = candidates_tokens.saturating_sub(image_tokens);

        let cost = per_million(prompt_tokens, self.input_usd_per_million)
            + per_million(text_tokens, self.output_text_usd_per_million)
            + per_million(image_tokens, self.output_image_usd_per_million);
        Some(round_usd(cost))
    }

    pub fn usd_to_eur(&self, usd: f64) -> f64 {
        round_eur(usd * self.usd_to_eur)
    }
}

fn per_million(tokens: u64, usd_per_million: f64) -> f64 {
    tokens as f64 * usd_per_million / 1_000_000.0
}

pub fn round_usd(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

pub fn round_eur(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn pricing_override_path() -> Option<PathBuf> {
    env::var("RESTYLE_PRICING_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn merge_values(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}
