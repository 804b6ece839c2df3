use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ResolutionTier;
use crate::request::Mode;
use crate::runs::report::FailureKind;

/// Token counters reported by the generation service. Any of them can be
/// missing from a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_token_count: Option<u64>,
    pub candidates_token_count: Option<u64>,
    pub total_token_count: Option<u64>,
}

impl TokenUsage {
    /// No prompt or candidate tokens reported. Such a call gets no cost
    /// estimate rather than a cost of zero.
    pub fn is_unmeasured(&self) -> bool {
        self.prompt_token_count.unwrap_or(0) == 0 && self.candidates_token_count.unwrap_or(0) == 0
    }
}

/// One row per attempted variant call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub ts: DateTime<Utc>,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub mode: Mode,
    pub tier: ResolutionTier,
    pub variant_index: u32,
    pub input_image_count: u32,
    pub output_image_count: u32,
    #[serde(default)]
    pub prompt_token_count: Option<u64>,
    #[serde(default)]
    pub candidates_token_count: Option<u64>,
    #[serde(default)]
    pub total_token_count: Option<u64>,
    pub estimated_cost_usd: Option<f64>,
    pub is_fallback: bool,
    pub success: bool,
    /// The call succeeded but the service returned no image.
    #[serde(default)]
    pub empty_result: bool,
    #[serde(default)]
    pub failure_kind: Option<FailureKind>,
}

impl UsageRecord {
    pub fn tokens(mut self, usage: Option<&TokenUsage>) -> Self {
        if let Some(usage) = usage {
            self.prompt_token_count = usage.prompt_token_count;
            self.candidates_token_count = usage.candidates_token_count;
            self.total_token_count = usage.total_token_count;
        }
        self
    }

    pub fn output_images(mut self, count: u32) -> Self {
        self.output_image_count = count;
        self.empty_result = self.success && count == 0;
        self
    }

    pub fn cost(mut self, usd: Option<f64>) -> Self {
        self.estimated_cost_usd = usd;
        self
    }

    pub fn failed(mut self, kind: FailureKind) -> Self {
        self.success = false;
        self.empty_result = false;
        self.output_image_count = 0;
        self.failure_kind = Some(kind);
        self
    }
}
