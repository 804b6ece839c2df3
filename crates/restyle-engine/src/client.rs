use async_trait::async_trait;
use restyle_contracts::config::GenerationConfig;
use restyle_contracts::runs::report::GeneratedImage;
use restyle_contracts::runs::usage::TokenUsage;

use crate::error::GenerationFailure;
use crate::prompt::PromptParts;

/// What a successful call returned. `images` may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantOutput {
    pub images: Vec<GeneratedImage>,
    pub usage: Option<TokenUsage>,
}

pub type VariantOutcome = Result<VariantOutput, GenerationFailure>;

/// One call to the generation service. Implementations never retry; the
/// orchestrator decides what a failure means for the batch.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, parts: &PromptParts, config: &GenerationConfig) -> VariantOutcome;

    /// Upper bound of a single call.
    fn timeout(&self) -> std::time::Duration;
}
