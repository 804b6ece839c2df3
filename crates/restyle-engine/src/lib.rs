//! Generation orchestration: fan one restyle request out to concurrent
//! variant calls, recover from configuration rejections with a single
//! fallback wave, then price, record and persist what came back.

pub mod client;
pub mod error;
pub mod gemini;
pub mod ledger;
pub mod orchestrator;
pub mod pricing;
pub mod prompt;
pub mod storage;

pub use client::{GenerationClient, VariantOutcome, VariantOutput};
pub use error::{GenerationFailure, LedgerError, StorageError};
pub use gemini::{GeminiClient, GeminiConfig};
pub use ledger::{read_usage_log, JsonlUsageLedger, NoopUsageLedger, UsageLedger};
pub use orchestrator::{BatchOrchestrator, BatchResult, OrchestratorConfig, VariantTask};
pub use pricing::PricingTable;
pub use prompt::{build_parts, ContentPart, MediaResolution, PromptInput, PromptParts};
pub use storage::{LocalImageStore, PersistenceGateway, StorageRef};
