use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use restyle_contracts::config::GenerationConfig;
use restyle_contracts::request::{
    GenerateRequestPayload, GenerationRequest, MAX_STYLE_REFERENCES, MAX_VARIANTS,
};
use restyle_contracts::runs::receipts::ImageRecordDraft;
use restyle_contracts::runs::report::{
    AttemptFailure, FailureKind, GeneratedImage, GenerationReport, ReportStatus, StoredImage, Wave,
};
use restyle_contracts::runs::usage::UsageRecord;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::{GenerationClient, VariantOutcome};
use crate::error::{GenerationFailure, LedgerError};
use crate::ledger::UsageLedger;
use crate::pricing::{round_usd, PricingTable};
use crate::prompt::{build_parts, PromptInput};
use crate::storage::PersistenceGateway;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Added to the client's own timeout to form each task's liveness deadline.
    pub deadline_grace: Duration,
    pub ledger_timeout: Duration,
    pub signed_url_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline_grace: Duration::from_secs(5),
            ledger_timeout: Duration::from_secs(5),
            signed_url_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// One variant call within a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantTask {
    /// 1-based, continues across waves. Only used to differentiate prompts.
    pub index: u32,
    pub total: u32,
    pub wave: Wave,
    pub config: GenerationConfig,
    pub deadline: Duration,
}

/// What one wave produced once every task settled.
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Completion order.
    pub images: Vec<GeneratedImage>,
    pub failures: Vec<AttemptFailure>,
    pub cost_usd: f64,
    pub attempted: usize,
}

impl BatchResult {
    fn saw_configuration_rejection(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| failure.kind == FailureKind::ConfigurationRejected)
    }
}

pub struct BatchOrchestrator {
    client: Arc<dyn GenerationClient>,
    store: Arc<dyn PersistenceGateway>,
    ledger: Arc<dyn UsageLedger>,
    pricing: PricingTable,
    config: OrchestratorConfig,
    /// Detached ledger writes. Dropping the orchestrator aborts the ones
    /// still pending; call `flush_usage` first when that matters.
    ledger_writes: Mutex<JoinSet<()>>,
}

impl BatchOrchestrator {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        store: Arc<dyn PersistenceGateway>,
        ledger: Arc<dyn UsageLedger>,
        pricing: PricingTable,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            store,
            ledger,
            pricing,
            config,
            ledger_writes: Mutex::new(JoinSet::new()),
        }
    }

    /// Wait for every usage write issued so far.
    pub async fn flush_usage(&self) {
        let mut writes = std::mem::take(&mut *self.lock_ledger_writes());
        while writes.join_next().await.is_some() {}
    }

    fn lock_ledger_writes(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.ledger_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate a boundary payload and run it. Invalid input never reaches
    /// the generation service.
    pub async fn handle(&self, payload: &GenerateRequestPayload, owner_id: &str) -> GenerationReport {
        match GenerationRequest::from_payload(payload, owner_id) {
            Ok(request) => self.run(&request).await,
            Err(err) => {
                warn!(owner = owner_id, error = %err, "rejecting generation request");
                GenerationReport::bad_input(&err)
            }
        }
    }

    pub async fn run(&self, request: &GenerationRequest) -> GenerationReport {
        let requested = u32::from(request.variant_count.clamp(1, MAX_VARIANTS));
        let mut capped = request.clone();
        capped.style_references.truncate(MAX_STYLE_REFERENCES);
        let shared = Arc::new(capped);
        let request = shared.as_ref();
        let deadline = self.client.timeout() + self.config.deadline_grace;
        info!(
            owner = %request.owner_id,
            mode = request.mode.as_str(),
            tier = %request.config.tier,
            requested,
            style_references = request.style_references.len(),
            "starting generation batch"
        );

        let primary_tasks = (1..=requested)
            .map(|index| VariantTask {
                index,
                total: requested,
                wave: Wave::Primary,
                config: request.config,
                deadline,
            })
            .collect();
        let primary = self.run_wave(&shared, primary_tasks).await;

        let produced = primary.images.len() as u32;
        let fallback = if produced < requested && primary.saw_configuration_rejection() {
            let missing = requested - produced;
            info!(missing, "configuration rejected, running fallback wave");
            let fallback_tasks = (1..=missing)
                .map(|offset| VariantTask {
                    index: produced + offset,
                    total: requested,
                    wave: Wave::Fallback,
                    config: GenerationConfig::fallback(),
                    deadline,
                })
                .collect();
            Some(self.run_wave(&shared, fallback_tasks).await)
        } else {
            None
        };

        self.compose(request, requested, primary, fallback).await
    }

    async fn run_wave(&self, request: &Arc<GenerationRequest>, tasks: Vec<VariantTask>) -> BatchResult {
        let wave = tasks.first().map(|task| task.wave);
        let mut pending: BTreeMap<u32, VariantTask> =
            tasks.iter().map(|task| (task.index, *task)).collect();
        let mut set = JoinSet::new();
        for task in tasks {
            let client = Arc::clone(&self.client);
            let request = Arc::clone(request);
            set.spawn(async move {
                let outcome = run_variant(client.as_ref(), &request, &task).await;
                (task, outcome)
            });
        }

        let mut result = BatchResult::default();
        let mut records = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((task, outcome)) => {
                    pending.remove(&task.index);
                    records.push(self.settle(request, &task, outcome, &mut result));
                }
                Err(err) => warn!(error = %err, "variant task aborted"),
            }
        }
        // A task that panicked still counts as an attempted call.
        for task in pending.into_values() {
            let outcome = Err(GenerationFailure::new(
                FailureKind::Upstream,
                "variant task aborted before completing",
            ));
            records.push(self.settle(request, &task, outcome, &mut result));
        }

        self.append_usage(records);
        result.cost_usd = round_usd(result.cost_usd);
        debug!(
            ?wave,
            attempted = result.attempted,
            images = result.images.len(),
            failures = result.failures.len(),
            "wave settled"
        );
        result
    }

    fn settle(
        &self,
        request: &GenerationRequest,
        task: &VariantTask,
        outcome: VariantOutcome,
        result: &mut BatchResult,
    ) -> UsageRecord {
        result.attempted += 1;
        let record = UsageRecord {
            ts: Utc::now(),
            owner_id: request.owner_id.clone(),
            project_id: request.project_id.clone(),
            mode: request.mode,
            tier: task.config.tier,
            variant_index: task.index,
            input_image_count: request.input_image_count(),
            output_image_count: 0,
            prompt_token_count: None,
            candidates_token_count: None,
            total_token_count: None,
            estimated_cost_usd: None,
            is_fallback: task.wave == Wave::Fallback,
            success: true,
            empty_result: false,
            failure_kind: None,
        };

        match outcome {
            Ok(output) => {
                let image_count = output.images.len() as u32;
                let cost = self.pricing.estimate_cost_usd(
                    output.usage.as_ref(),
                    image_count,
                    task.config.tier,
                );
                if image_count == 0 {
                    debug!(variant = task.index, wave = ?task.wave, "call succeeded without an image");
                }
                result.cost_usd += cost.unwrap_or(0.0);
                result.images.extend(output.images);
                record
                    .tokens(output.usage.as_ref())
                    .output_images(image_count)
                    .cost(cost)
            }
            Err(failure) => {
                warn!(
                    variant = task.index,
                    wave = ?task.wave,
                    kind = failure.kind.as_str(),
                    status = ?failure.http_status,
                    "variant call failed: {}",
                    failure.message
                );
                let kind = failure.kind;
                result.failures.push(AttemptFailure {
                    wave: task.wave,
                    variant_index: task.index,
                    kind,
                    message: failure.message,
                    http_status: failure.http_status,
                    upstream_code: failure.upstream_code,
                });
                record.failed(kind)
            }
        }
    }

    /// Detached writes: the request never waits on the ledger.
    fn append_usage(&self, records: Vec<UsageRecord>) {
        let timeout = self.config.ledger_timeout;
        let mut writes = self.lock_ledger_writes();
        while writes.try_join_next().is_some() {}
        for record in records {
            let ledger = Arc::clone(&self.ledger);
            writes.spawn(async move {
                let result = match tokio::time::timeout(timeout, ledger.append(record)).await {
                    Ok(result) => result,
                    Err(_) => Err(LedgerError::Timeout(timeout)),
                };
                if let Err(err) = result {
                    warn!(error = %err, "failed to record usage");
                }
            });
        }
    }

    async fn compose(
        &self,
        request: &GenerationRequest,
        requested: u32,
        primary: BatchResult,
        fallback: Option<BatchResult>,
    ) -> GenerationReport {
        let fallback_used = fallback.is_some();
        let mut images = primary.images;
        let mut cost_usd = primary.cost_usd;
        let mut failures = primary.failures;
        // Primary rejections are answered by the fallback wave; only the
        // rest are reported as call failures.
        let mut unresolved: Vec<AttemptFailure> = failures
            .iter()
            .filter(|failure| !(fallback_used && failure.kind == FailureKind::ConfigurationRejected))
            .cloned()
            .collect();
        if let Some(fallback) = fallback {
            images.extend(fallback.images);
            cost_usd += fallback.cost_usd;
            unresolved.extend(fallback.failures.iter().cloned());
            failures.extend(fallback.failures);
        }
        images.truncate(requested as usize);
        let cost_usd = round_usd(cost_usd);
        let received = images.len() as u32;

        let mut warnings = Vec::new();
        if fallback_used {
            let fallback_config = GenerationConfig::fallback();
            warnings.push(format!(
                "The requested image configuration was rejected; missing variants were generated at {} without an aspect ratio.",
                fallback_config.tier.image_size_label()
            ));
        }
        if received < requested {
            warnings.push(format!("Received {received} of {requested} requested images."));
        }
        if !unresolved.is_empty() {
            let details: Vec<String> = unresolved
                .iter()
                .map(|failure| format!("variant {}: {}", failure.variant_index, failure.message))
                .collect();
            warnings.push(format!(
                "{} generation call(s) failed: {}",
                unresolved.len(),
                details.join("; ")
            ));
        }

        let mut report = GenerationReport {
            status: ReportStatus::Ok,
            images: Vec::new(),
            stored: Vec::new(),
            requested: requested as u8,
            received: received as u8,
            fallback_used,
            warnings,
            errors: Vec::new(),
            failures,
            storage_errors: Vec::new(),
            estimated_cost_usd: cost_usd,
            estimated_cost_eur: self.pricing.usd_to_eur(cost_usd),
        };

        if images.is_empty() {
            report.status = ReportStatus::UpstreamUnavailable;
            report
                .errors
                .push("No image was generated.".to_string());
            for failure in &report.failures {
                if !report.errors.contains(&failure.message) {
                    report.errors.push(failure.message.clone());
                }
            }
            warn!(
                owner = %request.owner_id,
                failures = report.failures.len(),
                "generation batch produced no images"
            );
            return report;
        }

        let persisted = join_all(images.iter().map(|image| self.persist(request, image))).await;
        for (stored, error) in persisted {
            report.stored.extend(stored);
            report.storage_errors.extend(error);
        }
        if !report.storage_errors.is_empty() {
            report.warnings.push(format!(
                "{} storage operation(s) failed while saving generated images.",
                report.storage_errors.len()
            ));
        }
        report.images = images;

        info!(
            owner = %request.owner_id,
            requested,
            received,
            stored = report.stored.len(),
            fallback_used,
            cost_usd,
            "generation batch complete"
        );
        report
    }

    /// Store one image. A storage or metadata failure drops the image from
    /// `stored`; a signing failure keeps it with no URL. Either way the
    /// message is returned for the report.
    async fn persist(
        &self,
        request: &GenerationRequest,
        image: &GeneratedImage,
    ) -> (Option<StoredImage>, Option<String>) {
        let reference = match self
            .store
            .store(&image.data, &image.mime_type, &request.owner_id)
            .await
        {
            Ok(reference) => reference,
            Err(err) => {
                warn!(error = %err, "failed to store generated image");
                return (None, Some(err.to_string()));
            }
        };

        let draft = ImageRecordDraft {
            storage_path: reference.as_str().to_string(),
            mime_type: image.mime_type.clone(),
            created_by: request.owner_id.clone(),
            mode: request.mode,
            prompt: Some(request.instruction.clone()),
            project_id: request.project_id.clone(),
            sha256: hex::encode(Sha256::digest(&image.data)),
            byte_size: image.data.len() as u64,
        };
        let receipt = match self.store.record(draft).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(path = reference.as_str(), error = %err, "failed to record stored image");
                return (None, Some(err.to_string()));
            }
        };

        match self
            .store
            .signed_url(&reference, self.config.signed_url_ttl)
            .await
        {
            Ok(url) => (
                Some(StoredImage {
                    receipt,
                    url: Some(url),
                }),
                None,
            ),
            Err(err) => {
                warn!(path = reference.as_str(), error = %err, "failed to sign stored image");
                (
                    Some(StoredImage { receipt, url: None }),
                    Some(format!("signing {} failed: {err}", reference.as_str())),
                )
            }
        }
    }
}

async fn run_variant(
    client: &dyn GenerationClient,
    request: &GenerationRequest,
    task: &VariantTask,
) -> VariantOutcome {
    let parts = build_parts(&PromptInput {
        mode: request.mode,
        source: &request.source,
        style_references: &request.style_references,
        instruction: &request.instruction,
        variant_index: task.index,
        variant_total: task.total,
    });
    debug!(variant = task.index, wave = ?task.wave, tier = %task.config.tier, "dispatching variant");
    match tokio::time::timeout(task.deadline, client.generate(&parts, &task.config)).await {
        Ok(outcome) => outcome,
        // Report the configured call bound, not the grace-extended deadline.
        Err(_) => Err(GenerationFailure::timeout(client.timeout())),
    }
}
