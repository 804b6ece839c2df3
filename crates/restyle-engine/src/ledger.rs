//! Usage accounting.
//!
//! Every attempted variant call is appended here, success or not. Writes are
//! best-effort: the orchestrator logs a failed append and moves on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use restyle_contracts::jsonl::{read_rows, JsonlWriter};
use restyle_contracts::runs::usage::UsageRecord;

use crate::error::LedgerError;

#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn append(&self, record: UsageRecord) -> Result<(), LedgerError>;
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageLedger;

#[async_trait]
impl UsageLedger for NoopUsageLedger {
    async fn append(&self, _record: UsageRecord) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Appends one JSON line per record to a local file.
#[derive(Debug, Clone)]
pub struct JsonlUsageLedger {
    writer: JsonlWriter,
}

impl JsonlUsageLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            writer: JsonlWriter::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }
}

#[async_trait]
impl UsageLedger for JsonlUsageLedger {
    async fn append(&self, record: UsageRecord) -> Result<(), LedgerError> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || writer.append(&record))
            .await
            .map_err(|err| LedgerError::Worker(err.to_string()))??;
        Ok(())
    }
}

pub fn read_usage_log(path: &Path) -> anyhow::Result<Vec<UsageRecord>> {
    read_rows(path)
}
