use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::Mode;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Metadata row for one stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReceipt {
    pub schema_version: u64,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub storage_path: String,
    pub mime_type: String,
    pub created_by: String,
    pub mode: Mode,
    pub prompt: Option<String>,
    pub project_id: Option<String>,
    pub sha256: String,
    pub byte_size: u64,
}

/// Fields the caller supplies; id and timestamps are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecordDraft {
    pub storage_path: String,
    pub mime_type: String,
    pub created_by: String,
    pub mode: Mode,
    pub prompt: Option<String>,
    pub project_id: Option<String>,
    pub sha256: String,
    pub byte_size: u64,
}

impl ImageReceipt {
    pub fn from_draft(draft: ImageRecordDraft) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            storage_path: draft.storage_path,
            mime_type: draft.mime_type,
            created_by: draft.created_by,
            mode: draft.mode,
            prompt: draft.prompt.filter(|value| !value.trim().is_empty()),
            project_id: draft.project_id,
            sha256: draft.sha256,
            byte_size: draft.byte_size,
        }
    }
}

pub fn write_receipt(path: &Path, receipt: &ImageReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(receipt)?)?;
    Ok(())
}

pub fn read_receipt(path: &Path) -> anyhow::Result<ImageReceipt> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
