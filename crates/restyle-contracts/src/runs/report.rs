use serde::{Deserialize, Serialize};

use crate::request::InputError;
use crate::runs::receipts::ImageReceipt;

/// Why a single variant call produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service refused the requested resolution or aspect ratio.
    ConfigurationRejected,
    Timeout,
    Upstream,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationRejected => "configuration_rejected",
            Self::Timeout => "timeout",
            Self::Upstream => "upstream_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wave {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub mime_type: String,
    #[serde(with = "crate::encoding")]
    pub data: Vec<u8>,
}

impl GeneratedImage {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub wave: Wave,
    pub variant_index: u32,
    pub kind: FailureKind,
    pub message: String,
    pub http_status: Option<u16>,
    pub upstream_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImage {
    #[serde(flatten)]
    pub receipt: ImageReceipt,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    UpstreamUnavailable,
    BadInput,
}

impl ReportStatus {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::UpstreamUnavailable => 502,
            Self::BadInput => 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub status: ReportStatus,
    /// Every image the model produced, in completion order.
    pub images: Vec<GeneratedImage>,
    /// The subset of `images` that reached durable storage.
    pub stored: Vec<StoredImage>,
    pub requested: u8,
    pub received: u8,
    pub fallback_used: bool,
    pub warnings: Vec<String>,
    /// Hard errors. Empty unless `status` is not `Ok`.
    pub errors: Vec<String>,
    pub failures: Vec<AttemptFailure>,
    pub storage_errors: Vec<String>,
    pub estimated_cost_usd: f64,
    pub estimated_cost_eur: f64,
}

impl GenerationReport {
    pub fn bad_input(err: &InputError) -> Self {
        Self {
            status: ReportStatus::BadInput,
            images: Vec::new(),
            stored: Vec::new(),
            requested: 0,
            received: 0,
            fallback_used: false,
            warnings: Vec::new(),
            errors: vec![err.to_string()],
            failures: Vec::new(),
            storage_errors: Vec::new(),
            estimated_cost_usd: 0.0,
            estimated_cost_eur: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Ok
    }

    pub fn http_status(&self) -> u16 {
        self.status.http_status()
    }
}
