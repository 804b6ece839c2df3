//! Error types for generation calls and the engine's collaborators.

use std::time::Duration;

use restyle_contracts::runs::report::FailureKind;
use thiserror::Error;

const CONFIG_REJECTION_MARKERS: &[&str] = &[
    "imageconfig",
    "image_config",
    "imagesize",
    "image_size",
    "aspectratio",
    "aspect ratio",
];

/// A single variant call that produced no usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct GenerationFailure {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status from the service, or the one we map a transport failure to.
    pub http_status: Option<u16>,
    /// Machine-readable status string from the error body (e.g. `INVALID_ARGUMENT`).
    pub upstream_code: Option<String>,
}

impl GenerationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            upstream_code: None,
        }
    }

    pub fn timeout(bound: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!(
                "generation exceeded {} seconds",
                bound.as_secs_f64().round() as u64
            ),
        )
        .with_status(504)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Upstream, message).with_status(502)
    }

    /// Classify a non-2xx response. A 400 that names one of the image
    /// configuration fields is a configuration rejection; everything else is
    /// a plain upstream error.
    pub fn from_response(status: u16, message: impl Into<String>, code: Option<String>) -> Self {
        let message = message.into();
        let kind = if is_configuration_rejection(status, &message) {
            FailureKind::ConfigurationRejected
        } else {
            FailureKind::Upstream
        };
        Self {
            kind,
            message,
            http_status: Some(status),
            upstream_code: code,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn is_configuration_rejection(&self) -> bool {
        self.kind == FailureKind::ConfigurationRejected
    }
}

pub fn is_configuration_rejection(status: u16, message: &str) -> bool {
    if status != 400 {
        return false;
    }
    let lowered = message.to_ascii_lowercase();
    CONFIG_REJECTION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image record write failed: {0}")]
    Record(#[from] anyhow::Error),
    #[error("stored object not found: {0}")]
    NotFound(String),
    #[error("invalid storage path: {0}")]
    InvalidPath(String),
    #[error("storage worker stopped: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("usage ledger write failed: {0}")]
    Write(#[from] anyhow::Error),
    #[error("usage ledger worker stopped: {0}")]
    Worker(String),
    #[error("usage ledger write timed out after {0:?}")]
    Timeout(Duration),
}
