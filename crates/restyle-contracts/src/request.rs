use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GenerationConfig, RawImageConfig};

pub const MAX_VARIANTS: u8 = 4;
pub const MAX_STYLE_REFERENCES: usize = 4;

const ACCEPTED_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/gif",
];

/// Base64 image as it arrives on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

/// Inbound request body. Every field is optional here; `GenerationRequest`
/// is the validated form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequestPayload {
    #[serde(default)]
    pub base_image: Option<ImagePayload>,
    #[serde(default)]
    pub inspiration_images: Vec<ImagePayload>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub num_images: Option<i64>,
    #[serde(default)]
    pub image_config: Option<RawImageConfig>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("source image is missing")]
    MissingSourceImage,
    #[error("image data is not valid base64: {0}")]
    InvalidEncoding(String),
    #[error("unsupported image type '{0}'")]
    UnsupportedMimeType(String),
    #[error("image content is {detected} but was declared as {declared}")]
    ContentMismatch { declared: String, detected: String },
}

/// Decoded image bytes. Cloning shares the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub mime_type: String,
    pub data: Arc<[u8]>,
}

impl ImageInput {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn from_payload(payload: &ImagePayload) -> Result<Self, InputError> {
        let mime_type = payload.mime_type.trim().to_ascii_lowercase();
        let data = payload.data.trim();
        if mime_type.is_empty() || data.is_empty() {
            return Err(InputError::MissingSourceImage);
        }
        if !ACCEPTED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(InputError::UnsupportedMimeType(mime_type));
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|err| InputError::InvalidEncoding(err.to_string()))?;
        if bytes.is_empty() {
            return Err(InputError::MissingSourceImage);
        }
        check_declared_format(&mime_type, &bytes)?;
        Ok(Self::new(mime_type, bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }
}

// Bytes with an unrecognized signature are let through; only a recognized
// format that contradicts the declared type is rejected.
fn check_declared_format(mime_type: &str, bytes: &[u8]) -> Result<(), InputError> {
    let Ok(detected) = image::guess_format(bytes) else {
        return Ok(());
    };
    let declared = if mime_type == "image/jpg" {
        "image/jpeg"
    } else {
        mime_type
    };
    match image::ImageFormat::from_mime_type(declared) {
        Some(expected) if expected == detected => Ok(()),
        _ => Err(InputError::ContentMismatch {
            declared: mime_type.to_string(),
            detected: detected.to_mime_type().to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Initial,
    Refine,
}

impl Mode {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()) {
            Some(value) if value == "refine" => Self::Refine,
            _ => Self::Initial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Refine => "refine",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub owner_id: String,
    pub source: ImageInput,
    pub style_references: Vec<ImageInput>,
    pub instruction: String,
    pub variant_count: u8,
    pub mode: Mode,
    pub config: GenerationConfig,
    pub project_id: Option<String>,
}

impl GenerationRequest {
    /// Validate the boundary payload. Only the source image can make this
    /// fail; everything else is clamped, filtered or defaulted.
    pub fn from_payload(
        payload: &GenerateRequestPayload,
        owner_id: impl Into<String>,
    ) -> Result<Self, InputError> {
        let source = payload
            .base_image
            .as_ref()
            .ok_or(InputError::MissingSourceImage)
            .and_then(ImageInput::from_payload)?;

        let style_references = payload
            .inspiration_images
            .iter()
            .filter_map(|image| ImageInput::from_payload(image).ok())
            .take(MAX_STYLE_REFERENCES)
            .collect();

        Ok(Self {
            owner_id: owner_id.into(),
            source,
            style_references,
            instruction: payload
                .prompt
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            variant_count: clamp_variant_count(payload.num_images),
            mode: Mode::parse(payload.mode.as_deref()),
            config: GenerationConfig::normalize(payload.image_config.as_ref()),
            project_id: payload
                .project_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        })
    }

    /// Source plus style references, as billed by the service.
    pub fn input_image_count(&self) -> u32 {
        1 + self.style_references.len() as u32
    }
}

pub fn clamp_variant_count(raw: Option<i64>) -> u8 {
    match raw {
        Some(value) if value >= 1 => value.min(MAX_VARIANTS as i64) as u8,
        _ => 1,
    }
}
