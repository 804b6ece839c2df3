use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use restyle_contracts::config::GenerationConfig;
use restyle_contracts::runs::report::{FailureKind, GeneratedImage};
use restyle_contracts::runs::usage::TokenUsage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{GenerationClient, VariantOutcome, VariantOutput};
use crate::error::GenerationFailure;
use crate::prompt::{ContentPart, PromptParts};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1alpha";
pub const DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Serverless platforms kill the request at 60 s.
const PLATFORM_CEILING_TIMEOUT: Duration = Duration::from_secs(55);
const ERROR_BODY_MAX_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_env() -> Result<Self> {
        let Some(api_key) = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
        else {
            bail!("GEMINI_API_KEY (or GOOGLE_API_KEY) is not set");
        };
        Ok(Self {
            api_key,
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: non_empty_env("GEMINI_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: resolve_timeout(
                non_empty_env("GEMINI_TIMEOUT_SECONDS").as_deref(),
                non_empty_env("VERCEL").as_deref(),
            ),
        })
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

/// An explicit bound wins; otherwise stay under the platform ceiling when
/// deployed on one.
pub fn resolve_timeout(explicit_seconds: Option<&str>, platform_flag: Option<&str>) -> Duration {
    if let Some(seconds) = explicit_seconds
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|seconds| *seconds > 0)
    {
        return Duration::from_secs(seconds);
    }
    if platform_flag.map(str::trim) == Some("1") {
        return PLATFORM_CEILING_TIMEOUT;
    }
    DEFAULT_TIMEOUT
}

pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn post(&self, body: &GenerateContentRequest<'_>) -> reqwest::Result<(u16, String)> {
        let response = self
            .http
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, parts: &PromptParts, config: &GenerationConfig) -> VariantOutcome {
        let body = GenerateContentRequest::new(parts, config);
        let (status, text) = match tokio::time::timeout(self.config.timeout, self.post(&body)).await {
            Err(_) => return Err(GenerationFailure::timeout(self.config.timeout)),
            Ok(Err(err)) if err.is_timeout() => {
                return Err(GenerationFailure::timeout(self.config.timeout))
            }
            Ok(Err(err)) => return Err(GenerationFailure::network(err.to_string())),
            Ok(Ok(pair)) => pair,
        };
        debug!(status, tier = %config.tier, "generation call returned");
        parse_response(status, &text)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

/// Turn a raw HTTP status and body into an outcome.
pub fn parse_response(status: u16, body: &str) -> VariantOutcome {
    let parsed = serde_json::from_str::<GenerateContentResponse>(body);

    if !(200..300).contains(&status) {
        let error = parsed.ok().and_then(|payload| payload.error);
        let message = error
            .as_ref()
            .and_then(|error| error.message.clone())
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "generation service returned HTTP {status}: {}",
                    truncate_text(body, ERROR_BODY_MAX_CHARS)
                )
            });
        let code = error.and_then(|error| error.status);
        return Err(GenerationFailure::from_response(status, message, code));
    }

    let payload = parsed.map_err(|err| {
        GenerationFailure::new(
            FailureKind::Upstream,
            format!("generation service returned invalid JSON: {err}"),
        )
        .with_status(502)
    })?;

    Ok(VariantOutput {
        images: extract_images(&payload),
        usage: payload.usage_metadata.map(TokenUsage::from),
    })
}

// Thought images are drafts; only used when the response has nothing else.
fn extract_images(payload: &GenerateContentResponse) -> Vec<GeneratedImage> {
    let mut images = Vec::new();
    let mut thought_images = Vec::new();

    let parts = payload
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter());
    for part in parts {
        let Some(inline) = part.inline_data.as_ref().filter(|inline| !inline.data.is_empty()) else {
            continue;
        };
        let bytes = match BASE64.decode(inline.data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "skipping undecodable image part");
                continue;
            }
        };
        let image = GeneratedImage::new(
            inline
                .mime_type
                .clone()
                .unwrap_or_else(|| "image/png".to_string()),
            bytes,
        );
        if part.thought.unwrap_or(false) {
            thought_images.push(image);
        } else {
            images.push(image);
        }
    }

    if images.is_empty() {
        thought_images
    } else {
        images
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    system_instruction: SystemInstruction<'a>,
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfigBody,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(prompt: &'a PromptParts, config: &GenerationConfig) -> Self {
        Self {
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: prompt.system_instruction,
                }],
            },
            contents: vec![RequestContent {
                parts: prompt.parts.iter().map(RequestPart::from).collect(),
            }],
            generation_config: GenerationConfigBody {
                response_modalities: ["TEXT", "IMAGE"],
                temperature: 1.0,
                image_config: ImageConfigBody {
                    image_size: config.tier.image_size_label(),
                    aspect_ratio: config.aspect_ratio.map(|ratio| ratio.label()),
                },
            },
        }
    }
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        inline_data: InlineDataBody<'a>,
        media_resolution: MediaResolutionBody,
    },
}

impl<'a> From<&'a ContentPart> for RequestPart<'a> {
    fn from(part: &'a ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => Self::Text { text },
            ContentPart::Image { image, resolution } => Self::Inline {
                inline_data: InlineDataBody {
                    mime_type: &image.mime_type,
                    data: image.to_base64(),
                },
                media_resolution: MediaResolutionBody {
                    level: resolution.as_level(),
                },
            },
        }
    }
}

#[derive(Serialize)]
struct InlineDataBody<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
struct MediaResolutionBody {
    level: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigBody {
    response_modalities: [&'static str; 2],
    temperature: f32,
    image_config: ImageConfigBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfigBody {
    image_size: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'static str>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata", alias = "usage_metadata")]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
    #[serde(default)]
    thought: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(default, rename = "promptTokenCount", alias = "prompt_token_count")]
    prompt_token_count: Option<u64>,
    #[serde(default, rename = "candidatesTokenCount", alias = "candidates_token_count")]
    candidates_token_count: Option<u64>,
    #[serde(default, rename = "totalTokenCount", alias = "total_token_count")]
    total_token_count: Option<u64>,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(meta: UsageMetadata) -> Self {
        Self {
            prompt_token_count: meta.prompt_token_count,
            candidates_token_count: meta.candidates_token_count,
            total_token_count: meta.total_token_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}
