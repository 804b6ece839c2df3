use std::fmt;

use serde::{Deserialize, Serialize};

/// Output resolution tier. The service names these `1K`, `2K` and `4K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTier {
    Low,
    Medium,
    High,
}

impl ResolutionTier {
    pub const ALL: [ResolutionTier; 3] = [Self::Low, Self::Medium, Self::High];

    /// Case-insensitive match on either the tier name or the service label.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "1k" => Some(Self::Low),
            "medium" | "2k" => Some(Self::Medium),
            "high" | "4k" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn image_size_label(&self) -> &'static str {
        match self {
            Self::Low => "1K",
            Self::Medium => "2K",
            Self::High => "4K",
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 10] = [
        Self::Square,
        Self::Portrait2x3,
        Self::Landscape3x2,
        Self::Portrait3x4,
        Self::Landscape4x3,
        Self::Portrait4x5,
        Self::Landscape5x4,
        Self::Portrait9x16,
        Self::Landscape16x9,
        Self::Ultrawide21x9,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL.into_iter().find(|ratio| ratio.label() == trimmed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait2x3 => "2:3",
            Self::Landscape3x2 => "3:2",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait4x5 => "4:5",
            Self::Landscape5x4 => "5:4",
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
            Self::Ultrawide21x9 => "21:9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Image options exactly as the caller sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawImageConfig {
    #[serde(default)]
    pub image_size: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub tier: ResolutionTier,
    pub aspect_ratio: Option<AspectRatio>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            tier: ResolutionTier::High,
            aspect_ratio: None,
        }
    }
}

impl GenerationConfig {
    /// Resolve caller options against the allow-lists. Never fails: an unknown
    /// tier becomes `High` and an unknown aspect ratio is dropped.
    pub fn normalize(raw: Option<&RawImageConfig>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        let tier = raw
            .image_size
            .as_deref()
            .and_then(ResolutionTier::parse)
            .unwrap_or(ResolutionTier::High);
        let aspect_ratio = raw.aspect_ratio.as_deref().and_then(AspectRatio::parse);
        Self { tier, aspect_ratio }
    }

    /// The configuration used once the service has refused the requested one.
    pub fn fallback() -> Self {
        Self {
            tier: ResolutionTier::Low,
            aspect_ratio: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AspectRatio, GenerationConfig, RawImageConfig, ResolutionTier};

    fn raw(size: Option<&str>, ratio: Option<&str>) -> RawImageConfig {
        RawImageConfig {
            image_size: size.map(str::to_string),
            aspect_ratio: ratio.map(str::to_string),
        }
    }

    #[test]
    fn missing_config_defaults_to_high_without_ratio() {
        let config = GenerationConfig::normalize(None);
        assert_eq!(config.tier, ResolutionTier::High);
        assert_eq!(config.aspect_ratio, None);
    }

    #[test]
    fn tier_matching_is_case_insensitive_and_accepts_service_labels() {
        for (input, expected) in [
            ("low", ResolutionTier::Low),
            ("MEDIUM", ResolutionTier::Medium),
            (" High ", ResolutionTier::High),
            ("1k", ResolutionTier::Low),
            ("2K", ResolutionTier::Medium),
            ("4k", ResolutionTier::High),
        ] {
            let config = GenerationConfig::normalize(Some(&raw(Some(input), None)));
            assert_eq!(config.tier, expected, "input {input:?}");
        }
    }

    #[test]
    fn unknown_tier_degrades_to_high() {
        let config = GenerationConfig::normalize(Some(&raw(Some("8K"), Some("16:9"))));
        assert_eq!(config.tier, ResolutionTier::High);
        assert_eq!(config.aspect_ratio, Some(AspectRatio::Landscape16x9));
    }

    #[test]
    fn unknown_aspect_ratio_is_dropped_not_guessed() {
        let config = GenerationConfig::normalize(Some(&raw(Some("low"), Some("16:10"))));
        assert_eq!(config.tier, ResolutionTier::Low);
        assert_eq!(config.aspect_ratio, None);
    }

    #[test]
    fn every_allowed_ratio_round_trips_through_its_label() {
        for ratio in AspectRatio::ALL {
            assert_eq!(AspectRatio::parse(ratio.label()), Some(ratio));
        }
        assert_eq!(AspectRatio::ALL.len(), 10);
    }

    #[test]
    fn fallback_is_lowest_tier_without_ratio() {
        let fallback = GenerationConfig::fallback();
        assert_eq!(fallback.tier, ResolutionTier::Low);
        assert_eq!(fallback.tier.image_size_label(), "1K");
        assert_eq!(fallback.aspect_ratio, None);
    }
}
