use std::fmt;

use thiserror::Error;
use url::Url;

/// Coarse classification of a source URL, used to pick platform policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformClass {
    YouTubeLike,
    InstagramLike,
    FacebookLike,
    Other,
}

impl PlatformClass {
    pub const ALL: [PlatformClass; 4] = [
        PlatformClass::YouTubeLike,
        PlatformClass::InstagramLike,
        PlatformClass::FacebookLike,
        PlatformClass::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PlatformClass::YouTubeLike => "youtube",
            PlatformClass::InstagramLike => "instagram",
            PlatformClass::FacebookLike => "facebook",
            PlatformClass::Other => "other",
        }
    }
}

impl fmt::Display for PlatformClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a URL by case-insensitive substring match.
///
/// Rules are checked in order, so a URL mentioning both YouTube and Instagram
/// is YouTube-like.
pub fn classify(url: &str) -> PlatformClass {
    let lower = url.to_ascii_lowercase();

    if lower.contains("youtu") {
        PlatformClass::YouTubeLike
    } else if lower.contains("instagram") {
        PlatformClass::InstagramLike
    } else if lower.contains("facebook") || lower.contains("fb.watch") {
        PlatformClass::FacebookLike
    } else {
        PlatformClass::Other
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceUrlError {
    #[error("Missing url parameter.")]
    Missing,
    #[error("Invalid URL: {0}")]
    Invalid(String),
}

/// A validated source URL together with its platform class.
///
/// Built once per request; every later stage reads `platform` from here
/// instead of classifying again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    url: String,
    platform: PlatformClass,
}

impl SourceUrl {
    pub fn parse(input: Option<&str>) -> Result<Self, SourceUrlError> {
        let trimmed = input
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(SourceUrlError::Missing)?;

        let parsed =
            Url::parse(trimmed).map_err(|_| SourceUrlError::Invalid(trimmed.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(SourceUrlError::Invalid(trimmed.to_string()));
        }

        Ok(Self {
            url: trimmed.to_string(),
            platform: classify(trimmed),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn platform(&self) -> PlatformClass {
        self.platform
    }
}
