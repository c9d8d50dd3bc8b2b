use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::{
    media::{MediaDescriptor, StreamVariant, TrackState},
    platform::PlatformClass,
};

/// Preferred audio source merged into a video-only stream.
const BEST_AUDIO: &str = "bestaudio";
/// Tried when no audio-only stream exists.
const BEST_COMBINED: &str = "best";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
}

impl Container {
    pub fn as_str(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetch strategy handed to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub format_expression: String,
    /// Ordered alternatives tried when `format_expression` cannot be satisfied.
    pub fallbacks: Vec<String>,
    pub needs_merge: bool,
    pub target_container: Option<Container>,
}

impl DownloadPlan {
    pub fn direct(format_id: &str) -> Self {
        Self {
            format_expression: format_id.to_string(),
            fallbacks: Vec::new(),
            needs_merge: false,
            target_container: None,
        }
    }

    pub fn merge_with_best_audio(format_id: &str) -> Self {
        Self {
            format_expression: format!("{format_id}+{BEST_AUDIO}"),
            fallbacks: vec![BEST_COMBINED.to_string()],
            needs_merge: true,
            target_container: Some(Container::Mp4),
        }
    }

    /// The full preference chain, e.g. `22+bestaudio/best`.
    pub fn selector(&self) -> String {
        std::iter::once(self.format_expression.as_str())
            .chain(self.fallbacks.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Format {0:?} is not available for this URL.")]
    FormatNotFound(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
enum InspectionError {
    #[error("variant {0:?} does not report both codecs")]
    UnknownCodecs(String),
}

/// Decides how the chosen variant of `descriptor` should be fetched.
pub fn select_plan(
    descriptor: &MediaDescriptor,
    chosen_format_id: &str,
) -> Result<DownloadPlan, SelectionError> {
    let chosen_format_id = chosen_format_id.trim();
    let variant = descriptor
        .variant(chosen_format_id)
        .ok_or_else(|| SelectionError::FormatNotFound(chosen_format_id.to_string()))?;

    let plan = match descriptor.source_platform {
        PlatformClass::InstagramLike => DownloadPlan::direct(chosen_format_id),
        PlatformClass::YouTubeLike => match is_video_only(variant) {
            Ok(true) => DownloadPlan::merge_with_best_audio(chosen_format_id),
            Ok(false) => DownloadPlan::direct(chosen_format_id),
            Err(error) => {
                warn!(
                    "Codec inspection failed ({error}); merging {chosen_format_id:?} with best audio"
                );
                DownloadPlan::merge_with_best_audio(chosen_format_id)
            }
        },
        PlatformClass::FacebookLike | PlatformClass::Other => {
            DownloadPlan::merge_with_best_audio(chosen_format_id)
        }
    };

    Ok(plan)
}

/// Plan used when no descriptor could be obtained for the download.
///
/// Instagram still gets a direct fetch; every other platform merges.
pub fn fallback_plan(platform: PlatformClass, chosen_format_id: &str) -> DownloadPlan {
    let chosen_format_id = chosen_format_id.trim();
    match platform {
        PlatformClass::InstagramLike => DownloadPlan::direct(chosen_format_id),
        _ => DownloadPlan::merge_with_best_audio(chosen_format_id),
    }
}

fn is_video_only(variant: &StreamVariant) -> Result<bool, InspectionError> {
    match (variant.video(), variant.audio()) {
        (TrackState::Unknown, _) | (_, TrackState::Unknown) => {
            Err(InspectionError::UnknownCodecs(variant.format_id.clone()))
        }
        (video, audio) => Ok(video == TrackState::Present && audio == TrackState::Missing),
    }
}
