use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::media::{MediaDescriptor, StreamVariant, TrackState};

const AUDIO_RESOLUTION_LABEL: &str = "audio";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Catalog {
    pub title: String,
    pub formats: Vec<PresentedFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentedFormat {
    pub format_id: String,
    pub ext: String,
    pub resolution: ResolutionLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_note: Option<String>,
    pub kind: StreamKind,
}

/// Serialized as a bare number for heights and a string otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResolutionLabel {
    Height(u32),
    Text(String),
}

/// Display-only label. Plan selection inspects codecs itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamKind {
    #[serde(rename = "audio only")]
    AudioOnly,
    #[serde(rename = "video only")]
    VideoOnly,
    #[serde(rename = "audio + video")]
    AudioVideo,
}

/// Renders a descriptor into the list a user picks from.
///
/// Order follows the descriptor. Variants without an id, repeated ids and
/// variants whose codecs are both `none` are skipped.
pub fn build_catalog(descriptor: &MediaDescriptor) -> Catalog {
    let mut formats = Vec::new();
    let mut seen_ids = HashSet::new();

    for variant in descriptor.variants.iter().filter(|item| item.is_selectable()) {
        let format_id = variant.format_id.trim();
        if format_id.is_empty() || !seen_ids.insert(format_id) {
            debug!("Skipping malformed variant {:?}", variant.format_id);
            continue;
        }
        formats.push(present(variant));
    }

    Catalog {
        title: descriptor.title.clone(),
        formats,
    }
}

fn present(variant: &StreamVariant) -> PresentedFormat {
    let format_note = variant
        .format_note
        .as_deref()
        .map(str::trim)
        .filter(|note| !note.is_empty())
        .map(ToString::to_string);

    let resolution = variant
        .height
        .map(ResolutionLabel::Height)
        .or_else(|| format_note.clone().map(ResolutionLabel::Text))
        .unwrap_or_else(|| ResolutionLabel::Text(AUDIO_RESOLUTION_LABEL.to_string()));

    PresentedFormat {
        format_id: variant.format_id.trim().to_string(),
        ext: variant.container_ext.clone(),
        resolution,
        format_note,
        kind: stream_kind(variant),
    }
}

fn stream_kind(variant: &StreamVariant) -> StreamKind {
    match (variant.video(), variant.audio()) {
        (TrackState::Missing, audio) if audio != TrackState::Missing => StreamKind::AudioOnly,
        (video, audio) if video != TrackState::Missing && audio != TrackState::Present => {
            StreamKind::VideoOnly
        }
        _ => StreamKind::AudioVideo,
    }
}
