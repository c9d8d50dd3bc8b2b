use crate::platform::PlatformClass;

const DEFAULT_TITLE: &str = "Untitled";

/// What a codec field says about one track of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Present,
    /// The resolver reported the literal codec `none`.
    Missing,
    /// The resolver did not report a codec at all.
    Unknown,
}

impl TrackState {
    fn from_codec(codec: Option<&str>) -> Self {
        match codec.map(str::trim) {
            None | Some("") => TrackState::Unknown,
            Some("none") => TrackState::Missing,
            Some(_) => TrackState::Present,
        }
    }
}

/// One encoding/container option for a piece of media.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamVariant {
    pub format_id: String,
    pub container_ext: String,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub height: Option<u32>,
    pub format_note: Option<String>,
}

impl StreamVariant {
    pub fn video(&self) -> TrackState {
        TrackState::from_codec(self.video_codec.as_deref())
    }

    pub fn audio(&self) -> TrackState {
        TrackState::from_codec(self.audio_codec.as_deref())
    }

    /// False only when both codecs are explicitly `none`.
    pub fn is_selectable(&self) -> bool {
        !(self.video() == TrackState::Missing && self.audio() == TrackState::Missing)
    }
}

/// Resolved metadata for one source URL.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescriptor {
    pub title: String,
    pub source_platform: PlatformClass,
    pub variants: Vec<StreamVariant>,
}

impl MediaDescriptor {
    pub fn new(
        title: Option<String>,
        source_platform: PlatformClass,
        variants: Vec<StreamVariant>,
    ) -> Self {
        let title = title
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        Self {
            title,
            source_platform,
            variants,
        }
    }

    pub fn variant(&self, format_id: &str) -> Option<&StreamVariant> {
        self.variants
            .iter()
            .find(|variant| variant.format_id == format_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(vcodec: Option<&str>, acodec: Option<&str>) -> StreamVariant {
        StreamVariant {
            format_id: "1".to_string(),
            container_ext: "mp4".to_string(),
            video_codec: vcodec.map(ToString::to_string),
            audio_codec: acodec.map(ToString::to_string),
            height: None,
            format_note: None,
        }
    }

    #[test]
    fn track_state_distinguishes_none_from_absent() {
        let v = variant(Some("avc1"), None);
        assert_eq!(v.video(), TrackState::Present);
        assert_eq!(v.audio(), TrackState::Unknown);

        let v = variant(Some("none"), Some(""));
        assert_eq!(v.video(), TrackState::Missing);
        assert_eq!(v.audio(), TrackState::Unknown);
    }

    #[test]
    fn only_double_none_is_unselectable() {
        assert!(!variant(Some("none"), Some("none")).is_selectable());
        assert!(variant(None, None).is_selectable());
        assert!(variant(Some("none"), Some("mp4a")).is_selectable());
    }

    #[test]
    fn blank_title_falls_back() {
        let descriptor = MediaDescriptor::new(Some("  ".to_string()), PlatformClass::Other, vec![]);
        assert_eq!(descriptor.title, "Untitled");

        let descriptor = MediaDescriptor::new(None, PlatformClass::Other, vec![]);
        assert_eq!(descriptor.title, "Untitled");
    }
}
