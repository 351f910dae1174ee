use serde::{Deserialize, Serialize};

/// Untrusted item shape carried in `EXTRACTION_RESULT.data`. Every field is
/// lenient so that one malformed entry cannot abort deserialization of the
/// whole batch; validation happens in the classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "type")]
    pub media_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub is_embed: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
}

impl MediaType {
    pub fn label(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }
}

/// Canonical media item. Immutable once it leaves the classifier: the url is
/// absolute and never a `data:` URI, the filename is sanitized and non-empty,
/// and width/height are either both present or both absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaItem {
    pub url: String,
    pub media_type: MediaType,
    pub filename: String,
    pub format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub is_embed: bool,
}

/// Counters computed in-page and attached to the terminal protocol message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    #[serde(default)]
    pub total_items: u32,
    #[serde(default)]
    pub image_count: u32,
    #[serde(default)]
    pub video_count: u32,
    #[serde(default)]
    pub audio_count: u32,
}
