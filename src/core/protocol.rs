use serde::Deserialize;

use crate::core::error::ExtractError;
use crate::models::media::{ExtractionStats, RawItem};

/// Name of the CDP binding the injected payloads call to post messages back
/// to the host. Registered before navigation so it survives into every
/// execution context of the page.
pub const BINDING_NAME: &str = "__mediagrab_emit";

/// Messages posted by the in-page payloads. Within one session PAGE_LOADED,
/// READY_FOR_EXTRACTION and EXTRACTION_RESULT arrive in that order;
/// EXTRACTION_PROGRESS may interleave anywhere and is advisory only.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    PageLoaded,
    ExtractionProgress {
        #[serde(default)]
        message: String,
    },
    ReadyForExtraction,
    ExtractionResult {
        #[serde(default)]
        data: Vec<RawItem>,
        #[serde(default)]
        stats: ExtractionStats,
    },
}

pub fn parse_message(raw: &str) -> Result<PageMessage, ExtractError> {
    serde_json::from_str(raw).map_err(|e| ExtractError::Protocol(format!("{}: {}", e, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_loaded() {
        let msg = parse_message(r#"{"type":"PAGE_LOADED"}"#).unwrap();
        assert!(matches!(msg, PageMessage::PageLoaded));
    }

    #[test]
    fn parses_progress_with_message() {
        let msg = parse_message(r#"{"type":"EXTRACTION_PROGRESS","message":"scroll 3"}"#).unwrap();
        match msg {
            PageMessage::ExtractionProgress { message } => assert_eq!(message, "scroll 3"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn parses_ready() {
        let msg = parse_message(r#"{"type":"READY_FOR_EXTRACTION"}"#).unwrap();
        assert!(matches!(msg, PageMessage::ReadyForExtraction));
    }

    #[test]
    fn parses_result_with_items_and_stats() {
        let raw = r#"{
            "type": "EXTRACTION_RESULT",
            "data": [
                {"url": "https://a.com/x.jpg", "type": "image", "filename": "x.jpg", "format": "jpg"},
                {"url": "https://a.com/v.mp4", "type": "video", "filename": "v.mp4", "format": "mp4", "isEmbed": false}
            ],
            "stats": {"totalItems": 2, "imageCount": 1, "videoCount": 1, "audioCount": 0}
        }"#;
        match parse_message(raw).unwrap() {
            PageMessage::ExtractionResult { data, stats } => {
                assert_eq!(data.len(), 2);
                assert_eq!(data[0].media_type, "image");
                assert_eq!(data[1].is_embed, Some(false));
                assert_eq!(stats.total_items, 2);
                assert_eq!(stats.image_count, 1);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn result_tolerates_missing_stats() {
        let msg = parse_message(r#"{"type":"EXTRACTION_RESULT","data":[]}"#).unwrap();
        match msg {
            PageMessage::ExtractionResult { data, stats } => {
                assert!(data.is_empty());
                assert_eq!(stats.total_items, 0);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn result_tolerates_partial_raw_items() {
        // One well-formed item plus one that only carries a url must still
        // deserialize; the classifier drops the bad one later.
        let raw = r#"{"type":"EXTRACTION_RESULT","data":[{"url":"https://a.com/x.jpg"}]}"#;
        match parse_message(raw).unwrap() {
            PageMessage::ExtractionResult { data, .. } => {
                assert_eq!(data[0].url, "https://a.com/x.jpg");
                assert!(data[0].media_type.is_empty());
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(parse_message(r#"{"type":"SOMETHING_ELSE"}"#).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_message("not json at all").is_err());
        assert!(parse_message(r#"{"no_type": true}"#).is_err());
    }
}
