use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::media::{MediaItem, MediaType, RawItem};

const MIN_URL_LEN: usize = 10;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "ico", "avif", "heic",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "avi", "m4v", "ts", "3gp"];
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "ogg", "oga", "m4a", "aac", "flac", "opus", "weba",
];

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Validates and normalizes raw candidates into canonical items. Total:
/// never panics, never errors — invalid entries are dropped, because partial
/// results are the expected common case. Deduplication already happened in
/// the raw buffer, so this only validates.
pub fn classify(raw: Vec<RawItem>) -> Vec<MediaItem> {
    raw.iter()
        .filter_map(|item| match classify_one(item) {
            Some(valid) => Some(valid),
            None => {
                tracing::debug!("[classify] dropped candidate: {:?}", item.url);
                None
            }
        })
        .collect()
}

fn classify_one(raw: &RawItem) -> Option<MediaItem> {
    let url = raw.url.trim();
    if url.len() < MIN_URL_LEN || !url.contains("://") || url.starts_with("data:") {
        return None;
    }

    let media_type = match raw.media_type.as_str() {
        "image" => MediaType::Image,
        "video" => MediaType::Video,
        "audio" => MediaType::Audio,
        _ => return None,
    };
    let is_embed = raw.is_embed.unwrap_or(false);

    if raw.filename.is_empty() || raw.format.is_empty() {
        return None;
    }
    let filename = sanitize_name(&raw.filename);
    if filename.is_empty() {
        return None;
    }

    if !is_embed {
        let extension = filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
        let allowed = match extension.as_deref() {
            Some(ext) if !ext.is_empty() => allow_list(media_type).contains(&ext),
            _ => false,
        };
        if !allowed {
            return None;
        }
    }

    let (width, height) = match (raw.width, raw.height) {
        (None, None) => (None, None),
        (Some(w), Some(h)) if valid_dimension(w) && valid_dimension(h) => {
            (Some(w as u32), Some(h as u32))
        }
        _ => return None,
    };

    Some(MediaItem {
        url: url.to_string(),
        media_type,
        filename,
        format: raw.format.to_lowercase(),
        width,
        height,
        is_embed,
    })
}

fn allow_list(media_type: MediaType) -> &'static [&'static str] {
    match media_type {
        MediaType::Image => IMAGE_EXTENSIONS,
        MediaType::Video => VIDEO_EXTENSIONS,
        MediaType::Audio => AUDIO_EXTENSIONS,
    }
}

fn valid_dimension(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value.fract() == 0.0
}

/// NFC-normalizes, collapses whitespace and strips filesystem-hostile
/// characters so the result is always safe as a single path component.
pub fn sanitize_name(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name = WS_RE.replace_all(name.trim(), " ");
    let name = sanitize_filename::sanitize(name.as_ref());
    name.trim_matches([' ', '.']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str, filename: &str, format: &str) -> RawItem {
        RawItem {
            url: url.to_string(),
            media_type: "image".to_string(),
            filename: filename.to_string(),
            format: format.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_a_plain_image() {
        let items = classify(vec![image("https://a.com/photo.jpg", "photo.jpg", "jpg")]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].media_type, MediaType::Image);
        assert_eq!(items[0].filename, "photo.jpg");
        assert!(!items[0].is_embed);
    }

    #[test]
    fn rejects_data_uris() {
        let items = classify(vec![image("data:image/png;base64,AAAA", "a.png", "png")]);
        assert!(items.is_empty());
    }

    #[test]
    fn rejects_schemeless_and_short_urls() {
        assert!(classify(vec![image("a.com/photo.jpg", "photo.jpg", "jpg")]).is_empty());
        assert!(classify(vec![image("http://a", "photo.jpg", "jpg")]).is_empty());
        assert!(classify(vec![image("", "photo.jpg", "jpg")]).is_empty());
    }

    #[test]
    fn rejects_unknown_type_token() {
        let mut raw = image("https://a.com/photo.jpg", "photo.jpg", "jpg");
        raw.media_type = "document".to_string();
        assert!(classify(vec![raw]).is_empty());
    }

    #[test]
    fn rejects_missing_filename_or_format() {
        assert!(classify(vec![image("https://a.com/photo.jpg", "", "jpg")]).is_empty());
        assert!(classify(vec![image("https://a.com/photo.jpg", "photo.jpg", "")]).is_empty());
    }

    #[test]
    fn rejects_extension_outside_the_type_allow_list() {
        // An image carrying a video extension, and a bare name with no
        // extension at all.
        assert!(classify(vec![image("https://a.com/clip.mp4", "clip.mp4", "mp4")]).is_empty());
        assert!(classify(vec![image("https://a.com/photo", "photo", "standard")]).is_empty());
    }

    #[test]
    fn embeds_are_exempt_from_extension_checks() {
        let raw = RawItem {
            url: "https://www.youtube.com/embed/abc123".to_string(),
            media_type: "video".to_string(),
            filename: "abc123".to_string(),
            format: "standard".to_string(),
            is_embed: Some(true),
            ..Default::default()
        };
        let items = classify(vec![raw]);
        assert_eq!(items.len(), 1);
        assert!(items[0].is_embed);
        assert_eq!(items[0].format, "standard");
    }

    #[test]
    fn one_dimension_without_the_other_invalidates() {
        let mut raw = image("https://a.com/photo.jpg", "photo.jpg", "jpg");
        raw.width = Some(640.0);
        assert!(classify(vec![raw]).is_empty());
    }

    #[test]
    fn non_positive_or_fractional_dimensions_invalidate() {
        for (w, h) in [(0.0, 480.0), (-640.0, 480.0), (640.5, 480.0), (f64::NAN, 480.0)] {
            let mut raw = image("https://a.com/photo.jpg", "photo.jpg", "jpg");
            raw.width = Some(w);
            raw.height = Some(h);
            assert!(classify(vec![raw]).is_empty(), "w={} h={}", w, h);
        }
    }

    #[test]
    fn valid_dimensions_survive_as_integers() {
        let mut raw = image("https://a.com/photo.jpg", "photo.jpg", "jpg");
        raw.width = Some(640.0);
        raw.height = Some(480.0);
        let items = classify(vec![raw]);
        assert_eq!(items[0].width, Some(640));
        assert_eq!(items[0].height, Some(480));
    }

    #[test]
    fn format_is_lowercased() {
        let items = classify(vec![image("https://a.com/photo.JPG", "photo.JPG", "JPG")]);
        assert_eq!(items[0].format, "jpg");
    }

    #[test]
    fn audio_and_video_allow_lists_apply() {
        let video = RawItem {
            url: "https://a.com/clip.webm".to_string(),
            media_type: "video".to_string(),
            filename: "clip.webm".to_string(),
            format: "webm".to_string(),
            ..Default::default()
        };
        let audio = RawItem {
            url: "https://a.com/song.flac".to_string(),
            media_type: "audio".to_string(),
            filename: "song.flac".to_string(),
            format: "flac".to_string(),
            ..Default::default()
        };
        assert_eq!(classify(vec![video, audio]).len(), 2);
    }

    #[test]
    fn never_panics_on_garbage_and_returns_the_valid_subset() {
        let garbage = vec![
            RawItem::default(),
            image("https://a.com/ok.png", "ok.png", "png"),
            image("data:text/plain,x", "x.png", "png"),
            RawItem {
                url: "https://a.com/odd.png".to_string(),
                media_type: "image".to_string(),
                filename: "odd.png".to_string(),
                format: "png".to_string(),
                width: Some(f64::INFINITY),
                height: Some(2.0),
                ..Default::default()
            },
        ];
        let items = classify(garbage);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://a.com/ok.png");
    }

    #[test]
    fn sanitize_collapses_whitespace_and_strips_separators() {
        assert_eq!(sanitize_name("my   photo.jpg"), "my photo.jpg");
        assert_eq!(sanitize_name("a/b\\c.png"), "abc.png");
    }

    #[test]
    fn sanitize_applies_nfc_normalization() {
        let decomposed = "e\u{0301}.jpg";
        assert_eq!(sanitize_name(decomposed), "\u{00e9}.jpg");
    }

    #[test]
    fn sanitize_trims_trailing_dots() {
        assert_eq!(sanitize_name("name..."), "name");
    }
}
