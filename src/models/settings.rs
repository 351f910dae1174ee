use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub schema_version: u32,
    pub extraction: ExtractionSettings,
    pub download: DownloadSettings,
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Consecutive scroll steps with an unchanged resolved-image count before
    /// the page is declared settled. Empirical value, kept configurable.
    pub stable_steps_required: u32,
    pub max_scroll_attempts: u32,
    pub step_delay_ms: u64,
    /// Pause between PAGE_LOADED and the preparation payload.
    pub settle_delay_ms: u64,
    pub page_load_timeout_secs: u64,
    /// Wall-clock fallback: extraction starts even if READY_FOR_EXTRACTION
    /// never arrives.
    pub ready_fallback_secs: u64,
    pub result_timeout_secs: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub headless: bool,
    pub browser_executable: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    pub library_dir: PathBuf,
    /// How long a terminal entry lingers in the state map before removal.
    pub cleanup_delay_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    pub output_dir: PathBuf,
    pub max_retries: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        let downloads = dirs::download_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            schema_version: 1,
            extraction: ExtractionSettings {
                stable_steps_required: 3,
                max_scroll_attempts: 15,
                step_delay_ms: 500,
                settle_delay_ms: 500,
                page_load_timeout_secs: 30,
                ready_fallback_secs: 20,
                result_timeout_secs: 15,
                viewport_width: 1280,
                viewport_height: 800,
                headless: true,
                browser_executable: None,
            },
            download: DownloadSettings {
                library_dir: downloads.join("mediagrab"),
                cleanup_delay_ms: 2000,
                max_retries: 3,
            },
            archive: ArchiveSettings {
                output_dir: downloads.join("mediagrab"),
                max_retries: 3,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_stabilization_thresholds() {
        let settings = AppSettings::default();
        assert_eq!(settings.extraction.stable_steps_required, 3);
        assert_eq!(settings.extraction.max_scroll_attempts, 15);
        assert_eq!(settings.extraction.step_delay_ms, 500);
    }

    #[test]
    fn settings_roundtrip_json() {
        let settings = AppSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: AppSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schema_version, settings.schema_version);
        assert_eq!(
            back.extraction.max_scroll_attempts,
            settings.extraction.max_scroll_attempts
        );
    }
}
