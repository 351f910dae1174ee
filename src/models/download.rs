use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DownloadStatus {
    Downloading,
    Saving,
    Complete,
    Error { message: String },
}

impl DownloadStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, DownloadStatus::Downloading | DownloadStatus::Saving)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Per-job state, keyed by url in the manager's map. `progress` is a fraction
/// in 0.0..=1.0 and never decreases within one job; `status` only moves
/// forward (Downloading → Saving → Complete | Error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadState {
    pub url: String,
    pub filename: String,
    pub progress: f64,
    pub status: DownloadStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadState {
    pub fn new(url: &str, filename: &str) -> Self {
        let now = Utc::now();
        Self {
            url: url.to_string(),
            filename: filename.to_string(),
            progress: 0.0,
            status: DownloadStatus::Downloading,
            started_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A job for this url is already running. The caller must treat this as
    /// a cancel-confirmation request: cancel explicitly, then start again.
    AlreadyDownloading,
}
