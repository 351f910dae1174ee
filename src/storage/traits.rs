use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::models::download::DownloadState;
use crate::models::media::MediaItem;

/// Storage-permission collaborator. The download manager asks at most once
/// per process lifetime.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn has_permission(&self) -> bool;
    async fn request_permission(&self) -> bool;
}

/// Durable persistence surface. `save_to_library` is the primary path;
/// `share` is the explicit, user-confirmed fallback when it fails.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save_to_library(&self, local_path: &Path, filename: &str) -> anyhow::Result<PathBuf>;
    async fn share(&self, local_path: &Path, label: &str) -> anyhow::Result<()>;
}

/// Receives state pushes from the download manager and answers the one
/// question it cannot decide alone.
pub trait DownloadDelegate: Send + Sync {
    fn state_changed(&self, state: &DownloadState);
    /// Asked when the primary persistence path failed. Returning true routes
    /// the file through the share/export surface instead.
    fn confirm_library_fallback(&self, item: &MediaItem) -> bool;
}
