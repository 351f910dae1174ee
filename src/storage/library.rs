use std::path::{Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::storage::traits::{MediaStore, PermissionProvider};

/// Desktop media store: a directory under the user's download folder plays
/// the role of the platform library, and opening the file with the system
/// handler plays the role of the share sheet.
pub struct LocalLibrary {
    dir: PathBuf,
}

impl LocalLibrary {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    async fn unique_target(&self, filename: &str) -> PathBuf {
        let candidate = self.dir.join(filename);
        if !candidate.exists() {
            return candidate;
        }
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let ext = Path::new(filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let mut n = 1;
        loop {
            let candidate = self.dir.join(format!("{} ({}){}", stem, n, ext));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

#[async_trait]
impl MediaStore for LocalLibrary {
    async fn save_to_library(&self, local_path: &Path, filename: &str) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.unique_target(filename).await;
        tokio::fs::copy(local_path, &target).await?;
        tracing::debug!("[library] saved {}", target.display());
        Ok(target)
    }

    async fn share(&self, local_path: &Path, label: &str) -> anyhow::Result<()> {
        tracing::debug!("[library] sharing {} as '{}'", local_path.display(), label);
        open::that(local_path).map_err(|e| anyhow!("could not open share target: {}", e))
    }
}

/// Permission analog on desktop: the library directory must exist and be
/// creatable; "requesting" means trying to create it.
pub struct LibraryPermissions {
    dir: PathBuf,
}

impl LibraryPermissions {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl PermissionProvider for LibraryPermissions {
    async fn has_permission(&self) -> bool {
        tokio::fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn request_permission(&self) -> bool {
        tokio::fs::create_dir_all(&self.dir).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_copies_into_the_library() {
        let tmp = tempfile::tempdir().unwrap();
        let lib_dir = tmp.path().join("library");
        let source = tmp.path().join("src.jpg");
        tokio::fs::write(&source, b"bytes").await.unwrap();

        let library = LocalLibrary::new(lib_dir.clone());
        let saved = library.save_to_library(&source, "photo.jpg").await.unwrap();
        assert_eq!(saved, lib_dir.join("photo.jpg"));
        assert_eq!(std::fs::read(&saved).unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn save_uniquifies_colliding_names() {
        let tmp = tempfile::tempdir().unwrap();
        let lib_dir = tmp.path().to_path_buf();
        let source = tmp.path().join("src.jpg");
        tokio::fs::write(&source, b"x").await.unwrap();

        let library = LocalLibrary::new(lib_dir.clone());
        let first = library.save_to_library(&source, "photo.jpg").await.unwrap();
        let second = library.save_to_library(&source, "photo.jpg").await.unwrap();
        assert_eq!(first, lib_dir.join("photo.jpg"));
        assert_eq!(second, lib_dir.join("photo (1).jpg"));
    }

    #[tokio::test]
    async fn permission_follows_directory_existence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("lib");
        let perms = LibraryPermissions::new(dir.clone());
        assert!(!perms.has_permission().await);
        assert!(perms.request_permission().await);
        assert!(perms.has_permission().await);
    }
}
