use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::error::DownloadError;
use crate::core::transfer;
use crate::models::download::{DownloadState, DownloadStatus, StartOutcome};
use crate::models::media::MediaItem;
use crate::models::settings::DownloadSettings;
use crate::storage::traits::{DownloadDelegate, MediaStore, PermissionProvider};

struct Inner {
    states: HashMap<String, DownloadState>,
    tokens: HashMap<String, CancellationToken>,
    handles: HashMap<String, tokio::task::JoinHandle<()>>,
    // Bumped on every start; deferred cleanup tasks only touch the
    // generation they were scheduled for.
    generations: HashMap<String, u64>,
    permission_granted: Option<bool>,
}

/// One cancellable transfer job per item, keyed by url. Jobs are fully
/// independent: a failing transfer marks only its own entry, and state for a
/// url moves strictly forward (Downloading → Saving → Complete | Error).
#[derive(Clone)]
pub struct DownloadManager {
    client: reqwest::Client,
    permissions: Arc<dyn PermissionProvider>,
    store: Arc<dyn MediaStore>,
    delegate: Arc<dyn DownloadDelegate>,
    settings: DownloadSettings,
    inner: Arc<Mutex<Inner>>,
}

impl DownloadManager {
    pub fn new(
        permissions: Arc<dyn PermissionProvider>,
        store: Arc<dyn MediaStore>,
        delegate: Arc<dyn DownloadDelegate>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            client: transfer::build_client(),
            permissions,
            store,
            delegate,
            settings,
            inner: Arc::new(Mutex::new(Inner {
                states: HashMap::new(),
                tokens: HashMap::new(),
                handles: HashMap::new(),
                generations: HashMap::new(),
                permission_granted: None,
            })),
        }
    }

    /// Starts a job for the item, or reports that one is already running.
    /// `AlreadyDownloading` is a cancel-confirmation request: the existing
    /// job keeps running until the caller explicitly cancels it.
    pub async fn start(&self, item: MediaItem) -> Result<StartOutcome, DownloadError> {
        {
            let inner = self.inner.lock().await;
            if let Some(state) = inner.states.get(&item.url) {
                if state.status.is_active() {
                    return Ok(StartOutcome::AlreadyDownloading);
                }
            }
        }

        self.ensure_permission().await?;

        let token = CancellationToken::new();
        {
            let mut inner = self.inner.lock().await;
            if let Some(state) = inner.states.get(&item.url) {
                if state.status.is_active() {
                    return Ok(StartOutcome::AlreadyDownloading);
                }
            }
            inner
                .states
                .insert(item.url.clone(), DownloadState::new(&item.url, &item.filename));
            inner.tokens.insert(item.url.clone(), token.clone());
            *inner.generations.entry(item.url.clone()).or_insert(0) += 1;
        }
        self.publish(&item.url).await;

        let manager = self.clone();
        let url = item.url.clone();
        let handle = tokio::spawn(async move {
            manager.run_job(item, token).await;
        });
        self.inner.lock().await.handles.insert(url, handle);
        Ok(StartOutcome::Started)
    }

    /// Aborts the transfer for `url` and removes its state entry at once.
    /// No-op when no job exists.
    pub async fn cancel(&self, url: &str) {
        let token = {
            let mut inner = self.inner.lock().await;
            inner.states.remove(url);
            inner.handles.remove(url);
            inner.tokens.remove(url)
        };
        if let Some(token) = token {
            tracing::debug!("[download] cancelled {}", url);
            token.cancel();
        }
    }

    /// Used when a new extraction supersedes the current result set.
    pub async fn cancel_all(&self) {
        let urls: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.tokens.keys().cloned().collect()
        };
        for url in urls {
            self.cancel(&url).await;
        }
    }

    pub async fn state_of(&self, url: &str) -> Option<DownloadState> {
        self.inner.lock().await.states.get(url).cloned()
    }

    /// Waits for every running job to finish. Cancelled jobs count as
    /// finished.
    pub async fn wait_all(&self) {
        loop {
            let handles: Vec<_> = {
                let mut inner = self.inner.lock().await;
                let urls: Vec<String> = inner.handles.keys().cloned().collect();
                urls.into_iter()
                    .filter_map(|u| inner.handles.remove(&u))
                    .collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    async fn ensure_permission(&self) -> Result<(), DownloadError> {
        let mut inner = self.inner.lock().await;
        let granted = match inner.permission_granted {
            Some(granted) => granted,
            None => {
                // Resolved while holding the lock so concurrent first
                // starts cannot both reach the provider.
                let granted = if self.permissions.has_permission().await {
                    true
                } else {
                    self.permissions.request_permission().await
                };
                inner.permission_granted = Some(granted);
                granted
            }
        };
        if granted {
            Ok(())
        } else {
            Err(DownloadError::Permission)
        }
    }

    async fn run_job(&self, item: MediaItem, token: CancellationToken) {
        let url = item.url.clone();
        match self.transfer_and_save(&item, &token).await {
            Ok(()) => {
                tracing::info!("[download] complete {}", url);
                self.finish(&url, DownloadStatus::Complete).await;
            }
            Err(DownloadError::Cancelled) => {
                // State entry was already removed by cancel(); nothing else
                // may be published for this url.
            }
            Err(e) => {
                tracing::warn!("[download] failed {}: {}", url, e);
                self.finish(
                    &url,
                    DownloadStatus::Error {
                        message: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    async fn transfer_and_save(
        &self,
        item: &MediaItem,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let tmp = std::env::temp_dir().join(format!("mediagrab-{}-{}", Uuid::new_v4(), item.filename));

        let (tx, mut rx) = mpsc::channel::<f64>(32);
        let manager = self.clone();
        let progress_url = item.url.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(fraction) = rx.recv().await {
                manager.set_progress(&progress_url, fraction).await;
            }
        });

        let result = tokio::select! {
            r = transfer::fetch_to_file(
                &self.client,
                &item.url,
                &tmp,
                &tx,
                self.settings.max_retries,
                token,
            ) => r,
            _ = token.cancelled() => Err(anyhow::anyhow!("Download cancelado")),
        };
        drop(tx);
        let _ = forwarder.await;

        if token.is_cancelled() {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(DownloadError::Cancelled);
        }
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(DownloadError::Transfer(e.to_string()));
        }

        self.set_status(&item.url, DownloadStatus::Saving).await;

        let saved = match self.store.save_to_library(&tmp, &item.filename).await {
            Ok(path) => {
                tracing::debug!("[download] persisted {}", path.display());
                Ok(())
            }
            Err(primary) => {
                tracing::warn!(
                    "[download] library save failed for {}: {}",
                    item.filename,
                    primary
                );
                if self.delegate.confirm_library_fallback(item) {
                    self.store
                        .share(&tmp, &item.filename)
                        .await
                        .map_err(|e| DownloadError::Persistence(e.to_string()))
                } else {
                    Err(DownloadError::Persistence(primary.to_string()))
                }
            }
        };

        let _ = tokio::fs::remove_file(&tmp).await;
        saved
    }

    /// Monotonic clamp: a restarted attempt inside the retry loop can report
    /// a lower fraction, which must never reach the caller.
    async fn set_progress(&self, url: &str, fraction: f64) {
        let changed = {
            let mut inner = self.inner.lock().await;
            match inner.states.get_mut(url) {
                Some(state) if state.status == DownloadStatus::Downloading => {
                    let clamped = fraction.clamp(0.0, 1.0).max(state.progress);
                    if clamped > state.progress {
                        state.progress = clamped;
                        state.updated_at = Utc::now();
                        true
                    } else {
                        false
                    }
                }
                // Entry gone (cancelled) or already past the transfer phase.
                _ => false,
            }
        };
        if changed {
            self.publish(url).await;
        }
    }

    async fn set_status(&self, url: &str, status: DownloadStatus) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(state) = inner.states.get_mut(url) {
                state.status = status;
                state.updated_at = Utc::now();
            } else {
                return;
            }
        }
        self.publish(url).await;
    }

    async fn finish(&self, url: &str, status: DownloadStatus) {
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.tokens.remove(url);
            match inner.states.get_mut(url) {
                Some(state) => {
                    if status == DownloadStatus::Complete {
                        state.progress = 1.0;
                    }
                    state.status = status;
                    state.updated_at = Utc::now();
                }
                None => return,
            }
            inner.generations.get(url).copied().unwrap_or(0)
        };
        self.publish(url).await;

        // Terminal entries linger briefly so the caller can render the final
        // state, then disappear on their own. A stale task from an earlier
        // job for the same url must not evict a restarted job's entry, hence
        // the generation check.
        let manager = self.clone();
        let url = url.to_string();
        let delay = Duration::from_millis(self.settings.cleanup_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = manager.inner.lock().await;
            if inner.generations.get(&url).copied() != Some(generation) {
                return;
            }
            if let Some(state) = inner.states.get(&url) {
                if state.status.is_terminal() {
                    inner.states.remove(&url);
                    inner.handles.remove(&url);
                }
            }
        });
    }

    async fn publish(&self, url: &str) {
        let state = self.inner.lock().await.states.get(url).cloned();
        if let Some(state) = state {
            self.delegate.state_changed(&state);
        }
    }
}
