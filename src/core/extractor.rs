use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::error::ExtractError;
use crate::core::protocol::{parse_message, PageMessage};
use crate::core::scripts;
use crate::core::stabilize::StabilizePolicy;
use crate::core::surface::{RenderingSurface, SurfaceSession};
use crate::models::media::RawItem;
use crate::models::settings::ExtractionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    Preparing,
    Extracting,
    Done,
    Failed,
}

/// One extraction attempt. Lives from request to terminal result; the seen
/// set guarantees the raw buffer never carries two entries with the same url.
struct ExtractionSession {
    id: u64,
    url: String,
    phase: Phase,
    items: Vec<RawItem>,
    seen: HashSet<String>,
    cancel: CancellationToken,
}

impl ExtractionSession {
    fn new(id: u64, url: String, cancel: CancellationToken) -> Self {
        Self {
            id,
            url,
            phase: Phase::Idle,
            items: Vec::new(),
            seen: HashSet::new(),
            cancel,
        }
    }

    fn advance(&mut self, phase: Phase) {
        tracing::debug!("[extract] session {} {:?} -> {:?}", self.id, self.phase, phase);
        self.phase = phase;
    }

    fn absorb(&mut self, raw: Vec<RawItem>) {
        for item in raw {
            if item.url.is_empty() {
                continue;
            }
            if self.seen.insert(item.url.clone()) {
                self.items.push(item);
            }
        }
    }
}

/// Trims the input and defaults to https when no scheme separator is present.
/// The string is returned as given (plus scheme), not reserialized, so
/// "example.com" becomes exactly "https://example.com".
pub fn normalize_url(input: &str) -> Result<String, ExtractError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Load("empty url".to_string()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    url::Url::parse(&candidate)
        .map_err(|e| ExtractError::Load(format!("invalid url '{}': {}", trimmed, e)))?;
    Ok(candidate)
}

/// Drives one rendering-surface page through the three-script protocol. At
/// most one session is live per controller; calling `extract` again while a
/// session is in flight cancels it, and the superseded call returns
/// `ExtractError::Superseded`.
pub struct ExtractionController {
    surface: Arc<dyn RenderingSurface>,
    settings: ExtractionSettings,
    sequence: AtomicU64,
    active: AtomicU64,
    current_cancel: Mutex<Option<CancellationToken>>,
}

impl ExtractionController {
    pub fn new(surface: Arc<dyn RenderingSurface>, settings: ExtractionSettings) -> Self {
        Self {
            surface,
            settings,
            sequence: AtomicU64::new(0),
            active: AtomicU64::new(0),
            current_cancel: Mutex::new(None),
        }
    }

    pub async fn extract(&self, target: &str) -> Result<Vec<RawItem>, ExtractError> {
        let url = normalize_url(target)?;
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.store(id, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        {
            let mut guard = self.current_cancel.lock().unwrap();
            if let Some(previous) = guard.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        let mut session = ExtractionSession::new(id, url, cancel);
        let mut page = match self.surface.open_session().await {
            Ok(page) => page,
            Err(e) => {
                session.advance(Phase::Failed);
                return Err(e);
            }
        };

        let result = self.drive(&mut *page, &mut session).await;
        page.close().await;

        match &result {
            Ok(_) => session.advance(Phase::Done),
            Err(_) => session.advance(Phase::Failed),
        }

        // A late result from a superseded session is dropped by identity
        // comparison, no matter how the drive ended.
        if self.active.load(Ordering::SeqCst) != id {
            return Err(ExtractError::Superseded);
        }
        result.map(|_| session.items)
    }

    async fn drive(
        &self,
        page: &mut dyn SurfaceSession,
        session: &mut ExtractionSession,
    ) -> Result<(), ExtractError> {
        session.advance(Phase::Loading);
        page.navigate(&session.url).await?;
        page.inject(&scripts::bootstrap_script()).await?;

        let load_window = Duration::from_secs(self.settings.page_load_timeout_secs);
        match tokio::time::timeout(load_window, wait_for_loaded(page, session)).await {
            Ok(result) => result?,
            Err(_) => return Err(ExtractError::Load("page load timed out".to_string())),
        }

        session.advance(Phase::Preparing);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(self.settings.settle_delay_ms)) => {}
            _ = session.cancel.cancelled() => return Err(ExtractError::Superseded),
        }
        let policy = StabilizePolicy::from(&self.settings);
        page.inject(&scripts::prepare_script(&policy)).await?;

        // The wall-clock fallback races the page's own readiness signal;
        // whichever resolves first starts extraction.
        let fallback = Duration::from_secs(self.settings.ready_fallback_secs);
        tokio::select! {
            result = wait_for_ready(page, session) => {
                result?;
                tracing::debug!("[extract] session {} page settled", session.id);
            }
            _ = tokio::time::sleep(fallback) => {
                tracing::debug!(
                    "[extract] session {} readiness fallback fired after {:?}",
                    session.id,
                    fallback
                );
            }
        }

        session.advance(Phase::Extracting);
        page.inject(&scripts::extract_script()).await?;

        let result_window = Duration::from_secs(self.settings.result_timeout_secs);
        let raw = match tokio::time::timeout(result_window, wait_for_result(page, session)).await {
            Ok(result) => result?,
            Err(_) => return Err(ExtractError::Timeout),
        };
        session.absorb(raw);
        Ok(())
    }
}

async fn next_parsed(
    page: &mut dyn SurfaceSession,
    session: &ExtractionSession,
) -> Result<PageMessage, ExtractError> {
    loop {
        let raw = tokio::select! {
            raw = page.next_message() => raw,
            _ = session.cancel.cancelled() => return Err(ExtractError::Superseded),
        };
        let raw = raw.ok_or(ExtractError::Timeout)?;
        match parse_message(&raw)? {
            PageMessage::ExtractionProgress { message } => {
                tracing::debug!("[extract] session {} page: {}", session.id, message);
            }
            other => return Ok(other),
        }
    }
}

async fn wait_for_loaded(
    page: &mut dyn SurfaceSession,
    session: &ExtractionSession,
) -> Result<(), ExtractError> {
    match next_parsed(page, session).await? {
        PageMessage::PageLoaded => Ok(()),
        other => Err(ExtractError::Protocol(format!(
            "expected PAGE_LOADED, got {:?}",
            other
        ))),
    }
}

async fn wait_for_ready(
    page: &mut dyn SurfaceSession,
    session: &ExtractionSession,
) -> Result<(), ExtractError> {
    loop {
        match next_parsed(page, session).await? {
            PageMessage::ReadyForExtraction => return Ok(()),
            // A second PAGE_LOADED can arrive if the page soft-reloads
            // itself; it is harmless here.
            PageMessage::PageLoaded => continue,
            other => {
                return Err(ExtractError::Protocol(format!(
                    "expected READY_FOR_EXTRACTION, got {:?}",
                    other
                )))
            }
        }
    }
}

async fn wait_for_result(
    page: &mut dyn SurfaceSession,
    session: &ExtractionSession,
) -> Result<Vec<RawItem>, ExtractError> {
    loop {
        match next_parsed(page, session).await? {
            PageMessage::ExtractionResult { data, stats } => {
                tracing::debug!(
                    "[extract] session {} result: {} items ({} image, {} video, {} audio)",
                    session.id,
                    stats.total_items,
                    stats.image_count,
                    stats.video_count,
                    stats.audio_count
                );
                return Ok(data);
            }
            // The stabilization loop may still announce readiness after the
            // fallback already moved us on.
            PageMessage::ReadyForExtraction | PageMessage::PageLoaded => continue,
            other => {
                return Err(ExtractError::Protocol(format!(
                    "expected EXTRACTION_RESULT, got {:?}",
                    other
                )))
            }
        }
    }
}
