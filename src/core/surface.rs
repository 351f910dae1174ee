use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};

use crate::core::error::ExtractError;
use crate::core::protocol::BINDING_NAME;
use crate::models::settings::ExtractionSettings;

/// One page of the sandboxed browser, scoped to a single extraction session.
/// Messages arrive in the order the page posted them.
#[async_trait]
pub trait SurfaceSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), ExtractError>;
    async fn inject(&mut self, script: &str) -> Result<(), ExtractError>;
    /// Next raw protocol payload, or None when the page is gone.
    async fn next_message(&mut self) -> Option<String>;
    async fn close(&mut self);
}

#[async_trait]
pub trait RenderingSurface: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn SurfaceSession>, ExtractError>;
}

/// Headless Chromium behind the CDP. The browser process is launched lazily
/// on the first session and reused afterwards; each session gets its own tab.
pub struct ChromiumSurface {
    settings: ExtractionSettings,
    browser: Mutex<Option<Browser>>,
}

impl ChromiumSurface {
    pub fn new(settings: ExtractionSettings) -> Self {
        Self {
            settings,
            browser: Mutex::new(None),
        }
    }

    fn browser_config(&self) -> anyhow::Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.settings.viewport_width, self.settings.viewport_height)
            .request_timeout(Duration::from_secs(self.settings.page_load_timeout_secs.max(30)));
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.settings.browser_executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(|e| anyhow!(e))
    }

    async fn launch(&self) -> anyhow::Result<Browser> {
        let config = self.browser_config()?;
        let (browser, mut handler) = Browser::launch(config).await?;
        tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });
        tracing::debug!("[surface] browser launched");
        Ok(browser)
    }
}

#[async_trait]
impl RenderingSurface for ChromiumSurface {
    async fn open_session(&self) -> Result<Box<dyn SurfaceSession>, ExtractError> {
        let mut guard = self.browser.lock().await;
        if guard.is_none() {
            let browser = self
                .launch()
                .await
                .map_err(|e| ExtractError::Load(format!("browser launch failed: {}", e)))?;
            *guard = Some(browser);
        }
        let browser = guard.as_ref().unwrap();

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ExtractError::Load(format!("could not open page: {}", e)))?;

        // The binding must exist before navigation so every execution context
        // of the target page can reach it.
        let params = AddBindingParams::builder()
            .name(BINDING_NAME)
            .build()
            .map_err(ExtractError::Protocol)?;
        page.execute(params)
            .await
            .map_err(|e| ExtractError::Protocol(format!("could not register binding: {}", e)))?;

        let mut events = page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(|e| ExtractError::Protocol(format!("could not listen for messages: {}", e)))?;

        let (tx, rx) = mpsc::channel::<String>(64);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.name != BINDING_NAME {
                    continue;
                }
                if tx.send(event.payload.clone()).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(ChromiumSession {
            page: Some(page),
            rx,
            forwarder,
        }))
    }
}

struct ChromiumSession {
    page: Option<chromiumoxide::Page>,
    rx: mpsc::Receiver<String>,
    forwarder: tokio::task::JoinHandle<()>,
}

impl ChromiumSession {
    fn page(&self) -> Result<&chromiumoxide::Page, ExtractError> {
        self.page
            .as_ref()
            .ok_or_else(|| ExtractError::Load("page already closed".to_string()))
    }
}

#[async_trait]
impl SurfaceSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ExtractError> {
        self.page()?
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| ExtractError::Load(format!("navigation to {} failed: {}", url, e)))
    }

    async fn inject(&mut self, script: &str) -> Result<(), ExtractError> {
        self.page()?
            .evaluate(script.to_string())
            .await
            .map(|_| ())
            .map_err(|e| ExtractError::Protocol(format!("script injection failed: {}", e)))
    }

    async fn next_message(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.forwarder.abort();
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::debug!("[surface] page close failed: {}", e);
            }
        }
    }
}
