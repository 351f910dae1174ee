use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::bail;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::archive;
use crate::core::classifier;
use crate::core::download::DownloadManager;
use crate::core::extractor::ExtractionController;
use crate::core::surface::ChromiumSurface;
use crate::core::transfer;
use crate::models::download::{DownloadState, DownloadStatus, StartOutcome};
use crate::models::media::{MediaItem, MediaType};
use crate::models::settings::AppSettings;
use crate::storage::config;
use crate::storage::library::{LibraryPermissions, LocalLibrary};
use crate::storage::traits::DownloadDelegate;

#[derive(Parser)]
#[command(name = "mediagrab", version, about = "Find and save media embedded on a web page")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the media found on a page
    Scan {
        url: String,
        /// Print the item list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download selected media from a page into the library
    Fetch {
        url: String,
        /// all | images | videos | audio | comma-separated 1-based indices
        #[arg(long, default_value = "all")]
        select: String,
        /// Override the library directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Download selected media and pack it into one zip container
    Archive {
        url: String,
        /// Container name (defaults to the page host)
        #[arg(long)]
        name: Option<String>,
        /// all | images | videos | audio | comma-separated 1-based indices
        #[arg(long, default_value = "all")]
        select: String,
        /// Override the archive output directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let settings = config::load_settings().await;
    match cli.command {
        Command::Scan { url, json } => scan(&url, json, &settings).await,
        Command::Fetch {
            url,
            select,
            output,
        } => fetch(&url, &select, output, settings).await,
        Command::Archive {
            url,
            name,
            select,
            output,
        } => build_archive(&url, name, &select, output, settings).await,
    }
}

/// Extraction failures collapse into one user-facing signal; the concrete
/// cause only reaches the log.
async fn scan_items(url: &str, settings: &AppSettings) -> anyhow::Result<Vec<MediaItem>> {
    let surface = Arc::new(ChromiumSurface::new(settings.extraction.clone()));
    let controller = ExtractionController::new(surface, settings.extraction.clone());
    let raw = match controller.extract(url).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("[cli] extraction failed: {}", e);
            bail!("No media found — extraction failed");
        }
    };
    let items = classifier::classify(raw);
    if items.is_empty() {
        bail!("No media found — extraction failed");
    }
    Ok(items)
}

async fn scan(url: &str, json: bool, settings: &AppSettings) -> anyhow::Result<()> {
    let items = scan_items(url, settings).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    for (i, item) in items.iter().enumerate() {
        let dims = match (item.width, item.height) {
            (Some(w), Some(h)) => format!(" {}x{}", w, h),
            _ => String::new(),
        };
        let embed = if item.is_embed { " (embed)" } else { "" };
        println!(
            "{:3}. [{}]{} {}{} — {}",
            i + 1,
            item.media_type.label(),
            embed,
            item.filename,
            dims,
            item.url
        );
    }
    println!("{} item(s)", items.len());
    Ok(())
}

async fn fetch(
    url: &str,
    select: &str,
    output: Option<PathBuf>,
    mut settings: AppSettings,
) -> anyhow::Result<()> {
    if let Some(dir) = output {
        settings.download.library_dir = dir;
    }
    let items = scan_items(url, &settings).await?;
    let selected = select_items(&items, select)?;

    let library_dir = settings.download.library_dir.clone();
    let delegate = Arc::new(ConsoleDelegate::new());
    let manager = DownloadManager::new(
        Arc::new(LibraryPermissions::new(library_dir.clone())),
        Arc::new(LocalLibrary::new(library_dir.clone())),
        delegate.clone(),
        settings.download.clone(),
    );

    let mut started = 0usize;
    for item in selected {
        if item.is_embed {
            println!("skipping embed {} (no direct file to save)", item.url);
            continue;
        }
        match manager.start(item.clone()).await {
            Ok(StartOutcome::Started) => started += 1,
            Ok(StartOutcome::AlreadyDownloading) => {
                println!("already downloading {}", item.url);
            }
            Err(e) => bail!("download could not start: {}", e),
        }
    }
    if started == 0 {
        bail!("nothing to download for selection '{}'", select);
    }
    manager.wait_all().await;

    let (completed, failed) = delegate.totals();
    println!(
        "{} of {} saved to {}{}",
        completed,
        started,
        library_dir.display(),
        if failed > 0 {
            format!(", {} failed", failed)
        } else {
            String::new()
        }
    );
    Ok(())
}

async fn build_archive(
    url: &str,
    name: Option<String>,
    select: &str,
    output: Option<PathBuf>,
    mut settings: AppSettings,
) -> anyhow::Result<()> {
    if let Some(dir) = output {
        settings.archive.output_dir = dir;
    }
    let items = scan_items(url, &settings).await?;
    let selected = select_items(&items, select)?;
    let urls: Vec<String> = selected
        .iter()
        .filter(|i| !i.is_embed)
        .map(|i| i.url.clone())
        .collect();
    if urls.is_empty() {
        bail!("nothing to archive for selection '{}'", select);
    }

    let name = name.unwrap_or_else(|| {
        url::Url::parse(&crate::core::extractor::normalize_url(url).unwrap_or_default())
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| "archive".to_string())
    });

    let (tx, mut rx) = mpsc::channel::<f64>(64);
    let printer = tokio::spawn(async move {
        let mut throttle = ProgressThrottle::new(250);
        while let Some(percent) = rx.recv().await {
            if throttle.should_emit() || percent >= 100.0 {
                println!("archive: {:.0}%", percent);
            }
        }
    });

    let client = transfer::build_client();
    let outcome = archive::build_archive(
        &client,
        &urls,
        &name,
        &settings.archive,
        tx,
        &CancellationToken::new(),
    )
    .await?;
    let _ = printer.await;

    let store = LocalLibrary::new(settings.archive.output_dir.clone());
    archive::export_container(&store, &outcome.path, &name).await?;

    println!("archive written to {}", outcome.path.display());
    for failed in &outcome.failed_urls {
        println!("failed: {}", failed);
    }
    Ok(())
}

fn select_items(items: &[MediaItem], select: &str) -> anyhow::Result<Vec<MediaItem>> {
    let select = select.trim();
    let filtered: Vec<MediaItem> = match select {
        "all" | "" => items.to_vec(),
        "images" => by_type(items, MediaType::Image),
        "videos" => by_type(items, MediaType::Video),
        "audio" => by_type(items, MediaType::Audio),
        _ => {
            let mut picked = Vec::new();
            for part in select.split(',') {
                let index: usize = part
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid selection '{}'", part.trim()))?;
                if index == 0 || index > items.len() {
                    bail!("selection {} is out of range (1..={})", index, items.len());
                }
                picked.push(items[index - 1].clone());
            }
            picked
        }
    };
    Ok(filtered)
}

fn by_type(items: &[MediaItem], media_type: MediaType) -> Vec<MediaItem> {
    items
        .iter()
        .filter(|i| i.media_type == media_type)
        .cloned()
        .collect()
}

/// Prints state transitions, throttling the per-chunk progress spam.
struct ConsoleDelegate {
    throttle: Mutex<ProgressThrottle>,
    completed: Mutex<usize>,
    failed: Mutex<usize>,
}

impl ConsoleDelegate {
    fn new() -> Self {
        Self {
            throttle: Mutex::new(ProgressThrottle::new(250)),
            completed: Mutex::new(0),
            failed: Mutex::new(0),
        }
    }

    fn totals(&self) -> (usize, usize) {
        (*self.completed.lock().unwrap(), *self.failed.lock().unwrap())
    }
}

impl DownloadDelegate for ConsoleDelegate {
    fn state_changed(&self, state: &DownloadState) {
        match &state.status {
            DownloadStatus::Downloading => {
                if self.throttle.lock().unwrap().should_emit() {
                    println!("{}: {:.0}%", state.filename, state.progress * 100.0);
                }
            }
            DownloadStatus::Saving => println!("{}: saving", state.filename),
            DownloadStatus::Complete => {
                *self.completed.lock().unwrap() += 1;
                println!("{}: done", state.filename);
            }
            DownloadStatus::Error { message } => {
                *self.failed.lock().unwrap() += 1;
                println!("{}: failed ({})", state.filename, message);
            }
        }
    }

    fn confirm_library_fallback(&self, item: &MediaItem) -> bool {
        // Non-interactive run: always take the export fallback rather than
        // losing an already-downloaded file.
        println!(
            "{}: library save failed, opening with the system handler instead",
            item.filename
        );
        true
    }
}

struct ProgressThrottle {
    last_emit: Instant,
    min_interval: Duration,
}

impl ProgressThrottle {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_emit: Instant::now() - Duration::from_secs(10),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_emit) >= self.min_interval {
            self.last_emit = now;
            true
        } else {
            false
        }
    }
}
