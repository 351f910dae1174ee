use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::classifier::sanitize_name;
use crate::core::error::ArchiveError;
use crate::core::transfer;
use crate::models::settings::ArchiveSettings;
use crate::storage::traits::MediaStore;

/// Share of the aggregate progress bar given to the transfer phase; the
/// compression phase is rescaled into the remaining tail so the caller sees
/// one continuous 0–100 bar.
const TRANSFER_SHARE: f64 = 95.0;

#[derive(Debug)]
pub struct ArchiveOutcome {
    pub path: PathBuf,
    pub failed_urls: Vec<String>,
}

/// Downloads every url in parallel into an isolated temp directory, then
/// serializes the successes into one deflate container. Per-url failures are
/// recorded, never fatal; the job fails only when nothing downloads at all.
/// Temp files disappear regardless of outcome.
pub async fn build_archive(
    client: &reqwest::Client,
    urls: &[String],
    name: &str,
    settings: &ArchiveSettings,
    progress_tx: mpsc::Sender<f64>,
    cancel: &CancellationToken,
) -> Result<ArchiveOutcome, ArchiveError> {
    let staging = tempfile::tempdir()?;
    let total = urls.len().max(1);
    let slots: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(vec![0.0; total]));

    let mut join_set = JoinSet::new();
    for (index, url) in urls.iter().enumerate() {
        let client = client.clone();
        let url = url.clone();
        let target = staging.path().join(member_name(index, &url));
        let cancel = cancel.clone();
        let slots = slots.clone();
        let aggregate_tx = progress_tx.clone();
        let max_retries = settings.max_retries;

        join_set.spawn(async move {
            let (tx, mut rx) = mpsc::channel::<f64>(32);
            let forwarder = tokio::spawn(async move {
                while let Some(fraction) = rx.recv().await {
                    let aggregate = {
                        let mut slots = slots.lock().unwrap();
                        slots[index] = slots[index].max(fraction.clamp(0.0, 1.0));
                        slots.iter().sum::<f64>() / slots.len() as f64 * TRANSFER_SHARE
                    };
                    let _ = aggregate_tx.send(aggregate).await;
                }
            });

            let result =
                transfer::fetch_to_file(&client, &url, &target, &tx, max_retries, &cancel).await;
            drop(tx);
            let _ = forwarder.await;
            (url, target, result.map(|_| ()))
        });
    }

    let mut downloaded: Vec<(String, PathBuf)> = Vec::new();
    let mut failed_urls: Vec<String> = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((url, target, Ok(()))) => downloaded.push((url, target)),
            Ok((url, _, Err(e))) => {
                tracing::warn!("[archive] skipping {}: {}", url, e);
                failed_urls.push(url);
            }
            Err(e) => {
                tracing::warn!("[archive] download task panicked: {}", e);
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(ArchiveError::Cancelled);
    }
    if downloaded.is_empty() {
        return Err(ArchiveError::NothingDownloaded);
    }

    tokio::fs::create_dir_all(&settings.output_dir).await?;
    let container = settings.output_dir.join(container_name(name));
    write_container(&container, downloaded, progress_tx.clone()).await?;
    let _ = progress_tx.send(100.0).await;

    tracing::info!(
        "[archive] wrote {} ({} files, {} failed)",
        container.display(),
        urls.len() - failed_urls.len(),
        failed_urls.len()
    );
    Ok(ArchiveOutcome {
        path: container,
        failed_urls,
    })
}

/// Hands the finished container to the export surface: share sheet first,
/// direct library save as the fallback.
pub async fn export_container(
    store: &dyn MediaStore,
    container: &Path,
    name: &str,
) -> anyhow::Result<()> {
    if let Err(e) = store.share(container, name).await {
        tracing::warn!("[archive] share failed, saving to library instead: {}", e);
        let filename = container
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.zip", name));
        store.save_to_library(container, &filename).await?;
    }
    Ok(())
}

async fn write_container(
    container: &Path,
    files: Vec<(String, PathBuf)>,
    progress_tx: mpsc::Sender<f64>,
) -> Result<(), ArchiveError> {
    let container = container.to_owned();
    tokio::task::spawn_blocking(move || {
        let out = std::fs::File::create(&container)?;
        let mut writer = zip::ZipWriter::new(out);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .compression_level(Some(9));

        let count = files.len();
        for (index, (_, source)) in files.iter().enumerate() {
            let member = source
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("file-{}", index + 1));
            writer
                .start_file(member, options)
                .map_err(|e| ArchiveError::Container(e.to_string()))?;
            let mut src = std::fs::File::open(source)?;
            std::io::copy(&mut src, &mut writer)?;
            let compressed = TRANSFER_SHARE + (100.0 - TRANSFER_SHARE) * (index + 1) as f64 / count as f64;
            let _ = progress_tx.blocking_send(compressed);
        }
        writer
            .finish()
            .map_err(|e| ArchiveError::Container(e.to_string()))?
            .flush()?;
        Ok(())
    })
    .await
    .map_err(|e| ArchiveError::Container(format!("compression task failed: {}", e)))?
}

/// In-container member names come from the decoded last path segment,
/// uniquified with an index prefix so two urls ending alike never collide.
fn member_name(index: usize, url: &str) -> String {
    let segment = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segs| segs.filter(|s| !s.is_empty()).next_back().map(String::from))
        })
        .unwrap_or_default();
    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    let clean = sanitize_name(&decoded);
    let base = if clean.is_empty() { "file".to_string() } else { clean };
    format!("{:02}-{}", index + 1, base)
}

fn container_name(name: &str) -> String {
    let clean = sanitize_name(name);
    let base = if clean.is_empty() { "archive".to_string() } else { clean };
    if base.to_lowercase().ends_with(".zip") {
        base
    } else {
        format!("{}.zip", base)
    }
}
