use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CHUNK_TIMEOUT: Duration = Duration::from_secs(45);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .cookie_store(true)
        .build()
        .unwrap_or_default()
}

/// Streams `url` into `output`, reporting fractional progress (0.0..=1.0)
/// through the channel. Retries transient failures with jittered backoff;
/// fatal failures (4xx, HTML-instead-of-media, cancellation) abort at once.
/// Returns the number of bytes written.
pub async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    progress_tx: &mpsc::Sender<f64>,
    max_retries: u32,
    cancel: &CancellationToken,
) -> anyhow::Result<u64> {
    let attempts = max_retries.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(anyhow!("Download cancelado"));
        }

        if attempt > 0 {
            let base = 1000 * (attempt as u64);
            let jitter = rand::random::<u64>() % (base / 2 + 1);
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
        }

        match fetch_attempt(client, url, output, progress_tx, cancel).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if is_fatal_error(&e) {
                    let _ = tokio::fs::remove_file(&part_path_for(output)).await;
                    return Err(e);
                }
                tracing::warn!(
                    "[transfer] attempt {}/{} failed for {}: {}",
                    attempt + 1,
                    attempts,
                    url,
                    e
                );
                last_err = Some(e);
            }
        }
    }

    let _ = tokio::fs::remove_file(&part_path_for(output)).await;
    Err(last_err.unwrap_or_else(|| anyhow!("Download falhou após {} tentativas", attempts)))
}

fn part_path_for(output: &Path) -> PathBuf {
    let mut part = output.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

fn is_fatal_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    for code in &[
        "HTTP 400", "HTTP 401", "HTTP 403", "HTTP 404", "HTTP 405", "HTTP 410", "HTTP 451",
    ] {
        if msg.contains(code) {
            return true;
        }
    }
    if msg.contains("HTML em vez de mídia") {
        return true;
    }
    if msg.contains("cancelado") {
        return true;
    }
    false
}

async fn fetch_attempt(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    progress_tx: &mpsc::Sender<f64>,
    cancel: &CancellationToken,
) -> anyhow::Result<u64> {
    let part_path = part_path_for(output);
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(anyhow!("HTTP {} ao baixar {}", response.status().as_u16(), url));
    }

    if let Some(ct) = response.headers().get("content-type") {
        if let Ok(ct_str) = ct.to_str() {
            if ct_str.contains("text/html") {
                return Err(anyhow!(
                    "Servidor retornou HTML em vez de mídia — URL pode ter expirado"
                ));
            }
        }
    }

    let total_size = response.content_length();
    let file = tokio::fs::File::create(&part_path).await?;
    let mut file = tokio::io::BufWriter::with_capacity(256 * 1024, file);
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    loop {
        if cancel.is_cancelled() {
            file.flush().await?;
            return Err(anyhow!("Download cancelado"));
        }

        let chunk_result = tokio::time::timeout(CHUNK_TIMEOUT, stream.next()).await;
        match chunk_result {
            Ok(Some(Ok(chunk))) => {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| anyhow!("Erro de escrita (disco cheio?): {}", e))?;
                downloaded += chunk.len() as u64;

                let fraction = match total_size {
                    Some(total) if total > 0 => downloaded as f64 / total as f64,
                    // Unknown size: asymptotic guess so the bar still moves.
                    _ => (downloaded as f64 / (downloaded as f64 + 500_000.0)).min(0.95),
                };
                let _ = progress_tx.send(fraction.min(1.0)).await;
            }
            Ok(Some(Err(e))) => {
                file.flush().await?;
                return Err(anyhow!("Erro no stream de download: {}", e));
            }
            Ok(None) => break,
            Err(_) => {
                file.flush().await?;
                return Err(anyhow!(
                    "Download timeout — nenhum dado recebido por {} segundos",
                    CHUNK_TIMEOUT.as_secs()
                ));
            }
        }
    }

    file.flush().await?;

    if let Some(expected) = total_size {
        let actual = tokio::fs::metadata(&part_path).await?.len();
        if expected > 0 && actual != expected {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(anyhow!(
                "Tamanho incorreto: esperado {} bytes, recebido {}",
                expected,
                actual
            ));
        }
    }

    tokio::fs::rename(&part_path, output).await?;
    let _ = progress_tx.send(1.0).await;

    let size = tokio::fs::metadata(output).await?.len();
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink() -> (mpsc::Sender<f64>, mpsc::Receiver<f64>) {
        mpsc::channel(64)
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path_for(Path::new("photo.jpg")),
            PathBuf::from("photo.jpg.part")
        );
    }

    #[test]
    fn fatal_classification() {
        assert!(is_fatal_error(&anyhow!("HTTP 404 ao baixar url")));
        assert!(is_fatal_error(&anyhow!("HTTP 403 ao baixar url")));
        assert!(is_fatal_error(&anyhow!(
            "Servidor retornou HTML em vez de mídia — URL pode ter expirado"
        )));
        assert!(is_fatal_error(&anyhow!("Download cancelado")));
        assert!(!is_fatal_error(&anyhow!("HTTP 500 ao baixar url")));
        assert!(!is_fatal_error(&anyhow!("connection timed out")));
    }

    #[tokio::test]
    async fn downloads_bytes_and_finishes_at_full_progress() {
        let server = MockServer::start().await;
        let body = vec![7u8; 4096];
        Mock::given(method("GET"))
            .and(path("/img.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("img.jpg");
        let (tx, mut rx) = sink();
        let cancel = CancellationToken::new();

        let size = fetch_to_file(
            &build_client(),
            &format!("{}/img.jpg", server.uri()),
            &output,
            &tx,
            3,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(size, 4096);
        assert_eq!(std::fs::read(&output).unwrap(), body);

        drop(tx);
        let mut last = 0.0;
        let mut monotonic = true;
        while let Some(f) = rx.recv().await {
            if f < last {
                monotonic = false;
            }
            last = f;
        }
        assert!(monotonic, "progress went backwards");
        assert_eq!(last, 1.0);
    }

    #[tokio::test]
    async fn not_found_fails_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = sink();
        let err = fetch_to_file(
            &build_client(),
            &format!("{}/gone.jpg", server.uri()),
            &dir.path().join("gone.jpg"),
            &tx,
            3,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn server_error_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("flaky.jpg");
        let (tx, _rx) = sink();
        let size = fetch_to_file(
            &build_client(),
            &format!("{}/flaky.jpg", server.uri()),
            &output,
            &tx,
            3,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(size, 2);
    }

    #[tokio::test]
    async fn html_response_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/expired.jpg"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = sink();
        let err = fetch_to_file(
            &build_client(),
            &format!("{}/expired.jpg", server.uri()),
            &dir.path().join("expired.jpg"),
            &tx,
            3,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("HTML em vez de mídia"));
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = sink();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetch_to_file(
            &build_client(),
            "http://127.0.0.1:1/never.jpg",
            &dir.path().join("never.jpg"),
            &tx,
            3,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("cancelado"));
    }

    #[tokio::test]
    async fn no_part_file_is_left_behind_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clean.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clean.jpg");
        let (tx, _rx) = sink();
        fetch_to_file(
            &build_client(),
            &format!("{}/clean.jpg", server.uri()),
            &output,
            &tx,
            3,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(output.exists());
        assert!(!part_path_for(&output).exists());
    }
}
