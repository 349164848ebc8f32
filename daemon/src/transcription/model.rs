//! Local speech model files: lookup, download and SHA-256 verification.

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;
const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ModelStore {
    model_url: String,
    model_path: PathBuf,
    checksum: Option<String>,
    download_timeout: Duration,
}

impl ModelStore {
    pub fn new(model_url: &str, checksum: Option<String>, download_timeout: Duration) -> Result<Self> {
        Ok(Self {
            model_url: model_url.to_string(),
            model_path: find_model_path(model_url)?,
            checksum,
            download_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.model_path
    }

    /// Returns a verified model path, downloading the file when it is
    /// missing or fails its checksum.
    pub async fn ensure(&self) -> Result<PathBuf> {
        if !self.model_path.exists() {
            warn!("Model not found at {:?}, downloading", self.model_path);
            self.download().await?;
        } else if let Some(expected) = &self.checksum {
            let actual = file_checksum(&self.model_path)?;
            if &actual != expected {
                error!("Model checksum mismatch: expected {}, got {}", expected, actual);
                self.download().await?;
            } else {
                info!("Model checksum verified: {}", actual);
            }
        }
        Ok(self.model_path.clone())
    }

    async fn download(&self) -> Result<()> {
        let dir = self
            .model_path
            .parent()
            .ok_or_else(|| anyhow!("Invalid model path"))?;
        tokio::fs::create_dir_all(dir).await?;

        let temp_path = PathBuf::from(format!("{}.tmp", self.model_path.display()));
        let mut last_error = None;

        for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
            if temp_path.exists() {
                tokio::fs::remove_file(&temp_path).await?;
            }

            let result = match self.fetch(&temp_path, attempt).await {
                Ok(digest) => self.verify(&digest),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    tokio::fs::rename(&temp_path, &self.model_path).await?;
                    info!("Model saved to {:?}", self.model_path);
                    return Ok(());
                }
                Err(e) => {
                    error!("Download attempt {} failed: {:#}", attempt, e);
                    last_error = Some(e);
                    if temp_path.exists() {
                        if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                            warn!("Failed to remove partial download: {}", cleanup);
                        }
                    }
                    if attempt < MAX_DOWNLOAD_ATTEMPTS {
                        let delay = Duration::from_millis(1000 * 2_u64.pow(attempt));
                        info!("Retrying in {:?}", delay);
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Model download failed")))
    }

    fn verify(&self, digest: &str) -> Result<()> {
        match &self.checksum {
            Some(expected) if expected != digest => Err(anyhow!(
                "Checksum mismatch: expected {}, got {}",
                expected,
                digest
            )),
            _ => Ok(()),
        }
    }

    /// Streams the model into `temp_path`, hashing as it goes.
    async fn fetch(&self, temp_path: &Path, attempt: u32) -> Result<String> {
        info!(
            "Downloading {} (attempt {}/{})",
            self.model_url, attempt, MAX_DOWNLOAD_ATTEMPTS
        );
        let client = reqwest::Client::builder()
            .timeout(self.download_timeout)
            .connect_timeout(CHUNK_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        let response = client.get(&self.model_url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {}", response.status()));
        }

        let expected_size = response.content_length();
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut file = tokio::fs::File::create(temp_path).await?;
        let mut downloaded = 0u64;
        let mut last_report = Instant::now();

        loop {
            let chunk = match timeout(CHUNK_TIMEOUT, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => return Err(anyhow!("Download error: {}", e)),
                Ok(None) => break,
                Err(_) => return Err(anyhow!("No data received for {:?}", CHUNK_TIMEOUT)),
            };
            downloaded += chunk.len() as u64;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;

            if last_report.elapsed() >= Duration::from_secs(10) {
                last_report = Instant::now();
                match expected_size {
                    Some(total) => info!(
                        "Download progress: {}% ({}/{})",
                        downloaded * 100 / total.max(1),
                        pretty_bytes(downloaded),
                        pretty_bytes(total)
                    ),
                    None => info!("Downloaded {}", pretty_bytes(downloaded)),
                }
            }
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = expected_size {
            if downloaded != expected {
                return Err(anyhow!(
                    "Size mismatch: expected {}, got {}",
                    pretty_bytes(expected),
                    pretty_bytes(downloaded)
                ));
            }
        }
        debug!("Download complete: {}", pretty_bytes(downloaded));
        Ok(hex::encode(hasher.finalize()))
    }
}

pub fn model_file_name(model_url: &str) -> Result<&str> {
    model_url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("Invalid model URL: {}", model_url))
}

/// First existing candidate, else the default location under the data dir.
pub fn find_model_path(model_url: &str) -> Result<PathBuf> {
    let file_name = model_file_name(model_url)?;
    let default_path = crate::config::data_dir().join("models").join(file_name);

    let candidates = [
        default_path.clone(),
        PathBuf::from("/usr/share/whisper").join(file_name),
        PathBuf::from("./models").join(file_name),
    ];
    if let Some(found) = candidates.iter().find(|p| p.exists()) {
        info!("Found model at {:?}", found);
        return Ok(found.clone());
    }
    Ok(default_path)
}

pub fn file_checksum(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn pretty_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}
