use std::path::Path;
#[cfg(test)]
use std::path::PathBuf;

use reqwest::header::ACCEPT;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    #[error("could not write artifact: {0}")]
    Io(#[from] std::io::Error),
}

async fn download_file(url: &str, path: &Path) -> Result<(), FetchError> {
    tracing::info!("Downloading {} from {}", path.display(), url);

    let response = reqwest::Client::new()
        .get(url)
        .header(ACCEPT, "application/octet-stream")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }

    let bytes = response.bytes().await?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Downloads the model artifact when it is missing and a source URL is known.
pub async fn ensure_model_present(model_path: &Path, model_url: Option<&str>) -> Result<(), FetchError> {
    if model_path.exists() {
        return Ok(());
    }
    match model_url {
        Some(url) => download_file(url, model_path).await,
        None => Ok(()),
    }
}

/// Stores raw upload bytes under a random name and returns that file name.
pub async fn save_upload(uploads_dir: &Path, bytes: &[u8]) -> std::io::Result<String> {
    let extension = image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("jpg");
    let filename = format!("{}.{}", Uuid::new_v4(), extension);

    tokio::fs::write(uploads_dir.join(&filename), bytes).await?;
    Ok(filename)
}

#[cfg(test)]
pub fn scratch_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4()))
}
