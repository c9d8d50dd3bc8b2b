//! Streams finished artifacts to the client and owns their job directories.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;

pub const DOWNLOAD_FILENAME_HEADER: &str = "x-download-filename";
const FALLBACK_FILENAME: &str = "download.bin";

/// A per-request directory under the transfer dir, removed when dropped.
#[derive(Debug)]
pub struct JobDir {
    path: PathBuf,
}

impl JobDir {
    pub async fn create(transfer_dir: &Path) -> Result<Self, ApiError> {
        let path = transfer_dir.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path).await.map_err(|error| {
            ApiError::internal(format!("Could not prepare the download directory: {error}"))
        })?;
        debug!("Created job directory {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed job directory {:?}", self.path),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove job directory {:?}: {error}", self.path),
        }
    }
}

/// Builds an attachment response for `artifact`.
///
/// `job` travels with the body stream, so the directory is released once the
/// client has received the file or disconnected. On error it is released
/// immediately.
pub async fn attachment(
    job: JobDir,
    artifact: &Path,
    max_bytes: u64,
) -> Result<Response, ApiError> {
    let filename = artifact
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

    let metadata = tokio::fs::metadata(artifact).await.map_err(|error| {
        ApiError::internal(format!("Could not read the downloaded file: {error}"))
    })?;
    if metadata.len() > max_bytes {
        return Err(ApiError::file_too_large(max_bytes));
    }

    let file = tokio::fs::File::open(artifact).await.map_err(|error| {
        ApiError::internal(format!("Could not open the downloaded file: {error}"))
    })?;
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _ = &job;
        chunk
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );
    headers.insert(
        HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        HeaderValue::from_str(&sanitize_ascii_filename(&filename))
            .map_err(|_| ApiError::internal("Could not build the file name header."))?,
    );

    info!("Streaming {:?} ({} bytes)", filename, metadata.len());
    Ok((headers, Body::from_stream(stream)).into_response())
}

/// Removes job directories left behind by a previous run.
pub async fn cleanup_stale_download_jobs(transfer_dir: &Path, older_than: Duration) {
    let mut entries = match tokio::fs::read_dir(transfer_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open the transfer directory for cleanup: {error}");
            }
            return;
        }
    };

    let now = SystemTime::now();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate the transfer directory: {error}");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified_at| now.duration_since(modified_at).ok())
            .unwrap_or_default();
        if age < older_than {
            continue;
        }

        let removal = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match removal {
            Ok(()) => info!("Removed stale download job {:?}", path),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove stale download job {:?}: {error}", path),
        }
    }
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        compact.to_string()
    }
}
