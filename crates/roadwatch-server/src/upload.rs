//! `POST /upload`: stream a multipart `file` field to a per-session temp file.

use std::io;
use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::Json;
use roadwatch_core::{SessionId, UploadResponse};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::error::ApiError;
use crate::server::AppState;

/// Multipart field carrying the video.
pub const FILE_FIELD: &str = "file";

const DEFAULT_EXTENSION: &str = "mp4";
const MAX_EXTENSION_LEN: usize = 8;

/// Extension to keep from the client's file name. Anything that is not short
/// ASCII alphanumeric falls back to `mp4`, so the stored name never carries
/// client-controlled path characters.
pub fn upload_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map_or_else(|| DEFAULT_EXTENSION.to_string(), str::to_ascii_lowercase)
}

/// Temp path for a session's upload.
pub fn upload_path(upload_dir: &Path, id: &SessionId, extension: &str) -> PathBuf {
    upload_dir.join(format!("{id}.{extension}"))
}

#[instrument(skip_all)]
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    loop {
        let field = multipart.next_field().await?;
        let Some(field) = field else {
            return Err(ApiError::BadRequest(format!("missing `{FILE_FIELD}` field")));
        };
        if field.name() != Some(FILE_FIELD) {
            debug!(name = ?field.name(), "skipping multipart field");
            continue;
        }

        let session_id = SessionId::new();
        let extension = upload_extension(field.file_name());
        let path = upload_path(&state.upload_dir, &session_id, &extension);

        let bytes = match write_field(field, &path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%session_id, path = %path.display(), error = %e, "upload write failed");
                remove_upload(&path).await;
                return Err(match e {
                    WriteError::Multipart(e) => ApiError::Multipart(e),
                    WriteError::Io(_) => ApiError::Internal("failed to store upload".into()),
                });
            }
        };

        state.store.record_upload(session_id.clone(), path.clone());
        info!(%session_id, path = %path.display(), bytes, "upload stored");

        return Ok(Json(UploadResponse {
            path: path.to_string_lossy().into_owned(),
            session_id,
        }));
    }
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("multipart: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),
}

async fn write_field(mut field: Field<'_>, path: &Path) -> Result<u64, WriteError> {
    let mut file = File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Best-effort temp file removal. Failures are logged, never returned.
pub async fn remove_upload(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "temp file removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "temp file already gone");
        }
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
    }
}
