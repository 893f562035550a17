use std::{
    collections::HashMap,
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use axum::extract::{Multipart, multipart::Field};
use chrono::Utc;
use rand_core::{OsRng, RngCore};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::UploadPolicy;

/// Result type used by the upload stage.
pub type UploadResult<T> = Result<T, UploadError>;

const TOKEN_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TOKEN_LEN: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 8;
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;
const STORED_NAME_PREFIX: &str = "short-";

/// Error raised while validating or persisting an upload.
#[derive(Debug)]
pub enum UploadError {
    UnsupportedMediaType {
        mime_type: String,
        allowed: &'static [&'static str],
    },
    FileTooLarge {
        max_bytes: u64,
    },
    TooManyFiles,
    MissingFile {
        field_name: &'static str,
    },
    Failure(String),
}

impl UploadError {
    pub fn failure(message: impl Into<String>) -> Self {
        UploadError::Failure(message.into())
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::UnsupportedMediaType { mime_type, allowed } => write!(
                f,
                "unsupported file format `{mime_type}`, supported formats: {}",
                allowed.join(", ")
            ),
            UploadError::FileTooLarge { max_bytes } => {
                write!(f, "file too large, max {}MB", max_bytes / (1024 * 1024))
            }
            UploadError::TooManyFiles => f.write_str("only one file allowed per upload"),
            UploadError::MissingFile { field_name } => {
                write!(f, "no video file provided in field `{field_name}`")
            }
            UploadError::Failure(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for UploadError {}

/// Metadata describing a stored upload on disk.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub stored_name: String,
    pub stored_path: PathBuf,
}

/// The stored file plus any plain text fields sent alongside it.
#[derive(Debug)]
pub struct UploadOutcome {
    pub file: UploadedFile,
    pub text_fields: HashMap<String, String>,
}

impl UploadOutcome {
    pub fn text(&self, field_name: &str) -> Option<&str> {
        self.text_fields
            .get(field_name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Ensures the destination directory exists. Concurrent first calls all succeed.
pub async fn ensure_directory(path: &Path) -> UploadResult<()> {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(err) => Err(UploadError::failure(format!(
            "unable to create upload directory: {err}"
        ))),
    }
}

/// Builds `short-{user|unknown}-{millis}-{token}{.ext}`.
pub fn stored_name(
    uploader: Option<Uuid>,
    timestamp_millis: i64,
    token: &str,
    extension: &str,
) -> String {
    let owner = uploader
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{STORED_NAME_PREFIX}{owner}-{timestamp_millis}-{token}{extension}")
}

/// Eight base-36 characters drawn from the OS RNG.
pub fn random_token() -> String {
    let mut value = OsRng.next_u64();
    let mut token = String::with_capacity(TOKEN_LEN);
    for _ in 0..TOKEN_LEN {
        token.push(TOKEN_ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    token
}

/// Lowercased extension of the sanitized original name, dot included; empty if none.
pub fn normalized_extension(original_name: &str) -> String {
    let sanitized = sanitize_filename::sanitize(original_name);
    Path::new(&sanitized)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn is_stored_short(file_name: &str) -> bool {
    file_name.starts_with(STORED_NAME_PREFIX)
}

/// Receives exactly one video file from `multipart` and stores it under the policy destination.
///
/// Nothing is left on disk when this returns an error.
pub async fn receive_short(
    mut multipart: Multipart,
    policy: &UploadPolicy,
    uploader: Option<Uuid>,
) -> UploadResult<UploadOutcome> {
    let mut stored: Option<UploadedFile> = None;
    let mut text_fields = HashMap::new();

    let received =
        receive_fields(&mut multipart, policy, uploader, &mut stored, &mut text_fields).await;

    match (received, stored) {
        (Ok(()), Some(file)) => {
            info!(
                stored_name = %file.stored_name,
                size_bytes = file.size_bytes,
                mime_type = %file.mime_type,
                "upload stored"
            );
            Ok(UploadOutcome { file, text_fields })
        }
        (Ok(()), None) => Err(UploadError::MissingFile {
            field_name: policy.field_name,
        }),
        (Err(err), stored) => {
            if let Some(file) = stored {
                discard(&file.stored_path).await;
            }
            warn!(%err, "upload rejected");
            Err(err)
        }
    }
}

async fn receive_fields(
    multipart: &mut Multipart,
    policy: &UploadPolicy,
    uploader: Option<Uuid>,
    stored: &mut Option<UploadedFile>,
    text_fields: &mut HashMap<String, String>,
) -> UploadResult<()> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::failure(err.body_text()))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field.file_name().is_none() {
            if !policy.accepts_text_field(&field_name) {
                return Err(UploadError::failure(format!("unexpected field `{field_name}`")));
            }
            if text_fields.contains_key(&field_name) {
                return Err(UploadError::failure(format!("duplicate field `{field_name}`")));
            }
            let value = read_text_field(field, &field_name).await?;
            text_fields.insert(field_name, value);
            continue;
        }

        if field_name != policy.field_name {
            return Err(UploadError::failure(format!("unexpected field `{field_name}`")));
        }

        if stored.is_some() {
            return Err(UploadError::TooManyFiles);
        }

        *stored = Some(store_file(field, policy, uploader).await?);
    }

    Ok(())
}

async fn read_text_field(mut field: Field<'_>, field_name: &str) -> UploadResult<String> {
    let mut buffer = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| UploadError::failure(err.body_text()))?
    {
        if buffer.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(UploadError::failure(format!("field `{field_name}` is too long")));
        }
        buffer.extend_from_slice(&chunk);
    }

    String::from_utf8(buffer)
        .map_err(|_| UploadError::failure(format!("field `{field_name}` is not valid UTF-8")))
}

async fn store_file(
    mut field: Field<'_>,
    policy: &UploadPolicy,
    uploader: Option<Uuid>,
) -> UploadResult<UploadedFile> {
    let mime_type = declared_mime_type(&field);
    if !policy.allows(&mime_type) {
        return Err(UploadError::UnsupportedMediaType {
            mime_type,
            allowed: policy.allowed_mime_types,
        });
    }

    ensure_directory(&policy.destination).await?;

    let original_name = field.file_name().unwrap_or("upload").to_string();
    let extension = normalized_extension(&original_name);
    let (mut file, stored_name, stored_path) =
        create_unique(&policy.destination, uploader, &extension).await?;

    let written = write_field(&mut field, &mut file, policy.max_file_bytes).await;
    drop(file);

    match written {
        Ok(size_bytes) => Ok(UploadedFile {
            original_name,
            mime_type,
            size_bytes,
            stored_name,
            stored_path,
        }),
        Err(err) => {
            discard(&stored_path).await;
            Err(err)
        }
    }
}

fn declared_mime_type(field: &Field<'_>) -> String {
    field
        .content_type()
        .and_then(|raw| raw.parse::<mime::Mime>().ok())
        .map(|parsed| parsed.essence_str().to_ascii_lowercase())
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.essence_str().to_string())
}

async fn create_unique(
    destination: &Path,
    uploader: Option<Uuid>,
    extension: &str,
) -> UploadResult<(File, String, PathBuf)> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let name = stored_name(uploader, Utc::now().timestamp_millis(), &random_token(), extension);
        let path = destination.join(&name);

        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((file, name, path)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(%name, "stored name already taken, drawing a new token");
            }
            Err(err) => return Err(UploadError::failure(format!("failed to save file: {err}"))),
        }
    }

    Err(UploadError::failure("unable to allocate a unique file name"))
}

async fn write_field(field: &mut Field<'_>, file: &mut File, max_bytes: u64) -> UploadResult<u64> {
    let mut total_bytes: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| UploadError::failure(err.body_text()))?
    {
        total_bytes += chunk.len() as u64;
        if total_bytes > max_bytes {
            return Err(UploadError::FileTooLarge { max_bytes });
        }
        file.write_all(&chunk)
            .await
            .map_err(|err| UploadError::failure(format!("failed to write file: {err}")))?;
    }
    file.flush()
        .await
        .map_err(|err| UploadError::failure(format!("failed to flush file: {err}")))?;

    Ok(total_bytes)
}

/// Removes a stored upload; a file that is already gone counts as removed.
pub async fn discard(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(err) => {
            warn!(?err, file = %path.display(), "failed to remove upload");
            false
        }
    }
}
