use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

pub const SHORTS_FIELD_NAME: &str = "videoFile";
pub const SHORTS_TITLE_FIELD: &str = "title";
pub const SHORTS_TEXT_FIELDS: &[&str] = &[SHORTS_TITLE_FIELD];
pub const SHORTS_SUBDIRECTORY: &str = "shorts";
pub const SHORTS_MAX_BYTES: u64 = 100 * 1024 * 1024;
/// Whole-request cap for the upload route: the file plus room for part headers and the title.
pub const SHORTS_MAX_BODY_BYTES: usize = SHORTS_MAX_BYTES as usize + 1024 * 1024;
pub const SHORTS_ALLOWED_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
];

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_UPLOAD_ROOT: &str = "uploads";
const DEFAULT_SEED_ADMIN_USERNAME: &str = "admin";
const DEFAULT_SEED_ADMIN_PASSWORD: &str = "change-me";
const DEFAULT_ORPHAN_GRACE_MINUTES: u64 = 60;

/// Process-wide settings read once at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub database_url: String,
    pub port: u16,
    pub upload_root: PathBuf,
    pub seed_admin_username: String,
    pub seed_admin_password: String,
    pub orphan_grace: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let port = parse_env("PORT")?.unwrap_or(DEFAULT_PORT);
        let upload_root = env::var("UPLOAD_ROOT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_ROOT));
        let orphan_grace = grace_from_minutes(
            parse_env("ORPHAN_GRACE_MINUTES")?.unwrap_or(DEFAULT_ORPHAN_GRACE_MINUTES),
        )?;

        Ok(Self {
            database_url,
            port,
            upload_root,
            seed_admin_username: env::var("SEED_ADMIN_USERNAME")
                .unwrap_or_else(|_| DEFAULT_SEED_ADMIN_USERNAME.to_string()),
            seed_admin_password: env::var("SEED_ADMIN_PASSWORD")
                .unwrap_or_else(|_| DEFAULT_SEED_ADMIN_PASSWORD.to_string()),
            orphan_grace,
        })
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy::shorts(&self.upload_root)
    }
}

fn grace_from_minutes(minutes: u64) -> Result<Duration> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .with_context(|| format!("ORPHAN_GRACE_MINUTES is out of range: {minutes}"))
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        _ => Ok(None),
    }
}

/// Rules applied to a single-file video upload.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    pub destination: PathBuf,
    pub field_name: &'static str,
    pub max_file_bytes: u64,
    pub allowed_mime_types: &'static [&'static str],
    pub text_fields: &'static [&'static str],
}

impl UploadPolicy {
    pub fn shorts(upload_root: impl Into<PathBuf>) -> Self {
        Self {
            destination: upload_root.into().join(SHORTS_SUBDIRECTORY),
            field_name: SHORTS_FIELD_NAME,
            max_file_bytes: SHORTS_MAX_BYTES,
            allowed_mime_types: SHORTS_ALLOWED_MIME_TYPES,
            text_fields: SHORTS_TEXT_FIELDS,
        }
    }

    #[cfg(test)]
    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    pub fn allows(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }

    pub fn accepts_text_field(&self, field_name: &str) -> bool {
        self.text_fields.contains(&field_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorts_policy_targets_shorts_subdirectory() {
        let policy = UploadPolicy::shorts("/srv/app/uploads");
        assert_eq!(policy.destination, PathBuf::from("/srv/app/uploads/shorts"));
        assert_eq!(policy.field_name, "videoFile");
        assert_eq!(policy.max_file_bytes, 104_857_600);
    }

    #[test]
    fn allow_list_is_exact() {
        let policy = UploadPolicy::shorts("uploads");
        assert!(policy.allows("video/mp4"));
        assert!(policy.allows("VIDEO/WEBM"));
        assert!(policy.allows("video/x-matroska"));
        assert!(!policy.allows("image/png"));
        assert!(!policy.allows("video/ogg"));
    }

    #[test]
    fn only_the_title_is_accepted_as_text() {
        let policy = UploadPolicy::shorts("uploads");
        assert!(policy.accepts_text_field("title"));
        assert!(!policy.accepts_text_field("Title"));
        assert!(!policy.accepts_text_field("description"));
    }

    #[test]
    fn body_cap_leaves_room_above_the_file_limit() {
        assert!(SHORTS_MAX_BODY_BYTES as u64 > SHORTS_MAX_BYTES);
        assert!((SHORTS_MAX_BODY_BYTES as u64) - SHORTS_MAX_BYTES <= 1024 * 1024);
    }

    #[test]
    fn grace_period_rejects_overflowing_minutes() {
        assert_eq!(grace_from_minutes(60).unwrap(), Duration::from_secs(3600));
        assert!(grace_from_minutes(u64::MAX).is_err());
    }
}
