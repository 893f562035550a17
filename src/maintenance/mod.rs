use std::{
    collections::HashSet,
    io::ErrorKind,
    path::Path,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use futures::future::join_all;
use sqlx::PgPool;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::web::{
    AppState,
    uploads::{discard, is_stored_short},
};

const CLEANUP_INTERVAL_MINUTES: u64 = 15;

/// Starts the background loop that purges expired sessions and orphaned uploads.
pub fn spawn(state: AppState, orphan_grace: Duration) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(CLEANUP_INTERVAL_MINUTES * 60);
        loop {
            if let Err(err) = run_cleanup_cycle(&state, orphan_grace).await {
                error!(?err, "maintenance cycle failed");
            }
            sleep(interval).await;
        }
    });
}

async fn run_cleanup_cycle(state: &AppState, orphan_grace: Duration) -> Result<()> {
    let pool = state.pool();

    let sessions_removed = purge_expired_sessions(&pool).await?;

    let cutoff = SystemTime::now()
        .checked_sub(orphan_grace)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let uploads_removed =
        sweep_orphaned_uploads(&pool, &state.upload_policy().destination, cutoff).await?;

    if sessions_removed > 0 || uploads_removed > 0 {
        info!(sessions_removed, uploads_removed, "maintenance cycle completed");
    }

    Ok(())
}

async fn purge_expired_sessions(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
        .execute(pool)
        .await
        .context("failed to purge expired sessions")?;
    Ok(result.rows_affected())
}

async fn sweep_orphaned_uploads(
    pool: &PgPool,
    destination: &Path,
    cutoff: SystemTime,
) -> Result<u64> {
    let candidates = stale_uploads(destination, cutoff).await?;
    if candidates.is_empty() {
        return Ok(0);
    }

    let referenced: Vec<String> =
        sqlx::query_scalar("SELECT stored_name FROM shorts WHERE stored_name = ANY($1)")
            .bind(&candidates)
            .fetch_all(pool)
            .await
            .context("failed to look up stored shorts")?;
    let referenced: HashSet<String> = referenced.into_iter().collect();

    let removals = candidates
        .iter()
        .filter(|name| !referenced.contains(*name))
        .map(|name| async move { discard(&destination.join(name)).await });
    let removed = join_all(removals).await.into_iter().filter(|ok| *ok).count();

    Ok(removed as u64)
}

/// Lists `short-*` files in `dir` last modified before `cutoff`.
pub async fn stale_uploads(dir: &Path, cutoff: SystemTime) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read upload directory {}", dir.display()));
        }
    };

    let mut stale = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .context("failed to iterate upload directory")?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_stored_short(&name) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(?err, file = %name, "failed to stat upload");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        match metadata.modified() {
            Ok(modified) if modified < cutoff => stale.push(name),
            Ok(_) => {}
            Err(err) => warn!(?err, file = %name, "upload has no modification time"),
        }
    }

    Ok(stale)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn only_short_files_older_than_cutoff_are_stale() {
        let dir = tempdir().expect("temp dir");
        std::fs::write(dir.path().join("short-unknown-1-abcdefgh.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("short-folder")).unwrap();

        let later = SystemTime::now() + Duration::from_secs(3600);
        let stale = stale_uploads(dir.path(), later).await.unwrap();
        assert_eq!(stale, vec!["short-unknown-1-abcdefgh.mp4".to_string()]);

        let earlier = SystemTime::now() - Duration::from_secs(3600);
        assert!(stale_uploads(dir.path(), earlier).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_directory_has_nothing_to_sweep() {
        let dir = tempdir().expect("temp dir");
        let stale = stale_uploads(&dir.path().join("absent"), SystemTime::now())
            .await
            .unwrap();
        assert!(stale.is_empty());
    }
}
