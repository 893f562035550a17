use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use crate::{
    config::{ServerConfig, UploadPolicy},
    web::Role,
};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    uploads: Arc<UploadPolicy>,
}

impl AppState {
    pub async fn new(config: &ServerConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self::from_parts(pool, config.upload_policy()))
    }

    pub fn from_parts(pool: PgPool, uploads: UploadPolicy) -> Self {
        Self {
            pool,
            uploads: Arc::new(uploads),
        }
    }

    pub async fn ensure_seed_admin(&self, config: &ServerConfig) -> Result<()> {
        let has_admin: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE role = $1)")
                .bind(Role::Admin.as_str())
                .fetch_one(&self.pool)
                .await
                .context("failed to verify admin presence")?;

        if has_admin {
            return Ok(());
        }

        let password_hash = crate::web::auth::hash_password(&config.seed_admin_password)
            .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;

        sqlx::query(
            "INSERT INTO users (id, username, password_hash, role) VALUES ($1, $2, $3, $4)
             ON CONFLICT (username) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(Uuid::new_v4())
        .bind(&config.seed_admin_username)
        .bind(password_hash)
        .bind(Role::Admin.as_str())
        .execute(&self.pool)
        .await
        .context("failed to insert seed admin user")?;

        info!(
            username = %config.seed_admin_username,
            "seeded default admin user; change its password promptly"
        );

        Ok(())
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.uploads
    }
}
