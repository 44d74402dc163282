use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, SqlitePool};

use crate::config::ModuleConfig;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The agent's persisted identity and sync state.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LocalModule {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
    pub location: String,
    pub public_key: String,
    pub private_key: String,
    pub server_url: String,
    pub server_endpoint: String,
    pub api_key: String,
    pub wireguard_interface: String,
    pub is_configured: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn open(path: &Path) -> SqlitePool {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let url = format!("sqlite://{}", path.display());
    let mut options = SqliteConnectOptions::from_str(&url)
        .expect("invalid database path")
        .create_if_missing(true);
    if std::env::var("DB_DEBUG").as_deref() != Ok("true") {
        options = options.disable_statement_logging();
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .expect("failed to open module database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run module database migrations");
    pool
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<Option<LocalModule>, StoreError> {
        Ok(
            sqlx::query_as::<_, LocalModule>("SELECT * FROM local_module LIMIT 1")
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Seed or refresh the row from the YAML config. `public_key` is
    /// derived separately (it needs the command gateway) and preserved
    /// when empty here.
    pub async fn sync_from_config(
        &self,
        config: &ModuleConfig,
        public_key: Option<&str>,
    ) -> Result<LocalModule, StoreError> {
        let now = Utc::now();
        Ok(sqlx::query_as::<_, LocalModule>(
            "INSERT INTO local_module (server_id, name, location, public_key, private_key,
                 server_url, server_endpoint, api_key, wireguard_interface, is_configured,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
             ON CONFLICT (server_id) DO UPDATE SET
                 name = excluded.name,
                 location = excluded.location,
                 public_key = CASE WHEN excluded.public_key != ''
                     THEN excluded.public_key ELSE local_module.public_key END,
                 private_key = excluded.private_key,
                 server_url = excluded.server_url,
                 server_endpoint = excluded.server_endpoint,
                 api_key = excluded.api_key,
                 wireguard_interface = excluded.wireguard_interface,
                 updated_at = excluded.updated_at
             RETURNING *",
        )
        .bind(config.module.id)
        .bind(&config.module.name)
        .bind(&config.module.location)
        .bind(public_key.unwrap_or_default())
        .bind(&config.module.private_key)
        .bind(&config.server.url)
        .bind(&config.module.server_endpoint)
        .bind(&config.module.api_key)
        .bind(&config.wireguard.interface)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn mark_configured(&self, configured: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE local_module SET is_configured = ?, updated_at = ?")
            .bind(configured)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_synced(&self) -> Result<(), StoreError> {
        sqlx::query("UPDATE local_module SET last_sync = ?, is_configured = 1, updated_at = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> LocalStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        LocalStore::new(pool)
    }

    fn sample_config() -> ModuleConfig {
        let mut config = ModuleConfig::default();
        config.module.id = 42;
        config.module.name = "edge-01".into();
        config.module.private_key = "PRIVATE".into();
        config.module.api_key = "API".into();
        config.server.url = "http://vpn.example.com".into();
        config
    }

    #[tokio::test]
    async fn seed_and_refresh_keeps_derived_public_key() {
        let store = test_store().await;
        assert!(store.get().await.unwrap().is_none());

        let row = store
            .sync_from_config(&sample_config(), Some("PUBLIC"))
            .await
            .unwrap();
        assert_eq!(row.server_id, 42);
        assert_eq!(row.public_key, "PUBLIC");
        assert!(!row.is_configured);

        // A refresh without a derived key keeps the stored one.
        let row = store.sync_from_config(&sample_config(), None).await.unwrap();
        assert_eq!(row.public_key, "PUBLIC");
    }

    #[tokio::test]
    async fn sync_marks_configured_and_timestamps() {
        let store = test_store().await;
        store
            .sync_from_config(&sample_config(), Some("PUBLIC"))
            .await
            .unwrap();

        store.mark_synced().await.unwrap();
        let row = store.get().await.unwrap().unwrap();
        assert!(row.is_configured);
        assert!(row.last_sync.is_some());
    }
}
