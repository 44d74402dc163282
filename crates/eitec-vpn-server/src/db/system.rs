use chrono::Utc;
use sqlx::SqlitePool;

use super::Result;

/// Key/value store for runtime-tunable settings (`server.endpoint`, …).
#[derive(Debug, Clone)]
pub struct SystemConfigStore {
    pool: SqlitePool,
}

impl SystemConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM system_config WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_config (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value,
                 updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn set_get_and_overwrite() {
        let store = SystemConfigStore::new(test_pool().await);

        assert!(store.get("server.endpoint").await.unwrap().is_none());

        store.set("server.endpoint", "vpn.example.com:51820").await.unwrap();
        assert_eq!(
            store.get("server.endpoint").await.unwrap().as_deref(),
            Some("vpn.example.com:51820")
        );

        store.set("server.endpoint", "other:51821").await.unwrap();
        assert_eq!(
            store.get("server.endpoint").await.unwrap().as_deref(),
            Some("other:51821")
        );
    }
}
