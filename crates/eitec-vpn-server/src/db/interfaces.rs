use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use super::{Result, StoreError};

/// Lifecycle of a managed WireGuard interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceStatus {
    Down = 0,
    Starting = 1,
    Up = 2,
    Stopping = 3,
    Error = 4,
}

impl InterfaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Starting => "starting",
            Self::Up => "up",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }

    /// Peer mutations and deletes are refused while the kernel interface
    /// may be live.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Up | Self::Starting)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Interface {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub network: String,
    pub server_ip: String,
    pub listen_port: i64,
    pub public_key: String,
    pub private_key: String,
    pub status: InterfaceStatus,
    pub max_peers: i64,
    pub dns: String,
    pub mtu: i64,
    pub external_interface: String,
    pub pre_up: Option<String>,
    pub post_up: Option<String>,
    pub pre_down: Option<String>,
    pub post_down: Option<String>,
    pub save_config: bool,
    pub total_peers: i64,
    pub active_peers: i64,
    pub total_traffic: i64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column values for a new interface row; validation happens in the
/// interface manager before this is persisted.
#[derive(Debug, Clone)]
pub struct NewInterface {
    pub name: String,
    pub description: String,
    pub network: String,
    pub server_ip: String,
    pub listen_port: i64,
    pub public_key: String,
    pub private_key: String,
    pub max_peers: i64,
    pub dns: String,
    pub mtu: i64,
    pub external_interface: String,
    pub pre_up: Option<String>,
    pub post_up: Option<String>,
    pub pre_down: Option<String>,
    pub post_down: Option<String>,
    pub save_config: bool,
}

#[derive(Debug, Clone)]
pub struct InterfaceStore {
    pool: SqlitePool,
}

impl InterfaceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        new: &NewInterface,
    ) -> Result<Interface> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, Interface>(
            "INSERT INTO interfaces (name, description, network, server_ip, listen_port,
                 public_key, private_key, status, max_peers, dns, mtu, external_interface,
                 pre_up, post_up, pre_down, post_down, save_config, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.network)
        .bind(&new.server_ip)
        .bind(new.listen_port)
        .bind(&new.public_key)
        .bind(&new.private_key)
        .bind(InterfaceStatus::Down)
        .bind(new.max_peers)
        .bind(&new.dns)
        .bind(new.mtu)
        .bind(&new.external_interface)
        .bind(&new.pre_up)
        .bind(&new.post_up)
        .bind(&new.pre_down)
        .bind(&new.post_down)
        .bind(new.save_config)
        .bind(now)
        .bind(now)
        .fetch_one(conn)
        .await?;
        Ok(row)
    }

    pub async fn get(&self, id: i64) -> Result<Interface> {
        sqlx::query_as::<_, Interface>("SELECT * FROM interfaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Interface> {
        sqlx::query_as::<_, Interface>("SELECT * FROM interfaces WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Interface>> {
        Ok(
            sqlx::query_as::<_, Interface>("SELECT * FROM interfaces WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn find_by_port(&self, port: i64) -> Result<Option<Interface>> {
        Ok(
            sqlx::query_as::<_, Interface>("SELECT * FROM interfaces WHERE listen_port = ?")
                .bind(port)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn find_by_network(&self, network: &str) -> Result<Option<Interface>> {
        Ok(
            sqlx::query_as::<_, Interface>("SELECT * FROM interfaces WHERE network = ?")
                .bind(network)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list(&self) -> Result<Vec<Interface>> {
        Ok(
            sqlx::query_as::<_, Interface>("SELECT * FROM interfaces ORDER BY id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn set_status(&self, id: i64, status: InterfaceStatus) -> Result<()> {
        sqlx::query("UPDATE interfaces SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_aggregates(
        &self,
        id: i64,
        total_peers: i64,
        active_peers: i64,
        total_traffic: i64,
        last_heartbeat: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE interfaces SET total_peers = ?, active_peers = ?, total_traffic = ?,
                 last_heartbeat = COALESCE(?, last_heartbeat), updated_at = ?
             WHERE id = ?",
        )
        .bind(total_peers)
        .bind(active_peers)
        .bind(total_traffic)
        .bind(last_heartbeat)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM interfaces WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
