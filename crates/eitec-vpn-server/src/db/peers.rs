use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use super::{Result, StoreError};

/// Module status as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Offline = 0,
    Online = 1,
    Warning = 2,
    Unconfigured = 3,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Warning => "warning",
            Self::Unconfigured => "unconfigured",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum UserVpnStatus {
    Offline = 0,
    Online = 1,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Module {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub description: String,
    pub interface_id: i64,
    pub public_key: String,
    pub private_key: String,
    pub preshared_key: Option<String>,
    pub ip_address: String,
    pub local_ip: Option<String>,
    pub status: ModuleStatus,
    pub allowed_ips: String,
    pub persistent_keepalive: i64,
    pub endpoint: Option<String>,
    pub api_key: String,
    pub total_rx_bytes: i64,
    pub total_tx_bytes: i64,
    pub latest_handshake: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserVpn {
    pub id: i64,
    pub module_id: i64,
    pub username: String,
    pub email: String,
    pub description: String,
    pub public_key: String,
    pub private_key: String,
    pub preshared_key: String,
    pub ip_address: String,
    pub status: UserVpnStatus,
    pub allowed_ips: String,
    pub persistent_keepalive: i64,
    pub is_active: bool,
    pub max_devices: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub total_rx_bytes: i64,
    pub total_tx_bytes: i64,
    pub latest_handshake: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column values for a new module row.
#[derive(Debug, Clone)]
pub struct NewModule {
    pub name: String,
    pub location: String,
    pub description: String,
    pub interface_id: i64,
    pub public_key: String,
    pub private_key: String,
    pub preshared_key: Option<String>,
    pub ip_address: String,
    pub local_ip: Option<String>,
    pub allowed_ips: String,
    pub persistent_keepalive: i64,
    pub endpoint: Option<String>,
    pub api_key: String,
}

/// Column values for a new user VPN row.
#[derive(Debug, Clone)]
pub struct NewUserVpn {
    pub module_id: i64,
    pub username: String,
    pub email: String,
    pub description: String,
    pub public_key: String,
    pub private_key: String,
    pub preshared_key: String,
    pub ip_address: String,
    pub allowed_ips: String,
    pub persistent_keepalive: i64,
    pub max_devices: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filters for the paginated module listing.
#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    pub name: Option<String>,
    pub location: Option<String>,
    pub status: Option<ModuleStatus>,
}

#[derive(Debug, Clone)]
pub struct PeerStore {
    pool: SqlitePool,
}

impl PeerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // -- Modules -------------------------------------------------------------

    pub async fn insert_module(
        &self,
        conn: &mut SqliteConnection,
        new: &NewModule,
    ) -> Result<Module> {
        let now = Utc::now();
        Ok(sqlx::query_as::<_, Module>(
            "INSERT INTO modules (name, location, description, interface_id, public_key,
                 private_key, preshared_key, ip_address, local_ip, status, allowed_ips,
                 persistent_keepalive, endpoint, api_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&new.name)
        .bind(&new.location)
        .bind(&new.description)
        .bind(new.interface_id)
        .bind(&new.public_key)
        .bind(&new.private_key)
        .bind(&new.preshared_key)
        .bind(&new.ip_address)
        .bind(&new.local_ip)
        .bind(ModuleStatus::Unconfigured)
        .bind(&new.allowed_ips)
        .bind(new.persistent_keepalive)
        .bind(&new.endpoint)
        .bind(&new.api_key)
        .bind(now)
        .bind(now)
        .fetch_one(conn)
        .await?)
    }

    pub async fn get_module(&self, id: i64) -> Result<Module> {
        sqlx::query_as::<_, Module>("SELECT * FROM modules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn find_module_by_name(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<Option<Module>> {
        Ok(sqlx::query_as::<_, Module>("SELECT * FROM modules WHERE name = ?")
            .bind(name)
            .fetch_optional(conn)
            .await?)
    }

    pub async fn find_module_by_api_key(&self, api_key: &str) -> Result<Option<Module>> {
        Ok(
            sqlx::query_as::<_, Module>("SELECT * FROM modules WHERE api_key = ?")
                .bind(api_key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn find_module_by_public_key(&self, public_key: &str) -> Result<Option<Module>> {
        Ok(
            sqlx::query_as::<_, Module>("SELECT * FROM modules WHERE public_key = ?")
                .bind(public_key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn modules_by_interface(&self, interface_id: i64) -> Result<Vec<Module>> {
        Ok(sqlx::query_as::<_, Module>(
            "SELECT * FROM modules WHERE interface_id = ? ORDER BY id",
        )
        .bind(interface_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list_modules(
        &self,
        filter: &ModuleFilter,
        page: i64,
        size: i64,
    ) -> Result<(Vec<Module>, i64)> {
        let mut where_clause = String::from("WHERE 1=1");
        if filter.name.is_some() {
            where_clause.push_str(" AND name LIKE ?");
        }
        if filter.location.is_some() {
            where_clause.push_str(" AND location LIKE ?");
        }
        if filter.status.is_some() {
            where_clause.push_str(" AND status = ?");
        }

        let count_sql = format!("SELECT COUNT(*) FROM modules {where_clause}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(name) = &filter.name {
            count_query = count_query.bind(format!("%{name}%"));
        }
        if let Some(location) = &filter.location {
            count_query = count_query.bind(format!("%{location}%"));
        }
        if let Some(status) = filter.status {
            count_query = count_query.bind(status);
        }
        let (total,) = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            "SELECT * FROM modules {where_clause} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query_as::<_, Module>(&list_sql);
        if let Some(name) = &filter.name {
            list_query = list_query.bind(format!("%{name}%"));
        }
        if let Some(location) = &filter.location {
            list_query = list_query.bind(format!("%{location}%"));
        }
        if let Some(status) = filter.status {
            list_query = list_query.bind(status);
        }
        let rows = list_query
            .bind(size)
            .bind((page - 1) * size)
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total))
    }

    pub async fn module_count(&self, conn: &mut SqliteConnection, interface_id: i64) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM modules WHERE interface_id = ?")
                .bind(interface_id)
                .fetch_one(conn)
                .await?;
        Ok(count)
    }

    pub async fn set_module_keys(
        &self,
        id: i64,
        public_key: &str,
        private_key: &str,
        status: ModuleStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE modules SET public_key = ?, private_key = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(public_key)
        .bind(private_key)
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_module_fields(
        &self,
        id: i64,
        name: &str,
        location: &str,
        description: &str,
        allowed_ips: &str,
        local_ip: Option<&str>,
        persistent_keepalive: i64,
        endpoint: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE modules SET name = ?, location = ?, description = ?, allowed_ips = ?,
                 local_ip = ?, persistent_keepalive = ?, endpoint = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(location)
        .bind(description)
        .bind(allowed_ips)
        .bind(local_ip)
        .bind(persistent_keepalive)
        .bind(endpoint)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merge one telemetry observation into the module row. Counters are
    /// replaced by the snapshot values, never summed.
    pub async fn record_module_observation(
        &self,
        id: i64,
        status: ModuleStatus,
        rx_bytes: i64,
        tx_bytes: i64,
        latest_handshake: Option<DateTime<Utc>>,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE modules SET status = ?, total_rx_bytes = ?, total_tx_bytes = ?,
                 latest_handshake = COALESCE(?, latest_handshake), last_seen = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(rx_bytes)
        .bind(tx_bytes)
        .bind(latest_handshake)
        .bind(seen_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_module_status(&self, id: i64, status: ModuleStatus) -> Result<()> {
        sqlx::query("UPDATE modules SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch_module(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE modules SET last_seen = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_module_traffic(&self, id: i64, rx_bytes: i64, tx_bytes: i64) -> Result<()> {
        sqlx::query(
            "UPDATE modules SET total_rx_bytes = ?, total_tx_bytes = ?, last_seen = ?,
                 updated_at = ? WHERE id = ?",
        )
        .bind(rx_bytes)
        .bind(tx_bytes)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Age every module (bar unconfigured ones) whose last_seen predates
    /// `cutoff` to offline. Returns how many rows flipped.
    pub async fn age_modules_offline(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE modules SET status = ?, updated_at = ?
             WHERE status NOT IN (?, ?) AND (last_seen IS NULL OR last_seen < ?)",
        )
        .bind(ModuleStatus::Offline)
        .bind(Utc::now())
        .bind(ModuleStatus::Offline)
        .bind(ModuleStatus::Unconfigured)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_module(&self, conn: &mut SqliteConnection, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM modules WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    // -- User VPNs -----------------------------------------------------------

    pub async fn insert_user(
        &self,
        conn: &mut SqliteConnection,
        new: &NewUserVpn,
    ) -> Result<UserVpn> {
        let now = Utc::now();
        Ok(sqlx::query_as::<_, UserVpn>(
            "INSERT INTO user_vpns (module_id, username, email, description, public_key,
                 private_key, preshared_key, ip_address, status, allowed_ips,
                 persistent_keepalive, is_active, max_devices, expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(new.module_id)
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.description)
        .bind(&new.public_key)
        .bind(&new.private_key)
        .bind(&new.preshared_key)
        .bind(&new.ip_address)
        .bind(UserVpnStatus::Offline)
        .bind(&new.allowed_ips)
        .bind(new.persistent_keepalive)
        .bind(new.max_devices)
        .bind(new.expires_at)
        .bind(now)
        .bind(now)
        .fetch_one(conn)
        .await?)
    }

    pub async fn get_user(&self, id: i64) -> Result<UserVpn> {
        sqlx::query_as::<_, UserVpn>("SELECT * FROM user_vpns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn find_user_by_public_key(&self, public_key: &str) -> Result<Option<UserVpn>> {
        Ok(
            sqlx::query_as::<_, UserVpn>("SELECT * FROM user_vpns WHERE public_key = ?")
                .bind(public_key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn find_user_by_name(
        &self,
        conn: &mut SqliteConnection,
        module_id: i64,
        username: &str,
    ) -> Result<Option<UserVpn>> {
        Ok(sqlx::query_as::<_, UserVpn>(
            "SELECT * FROM user_vpns WHERE module_id = ? AND username = ?",
        )
        .bind(module_id)
        .bind(username)
        .fetch_optional(conn)
        .await?)
    }

    pub async fn users_by_module(
        &self,
        module_id: i64,
        page: i64,
        size: i64,
    ) -> Result<(Vec<UserVpn>, i64)> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_vpns WHERE module_id = ?")
                .bind(module_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, UserVpn>(
            "SELECT * FROM user_vpns WHERE module_id = ? ORDER BY created_at DESC
             LIMIT ? OFFSET ?",
        )
        .bind(module_id)
        .bind(size)
        .bind((page - 1) * size)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }

    /// Active users of every module bound to the interface, in id order;
    /// the order the config renderer emits peer blocks in.
    pub async fn active_users_by_interface(&self, interface_id: i64) -> Result<Vec<UserVpn>> {
        Ok(sqlx::query_as::<_, UserVpn>(
            "SELECT user_vpns.* FROM user_vpns
             JOIN modules ON modules.id = user_vpns.module_id
             WHERE modules.interface_id = ? AND user_vpns.is_active = 1
             ORDER BY user_vpns.id",
        )
        .bind(interface_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn active_user_count(
        &self,
        conn: &mut SqliteConnection,
        interface_id: i64,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM user_vpns
             JOIN modules ON modules.id = user_vpns.module_id
             WHERE modules.interface_id = ? AND user_vpns.is_active = 1",
        )
        .bind(interface_id)
        .fetch_one(conn)
        .await?;
        Ok(count)
    }

    pub async fn update_user_fields(
        &self,
        id: i64,
        email: &str,
        description: &str,
        allowed_ips: &str,
        is_active: bool,
        max_devices: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_vpns SET email = ?, description = ?, allowed_ips = ?, is_active = ?,
                 max_devices = ?, expires_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(email)
        .bind(description)
        .bind(allowed_ips)
        .bind(is_active)
        .bind(max_devices)
        .bind(expires_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_user_keys(
        &self,
        id: i64,
        public_key: &str,
        private_key: &str,
        preshared_key: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_vpns SET public_key = ?, private_key = ?, preshared_key = ?,
                 status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(public_key)
        .bind(private_key)
        .bind(preshared_key)
        .bind(UserVpnStatus::Offline)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merge one telemetry observation into the user row; counters replaced.
    pub async fn record_user_observation(
        &self,
        id: i64,
        status: UserVpnStatus,
        rx_bytes: i64,
        tx_bytes: i64,
        latest_handshake: Option<DateTime<Utc>>,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_vpns SET status = ?, total_rx_bytes = ?, total_tx_bytes = ?,
                 latest_handshake = COALESCE(?, latest_handshake), last_seen = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(rx_bytes)
        .bind(tx_bytes)
        .bind(latest_handshake)
        .bind(seen_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_user_status(&self, id: i64, status: UserVpnStatus) -> Result<()> {
        sqlx::query("UPDATE user_vpns SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn age_users_offline(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE user_vpns SET status = ?, updated_at = ?
             WHERE status != ? AND (last_seen IS NULL OR last_seen < ?)",
        )
        .bind(UserVpnStatus::Offline)
        .bind(Utc::now())
        .bind(UserVpnStatus::Offline)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_user(&self, conn: &mut SqliteConnection, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_vpns WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// True when any peer on any interface already uses this public key.
    pub async fn public_key_in_use(
        &self,
        conn: &mut SqliteConnection,
        public_key: &str,
    ) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM modules WHERE public_key = ?1)
                  + (SELECT COUNT(*) FROM user_vpns WHERE public_key = ?1)",
        )
        .bind(public_key)
        .fetch_one(conn)
        .await?;
        Ok(count > 0)
    }

    pub async fn module_stats(&self) -> Result<Vec<(ModuleStatus, i64)>> {
        let rows: Vec<(ModuleStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM modules GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    pub async fn user_stats(&self, module_id: i64) -> Result<(i64, i64, i64, i64)> {
        let (total, online, offline, active): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 1), 0),
                    COALESCE(SUM(status = 0), 0),
                    COALESCE(SUM(is_active), 0)
             FROM user_vpns WHERE module_id = ?",
        )
        .bind(module_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((total, online, offline, active))
    }
}
