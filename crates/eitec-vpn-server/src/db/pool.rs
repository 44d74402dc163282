// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-interface pool of unicast host addresses.
//!
//! Populated once when an interface is created; every address except the
//! network address, the broadcast address and the server address becomes an
//! entry. Allocation is deterministic (lowest free address) and runs inside
//! the caller's transaction so a failed peer insert rolls the claim back.

use std::net::Ipv4Addr;

use chrono::Utc;
use ipnetwork::Ipv4Network;
use sqlx::{SqliteConnection, SqlitePool};

use super::{Result, StoreError};

/// What a used pool entry is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Module,
    User,
}

impl PeerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::User => "user",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PoolEntry {
    pub id: i64,
    pub network: String,
    pub ip_address: String,
    pub is_used: bool,
    pub peer_id: Option<i64>,
    pub peer_kind: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AddressPool {
    pool: SqlitePool,
}

impl AddressPool {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one entry per host address of `network`, skipping the network
    /// address, the broadcast address and `server_ip`. Returns how many
    /// entries were created.
    pub async fn populate(
        &self,
        conn: &mut SqliteConnection,
        network: Ipv4Network,
        server_ip: Ipv4Addr,
    ) -> Result<u32> {
        let now = Utc::now();
        let network_key = network.to_string();
        let base = u32::from(network.network());
        let broadcast = u32::from(network.broadcast());

        let mut created = 0u32;
        for raw in (base + 1)..broadcast {
            let addr = Ipv4Addr::from(raw);
            if addr == server_ip {
                continue;
            }
            sqlx::query(
                "INSERT INTO address_pool (network, ip_address, is_used, created_at, updated_at)
                 VALUES (?, ?, 0, ?, ?)",
            )
            .bind(&network_key)
            .bind(addr.to_string())
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            created += 1;
        }
        Ok(created)
    }

    /// Claim the lowest-numbered free address for `peer_id`. Entries are
    /// ordered numerically via the id column, which follows insertion
    /// order from [`populate`](Self::populate).
    pub async fn allocate(
        &self,
        conn: &mut SqliteConnection,
        network: &str,
        peer_id: i64,
        kind: PeerKind,
    ) -> Result<String> {
        let entry = sqlx::query_as::<_, PoolEntry>(
            "SELECT id, network, ip_address, is_used, peer_id, peer_kind
             FROM address_pool WHERE network = ? AND is_used = 0 ORDER BY id LIMIT 1",
        )
        .bind(network)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::PoolExhausted {
            network: network.to_string(),
        })?;

        self.claim(conn, network, &entry.ip_address, peer_id, kind)
            .await?;
        Ok(entry.ip_address)
    }

    /// Claim a specific address. Fails when the entry is missing or
    /// already used.
    pub async fn claim(
        &self,
        conn: &mut SqliteConnection,
        network: &str,
        address: &str,
        peer_id: i64,
        kind: PeerKind,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE address_pool SET is_used = 1, peer_id = ?, peer_kind = ?, updated_at = ?
             WHERE network = ? AND ip_address = ? AND is_used = 0",
        )
        .bind(peer_id)
        .bind(kind.as_str())
        .bind(Utc::now())
        .bind(network)
        .bind(address)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AddressUnavailable {
                address: address.to_string(),
            });
        }
        Ok(())
    }

    /// Return an address to the pool. Idempotent: releasing a free address
    /// is a no-op.
    pub async fn release(
        &self,
        conn: &mut SqliteConnection,
        network: &str,
        address: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE address_pool SET is_used = 0, peer_id = NULL, peer_kind = NULL, updated_at = ?
             WHERE network = ? AND ip_address = ?",
        )
        .bind(Utc::now())
        .bind(network)
        .bind(address)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Remove every entry of a network; used when its interface is deleted.
    pub async fn drop_network(&self, conn: &mut SqliteConnection, network: &str) -> Result<()> {
        sqlx::query("DELETE FROM address_pool WHERE network = ?")
            .bind(network)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn free_count(&self, network: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM address_pool WHERE network = ? AND is_used = 0")
                .bind(network)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn entry(&self, network: &str, address: &str) -> Result<Option<PoolEntry>> {
        Ok(sqlx::query_as::<_, PoolEntry>(
            "SELECT id, network, ip_address, is_used, peer_id, peer_kind
             FROM address_pool WHERE network = ? AND ip_address = ?",
        )
        .bind(network)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn used_entries(&self, network: &str) -> Result<Vec<PoolEntry>> {
        Ok(sqlx::query_as::<_, PoolEntry>(
            "SELECT id, network, ip_address, is_used, peer_id, peer_kind
             FROM address_pool WHERE network = ? AND is_used = 1 ORDER BY id",
        )
        .bind(network)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    // The test pool holds a single connection; acquire it in a narrow scope
    // so the read helpers can check it out afterwards.

    async fn populated(db: &SqlitePool, network: &str, server_ip: &str) -> (AddressPool, u32) {
        let pool = AddressPool::new(db.clone());
        let mut conn = db.acquire().await.unwrap();
        let created = pool
            .populate(
                &mut conn,
                network.parse().unwrap(),
                server_ip.parse().unwrap(),
            )
            .await
            .unwrap();
        (pool, created)
    }

    async fn allocate(db: &SqlitePool, pool: &AddressPool, network: &str, peer_id: i64) -> Result<String> {
        let mut conn = db.acquire().await.unwrap();
        pool.allocate(&mut conn, network, peer_id, PeerKind::Module)
            .await
    }

    #[tokio::test]
    async fn slash_24_yields_253_entries() {
        let db = test_pool().await;
        let (pool, created) = populated(&db, "10.10.0.0/24", "10.10.0.1").await;
        assert_eq!(created, 253);
        assert_eq!(pool.free_count("10.10.0.0/24").await.unwrap(), 253);

        // Network, broadcast and server address are excluded.
        assert!(pool.entry("10.10.0.0/24", "10.10.0.0").await.unwrap().is_none());
        assert!(pool.entry("10.10.0.0/24", "10.10.0.1").await.unwrap().is_none());
        assert!(pool.entry("10.10.0.0/24", "10.10.0.255").await.unwrap().is_none());
        assert!(pool.entry("10.10.0.0/24", "10.10.0.2").await.unwrap().is_some());
        assert!(pool.entry("10.10.0.0/24", "10.10.0.254").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn slash_30_yields_exactly_one_entry() {
        let db = test_pool().await;
        let (pool, created) = populated(&db, "10.10.0.0/30", "10.10.0.1").await;
        assert_eq!(created, 1);
        assert!(pool.entry("10.10.0.0/30", "10.10.0.2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn allocate_hands_out_lowest_free_address() {
        let db = test_pool().await;
        let (pool, _) = populated(&db, "10.10.0.0/24", "10.10.0.1").await;

        assert_eq!(allocate(&db, &pool, "10.10.0.0/24", 1).await.unwrap(), "10.10.0.2");
        assert_eq!(allocate(&db, &pool, "10.10.0.0/24", 2).await.unwrap(), "10.10.0.3");

        let entry = pool.entry("10.10.0.0/24", "10.10.0.2").await.unwrap().unwrap();
        assert!(entry.is_used);
        assert_eq!(entry.peer_id, Some(1));
        assert_eq!(entry.peer_kind.as_deref(), Some("module"));
    }

    #[tokio::test]
    async fn release_returns_pool_to_equivalent_state() {
        let db = test_pool().await;
        let (pool, _) = populated(&db, "10.10.0.0/24", "10.10.0.1").await;

        let before = pool.free_count("10.10.0.0/24").await.unwrap();
        let addr = allocate(&db, &pool, "10.10.0.0/24", 7).await.unwrap();

        {
            let mut conn = db.acquire().await.unwrap();
            pool.release(&mut conn, "10.10.0.0/24", &addr).await.unwrap();
        }
        assert_eq!(pool.free_count("10.10.0.0/24").await.unwrap(), before);

        let entry = pool.entry("10.10.0.0/24", &addr).await.unwrap().unwrap();
        assert!(!entry.is_used);
        assert!(entry.peer_id.is_none());
        assert!(entry.peer_kind.is_none());

        // Releasing again is a no-op.
        {
            let mut conn = db.acquire().await.unwrap();
            pool.release(&mut conn, "10.10.0.0/24", &addr).await.unwrap();
        }
        assert_eq!(pool.free_count("10.10.0.0/24").await.unwrap(), before);

        // The released address is handed out again (lowest free).
        assert_eq!(allocate(&db, &pool, "10.10.0.0/24", 8).await.unwrap(), addr);
    }

    #[tokio::test]
    async fn exhausted_pool_reports_capacity() {
        let db = test_pool().await;
        let (pool, _) = populated(&db, "10.10.0.0/30", "10.10.0.1").await;

        assert_eq!(allocate(&db, &pool, "10.10.0.0/30", 1).await.unwrap(), "10.10.0.2");

        let err = allocate(&db, &pool, "10.10.0.0/30", 2).await.unwrap_err();
        assert!(matches!(err, StoreError::PoolExhausted { .. }));
    }

    #[tokio::test]
    async fn claim_of_used_address_fails() {
        let db = test_pool().await;
        let (pool, _) = populated(&db, "10.10.0.0/24", "10.10.0.1").await;

        let mut conn = db.acquire().await.unwrap();
        pool.claim(&mut conn, "10.10.0.0/24", "10.10.0.9", 1, PeerKind::Module)
            .await
            .unwrap();
        let err = pool
            .claim(&mut conn, "10.10.0.0/24", "10.10.0.9", 2, PeerKind::Module)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AddressUnavailable { .. }));
    }
}
