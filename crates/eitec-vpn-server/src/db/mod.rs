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

pub mod interfaces;
pub mod peers;
pub mod pool;
pub mod system;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, SqlitePool};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record not found")]
    NotFound,

    #[error("no available addresses in network {network}")]
    PoolExhausted { network: String },

    #[error("address {address} is not available")]
    AddressUnavailable { address: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open the SQLite pool, creating the database file when missing.
/// `DB_DEBUG=true` turns on statement logging.
pub async fn create_pool(path: &str) -> SqlitePool {
    let url = format!("sqlite://{path}");
    let mut options = SqliteConnectOptions::from_str(&url)
        .expect("invalid database path")
        .create_if_missing(true)
        .foreign_keys(true);

    if std::env::var("DB_DEBUG").as_deref() != Ok("true") {
        options = options.disable_statement_logging();
    }

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .expect("failed to create database connection pool")
}

pub async fn migrate(pool: &SqlitePool) {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .expect("failed to run database migrations");
}

/// In-memory pool for tests. A single connection keeps every query on the
/// same in-memory database.
#[doc(hidden)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    migrate(&pool).await;
    pool
}
