//! eitec-vpn-module: gateway agent for the eitec-vpn fleet.
//!
//! Runs on each remote gateway: pulls its config from the control plane,
//! keeps the local WireGuard tunnel up, and reports liveness and traffic
//! back on fixed cadences.

pub mod agent;
pub mod client;
pub mod config;
pub mod db;
pub mod routes;
pub mod status;
pub mod tunnel;

/// Aggregate error of the agent's background cycles.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Client(#[from] client::ClientError),

    #[error(transparent)]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("invalid config: {0}")]
    Ini(#[from] eitec_vpn_core::ini::IniError),

    #[error(transparent)]
    Store(#[from] db::StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
