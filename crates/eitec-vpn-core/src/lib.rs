//! eitec-vpn-core: Shared WireGuard plumbing for the eitec-vpn ecosystem.
//!
//! This crate contains the pieces both the control-plane server and the
//! gateway module need: Curve25519 key handling, the `wg show … dump`
//! telemetry adapter, the OS command gateway every subprocess call goes
//! through, client-side config parsing, and the wire types exchanged
//! between module agents and the server.

pub mod command;
pub mod ini;
pub mod keys;
pub mod telemetry;
pub mod types;
