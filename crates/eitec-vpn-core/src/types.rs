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

//! Wire types exchanged between module agents and the control-plane server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/modules/{id}/traffic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficReport {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Body of `POST /api/v1/modules/{id}/heartbeat`. The payload is optional
/// context; the heartbeat itself is the request arriving.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatReport {
    #[serde(default)]
    pub tunnel_up: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_handshake: Option<DateTime<Utc>>,
}
