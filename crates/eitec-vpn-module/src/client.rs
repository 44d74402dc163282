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

//! HTTP client for the control-plane server; every call carries the
//! module's API key.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use eitec_vpn_core::types::{HeartbeatReport, TrafficReport};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
}

#[derive(Debug, Clone)]
pub struct ServerClient {
    http: Client,
    base_url: String,
    module_id: i64,
    api_key: String,
}

impl ServerClient {
    pub fn new(base_url: &str, module_id: i64, api_key: &str) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            module_id,
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/api/v1/modules/{}/{suffix}",
            self.base_url, self.module_id
        )
    }

    pub async fn send_heartbeat(&self, report: &HeartbeatReport) -> Result<(), ClientError> {
        let url = self.url("heartbeat");
        debug!(url = %url, "sending heartbeat");

        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(report)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    pub async fn report_traffic(&self, report: &TrafficReport) -> Result<(), ClientError> {
        let url = self.url("traffic");
        debug!(url = %url, rx = report.rx_bytes, tx = report.tx_bytes, "reporting traffic");

        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(report)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Fetch the module's current config as raw bytes; the caller compares
    /// them against the on-disk file.
    pub async fn fetch_config(&self) -> Result<Vec<u8>, ClientError> {
        let url = self.url("config");
        debug!(url = %url, "fetching config");

        let resp = self
            .http
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Server {
        status: status.as_u16(),
        body,
    })
}
