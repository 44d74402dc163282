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

//! Local tunnel bring-up and teardown.
//!
//! `wg-quick` is the preferred path. When it fails the driver reproduces
//! its steps by hand (`ip` + `wg`), and when the host lacks `resolvconf`
//! it falls back to a DNS-less config with best-effort DNS setup
//! afterwards. Every subprocess call is bounded and the interface is torn
//! down again on a half-finished bring-up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use eitec_vpn_core::command::{
    CommandError, CommandRunner, QUERY_TIMEOUT, WG_QUICK_DOWN_TIMEOUT, WG_QUICK_UP_TIMEOUT,
};
use eitec_vpn_core::ini::{self, IniError, TunnelConfig};

/// How long the post-start `wg show` verification may take.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Interface the cleanup iptables rules reference on gateways.
const GATEWAY_EXTERNAL_INTERFACE: &str = "eth0";

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("config file {0} does not exist")]
    ConfigMissing(PathBuf),

    #[error("invalid config: {0}")]
    Ini(#[from] IniError),

    #[error("{step} failed: {output}")]
    Step { step: &'static str, output: String },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("all bring-up attempts failed; wg-quick: {wg_quick}; manual: {manual}")]
    AllAttemptsFailed { wg_quick: String, manual: String },
}

pub struct TunnelDriver {
    runner: CommandRunner,
    interface: String,
    config_path: PathBuf,
}

impl TunnelDriver {
    pub fn new(runner: CommandRunner, interface: &str, config_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            interface: interface.to_string(),
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub async fn is_up(&self) -> bool {
        self.runner.interface_exists(&self.interface).await
    }

    /// Bring the tunnel up. Idempotent: an already-running interface is
    /// success.
    pub async fn start(&self) -> Result<(), TunnelError> {
        if self.is_up().await {
            debug!(interface = %self.interface, "interface already up");
            return Ok(());
        }
        if !self.config_path.exists() {
            return Err(TunnelError::ConfigMissing(self.config_path.clone()));
        }

        let nodns_path = self.prepare_nodns_fallback().await?;

        let wg_quick_err = match self.start_with_wg_quick().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(interface = %self.interface, error = %e, "wg-quick bring-up failed, trying manual path");
                e
            }
        };

        let manual_err = match self.manual_start(&self.config_path).await {
            Ok(()) => {
                info!(interface = %self.interface, "manual bring-up succeeded");
                return Ok(());
            }
            Err(e) => {
                warn!(interface = %self.interface, error = %e, "manual bring-up failed");
                e
            }
        };

        if let Some(nodns) = nodns_path {
            match self.manual_start(&nodns).await {
                Ok(()) => {
                    info!(interface = %self.interface, "DNS-less bring-up succeeded, setting DNS manually");
                    let content = tokio::fs::read_to_string(&self.config_path).await?;
                    if let Ok(config) = ini::parse_tunnel_config(&content) {
                        self.set_dns_best_effort(&config.dns).await;
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(interface = %self.interface, error = %e, "DNS-less bring-up failed too");
                }
            }
        }

        self.runner
            .force_cleanup(&self.interface, GATEWAY_EXTERNAL_INTERFACE)
            .await;
        Err(TunnelError::AllAttemptsFailed {
            wg_quick: wg_quick_err.to_string(),
            manual: manual_err.to_string(),
        })
    }

    /// Take the tunnel down; a missing interface is success. Failures and
    /// timeouts fall through to a forced cleanup.
    pub async fn stop(&self) -> Result<(), TunnelError> {
        if !self.is_up().await {
            debug!(interface = %self.interface, "interface not up, nothing to stop");
            return Ok(());
        }

        match self
            .runner
            .run("wg-quick", &["down", &self.interface], WG_QUICK_DOWN_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => {
                info!(interface = %self.interface, "interface stopped");
                Ok(())
            }
            Ok(output) => {
                let combined = output.combined();
                if combined.contains("does not exist")
                    || combined.contains("is not a WireGuard interface")
                {
                    return Ok(());
                }
                warn!(interface = %self.interface, output = %combined, "wg-quick down failed, force-cleaning");
                self.runner
                    .force_cleanup(&self.interface, GATEWAY_EXTERNAL_INTERFACE)
                    .await;
                Ok(())
            }
            Err(CommandError::Timeout { .. }) => {
                warn!(interface = %self.interface, "wg-quick down timed out, force-cleaning");
                self.runner
                    .force_cleanup(&self.interface, GATEWAY_EXTERNAL_INTERFACE)
                    .await;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn restart(&self) -> Result<(), TunnelError> {
        self.stop().await?;
        self.start().await
    }

    // -- wg-quick path -------------------------------------------------------

    async fn start_with_wg_quick(&self) -> Result<(), TunnelError> {
        let output = self
            .runner
            .run("wg-quick", &["up", &self.interface], WG_QUICK_UP_TIMEOUT)
            .await?;
        if !output.success() {
            return Err(TunnelError::Step {
                step: "wg-quick up",
                output: output.combined(),
            });
        }

        // wg-quick exiting 0 is not proof the device exists; verify.
        let verify = self
            .runner
            .run("wg", &["show", &self.interface], VERIFY_TIMEOUT)
            .await?;
        if !verify.success() {
            return Err(TunnelError::Step {
                step: "post-start verification",
                output: verify.combined(),
            });
        }

        info!(interface = %self.interface, "interface started via wg-quick");
        Ok(())
    }

    /// When `resolvconf` is missing and the config carries DNS, emit a
    /// `.nodns` sibling so the manual fallback has something `wg-quick`
    /// independent to work from.
    async fn prepare_nodns_fallback(&self) -> Result<Option<PathBuf>, TunnelError> {
        if self.runner.tool_in_path("resolvconf").await {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.config_path).await?;
        if !ini::has_dns(&content) {
            return Ok(None);
        }

        let nodns_path = nodns_sibling(&self.config_path);
        write_mode_600(&nodns_path, &ini::strip_dns(&content)).await?;
        info!(path = %nodns_path.display(), "resolvconf missing, wrote DNS-less fallback config");
        Ok(Some(nodns_path))
    }

    // -- Manual path ---------------------------------------------------------

    /// Reproduce `wg-quick up` with `ip` and `wg`: link add, key via
    /// stdin, address, MTU (best effort), link up, peer. Any failure
    /// after the link exists deletes it again.
    async fn manual_start(&self, config_path: &Path) -> Result<(), TunnelError> {
        let content = tokio::fs::read_to_string(config_path).await?;
        let config = ini::parse_tunnel_config(&content)?;

        self.checked(
            "link add",
            "ip",
            &["link", "add", &self.interface, "type", "wireguard"],
        )
        .await?;

        if let Err(e) = self.configure_link(&config).await {
            let _ = self
                .runner
                .run("ip", &["link", "delete", &self.interface], QUERY_TIMEOUT)
                .await;
            return Err(e);
        }
        Ok(())
    }

    async fn configure_link(&self, config: &TunnelConfig) -> Result<(), TunnelError> {
        let output = self
            .runner
            .run_with_stdin(
                "wg",
                &["set", &self.interface, "private-key", "/dev/stdin"],
                &config.private_key,
                QUERY_TIMEOUT,
            )
            .await?;
        if !output.success() {
            return Err(TunnelError::Step {
                step: "set private key",
                output: output.combined(),
            });
        }

        self.checked(
            "assign address",
            "ip",
            &["-4", "address", "add", &config.address, "dev", &self.interface],
        )
        .await?;

        if let Some(mtu) = config.mtu {
            let mtu = mtu.to_string();
            if let Err(e) = self
                .checked("set mtu", "ip", &["link", "set", "mtu", &mtu, "dev", &self.interface])
                .await
            {
                warn!(interface = %self.interface, error = %e, "mtu setup failed, continuing");
            }
        }

        self.checked("link up", "ip", &["link", "set", "up", "dev", &self.interface])
            .await?;

        if !config.peer_public_key.is_empty() {
            let mut args = vec!["set", &self.interface, "peer", &config.peer_public_key];
            if let Some(endpoint) = &config.peer_endpoint {
                args.push("endpoint");
                args.push(endpoint);
            }
            if let Some(allowed) = &config.peer_allowed_ips {
                args.push("allowed-ips");
                args.push(allowed);
            }
            let output = self.runner.run("wg", &args, QUERY_TIMEOUT).await?;
            if !output.success() {
                return Err(TunnelError::Step {
                    step: "configure peer",
                    output: output.combined(),
                });
            }
        }

        let verify = self
            .runner
            .run("wg", &["show", &self.interface], VERIFY_TIMEOUT)
            .await?;
        if !verify.success() {
            return Err(TunnelError::Step {
                step: "post-start verification",
                output: verify.combined(),
            });
        }
        Ok(())
    }

    async fn checked(
        &self,
        step: &'static str,
        program: &str,
        args: &[&str],
    ) -> Result<(), TunnelError> {
        let output = self.runner.run(program, args, QUERY_TIMEOUT).await?;
        if !output.success() {
            return Err(TunnelError::Step {
                step,
                output: output.combined(),
            });
        }
        Ok(())
    }

    /// DNS setup after a DNS-less bring-up: try systemd-resolved (both
    /// command generations), then host routes toward the resolvers. All
    /// failures are logged and ignored.
    async fn set_dns_best_effort(&self, dns_servers: &[String]) {
        for dns in dns_servers {
            if let Ok(out) = self
                .runner
                .run(
                    "systemd-resolve",
                    &["--set-dns", dns, "--interface", &self.interface],
                    QUERY_TIMEOUT,
                )
                .await
            {
                if out.success() {
                    info!(dns = %dns, "DNS set via systemd-resolve");
                    continue;
                }
            }
            if let Ok(out) = self
                .runner
                .run("resolvectl", &["dns", &self.interface, dns], QUERY_TIMEOUT)
                .await
            {
                if out.success() {
                    info!(dns = %dns, "DNS set via resolvectl");
                    continue;
                }
            }
            match self
                .runner
                .run("ip", &["route", "add", dns, "dev", &self.interface], QUERY_TIMEOUT)
                .await
            {
                Ok(_) => debug!(dns = %dns, "host route toward resolver added"),
                Err(e) => warn!(dns = %dns, error = %e, "could not set up DNS"),
            }
        }
    }
}

fn nodns_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".nodns");
    PathBuf::from(os)
}

async fn write_mode_600(path: &Path, content: &str) -> std::io::Result<()> {
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

/// Replace the managed config on disk, mode 0600.
pub async fn write_config(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}
