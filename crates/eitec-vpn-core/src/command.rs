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

//! The OS command gateway. Every external command (`wg`, `wg-quick`, `ip`,
//! `iptables`, …) is executed here and nowhere else, always with a bounded
//! deadline and captured output.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Deadline for `ip`/`wg` queries and other short-lived commands.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for `wg-quick down`.
pub const WG_QUICK_DOWN_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for `wg-quick up`.
pub const WG_QUICK_UP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("`{program}` not found in PATH")]
    ToolMissing { program: String },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a finished command: exit code plus both streams.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Both streams joined, for error messages.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `program args…` with a deadline. The child is killed when the
    /// deadline expires (kill_on_drop reaps it as the wait future is
    /// dropped).
    pub async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CmdOutput, CommandError> {
        self.run_inner(program, args, None, timeout).await
    }

    /// Same as [`run`](Self::run) but pipes `stdin_data` into the child.
    pub async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin_data: &str,
        timeout: Duration,
    ) -> Result<CmdOutput, CommandError> {
        self.run_inner(program, args, Some(stdin_data), timeout).await
    }

    async fn run_inner(
        &self,
        program: &str,
        args: &[&str],
        stdin_data: Option<&str>,
        timeout: Duration,
    ) -> Result<CmdOutput, CommandError> {
        let command_line = display_command(program, args);
        debug!(command = %command_line, ?timeout, "running command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandError::ToolMissing {
                    program: program.to_string(),
                }
            } else {
                CommandError::Io {
                    command: command_line.clone(),
                    source: e,
                }
            }
        })?;

        if let Some(data) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(data.as_bytes())
                    .await
                    .map_err(|e| CommandError::Io {
                        command: command_line.clone(),
                        source: e,
                    })?;
                // Dropping stdin closes the pipe so the child sees EOF.
            }
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| CommandError::Io {
                command: command_line.clone(),
                source: e,
            })?,
            Err(_) => {
                warn!(command = %command_line, ?timeout, "command deadline expired, killing child");
                return Err(CommandError::Timeout {
                    command: command_line,
                    timeout,
                });
            }
        };

        let result = CmdOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            command = %command_line,
            exit_code = ?result.exit_code,
            "command finished"
        );
        Ok(result)
    }

    /// Derive the public key for `private_key` by piping it through
    /// `wg pubkey`.
    pub async fn generate_public_key(&self, private_key: &str) -> Result<String, CommandError> {
        let output = self
            .run_with_stdin("wg", &["pubkey"], private_key, QUERY_TIMEOUT)
            .await?;
        if !output.success() {
            return Err(CommandError::Io {
                command: "wg pubkey".into(),
                source: std::io::Error::other(output.combined()),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Whether the named interface currently exists, checked via
    /// `wg show <name>` and falling back to `ip link show <name>`.
    pub async fn interface_exists(&self, name: &str) -> bool {
        if let Ok(out) = self.run("wg", &["show", name], QUERY_TIMEOUT).await {
            if out.success() {
                return true;
            }
        }
        match self.run("ip", &["link", "show", name], QUERY_TIMEOUT).await {
            Ok(out) => out.success(),
            Err(_) => false,
        }
    }

    /// Whether `name` resolves in PATH.
    pub async fn tool_in_path(&self, name: &str) -> bool {
        match self.run("which", &[name], QUERY_TIMEOUT).await {
            Ok(out) => out.success(),
            Err(_) => false,
        }
    }

    /// Best-effort teardown of a half-configured interface: delete the link
    /// and drop the standard firewall rules. Every step is idempotent and
    /// failures are ignored.
    pub async fn force_cleanup(&self, interface: &str, external_interface: &str) {
        warn!(interface, "force-cleaning interface");
        let _ = self
            .run("ip", &["link", "delete", interface], QUERY_TIMEOUT)
            .await;
        let _ = self
            .run(
                "iptables",
                &["-D", "FORWARD", "-i", interface, "-j", "ACCEPT"],
                QUERY_TIMEOUT,
            )
            .await;
        let _ = self
            .run(
                "iptables",
                &["-D", "FORWARD", "-o", interface, "-j", "ACCEPT"],
                QUERY_TIMEOUT,
            )
            .await;
        let _ = self
            .run(
                "iptables",
                &[
                    "-t",
                    "nat",
                    "-D",
                    "POSTROUTING",
                    "-o",
                    external_interface,
                    "-j",
                    "MASQUERADE",
                ],
                QUERY_TIMEOUT,
            )
            .await;
    }
}

fn display_command(program: &str, args: &[&str]) -> String {
    let mut s = program.to_string();
    for arg in args {
        s.push(' ');
        s.push_str(arg);
    }
    s
}
