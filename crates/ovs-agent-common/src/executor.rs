//! Command execution for the switch-management CLIs.
//!
//! Commands are passed as argument vectors and run directly (no shell), so
//! bridge, port and flow names never need quoting. An optional root helper
//! (for example `sudo` or `sudo rootwrap /etc/rootwrap.conf`) is
//! prepended to every command line.
//!
//! # Example
//!
//! ```ignore
//! use ovs_agent_common::executor::{CommandExecutor, ProcessExecutor};
//!
//! let executor = ProcessExecutor::with_root_helper(Some("sudo"));
//! let argv = vec!["ovs-vsctl".to_string(), "list-br".to_string()];
//! let bridges = executor.execute(&argv, None).await?;
//! ```

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{OvsError, OvsResult};

/// Path-less name of the OVS configuration database client.
pub const OVS_VSCTL_CMD: &str = "ovs-vsctl";

/// Path-less name of the OpenFlow switch management client.
pub const OVS_OFCTL_CMD: &str = "ovs-ofctl";

/// Path to the `ip` command, used for link introspection.
pub const IP_CMD: &str = "/sbin/ip";

/// XenServer API client, used to resolve interface ids on XenServer hosts.
pub const XE_CMD: &str = "xe";

/// Something that can run a command line and hand back its stdout.
///
/// Implementations must fail with [`OvsError::CommandFailed`] (carrying the
/// exit code and stderr) when the command exits non-zero, so callers can
/// recognise expected negative answers by exit code.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs `argv`, optionally feeding `stdin`, and returns captured stdout.
    async fn execute(&self, argv: &[String], stdin: Option<&str>) -> OvsResult<String>;
}

/// Joins an argument vector for log and error messages.
pub fn format_command(argv: &[String]) -> String {
    argv.join(" ")
}

/// Result of a process execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands as child processes, optionally under a root helper.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    root_helper: Vec<String>,
}

impl ProcessExecutor {
    /// Creates an executor that runs commands unprivileged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor that prefixes every command with `root_helper`,
    /// split on whitespace.
    pub fn with_root_helper(root_helper: Option<&str>) -> Self {
        let root_helper = root_helper
            .map(|helper| helper.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        Self { root_helper }
    }

    /// Returns the full argument vector that will be spawned for `argv`.
    pub fn full_argv(&self, argv: &[String]) -> Vec<String> {
        self.root_helper.iter().chain(argv.iter()).cloned().collect()
    }

    /// Runs `argv` and returns its exit code and output without
    /// interpreting the exit status.
    pub async fn run(&self, argv: &[String], stdin: Option<&str>) -> OvsResult<ExecResult> {
        let full = self.full_argv(argv);
        let command = format_command(&full);
        let (program, args) = full
            .split_first()
            .ok_or_else(|| OvsError::Spawn {
                command: command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            })?;

        tracing::debug!(command = %command, has_stdin = stdin.is_some(), "Executing command");

        let spawn_err = |source| OvsError::Spawn {
            command: command.clone(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // stdin is fed while output is collected so neither pipe can stall
        // the child. A child that exits before reading all of its input is
        // judged by its exit status, not by the broken pipe.
        let pipe = child.stdin.take();
        let feed = async move {
            let (Some(mut pipe), Some(input)) = (pipe, stdin) else {
                return Ok(());
            };
            match pipe.write_all(input.as_bytes()).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!("Command closed stdin before reading all input");
                    Ok(())
                }
                result => result,
            }
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(spawn_err)?;
        fed.map_err(spawn_err)?;

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, argv: &[String], stdin: Option<&str>) -> OvsResult<String> {
        let result = self.run(argv, stdin).await?;
        let command = format_command(argv);

        if result.success() {
            tracing::trace!(command = %command, "Command succeeded");
            Ok(result.stdout)
        } else {
            tracing::warn!(
                command = %command,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "Command failed"
            );
            Err(OvsError::CommandFailed {
                command,
                exit_code: result.exit_code,
                stderr: result.stderr,
            })
        }
    }
}
