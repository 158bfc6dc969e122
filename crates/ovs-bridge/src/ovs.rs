//! Switch-wide operations
//!
//! [`Ovs`] owns the command executor and the `ovs-vsctl` timeout, and
//! answers questions that are not scoped to one bridge. Per-bridge handles
//! are obtained through [`Ovs::bridge`] or [`Ovs::add_bridge`].

use std::sync::Arc;
use std::time::Duration;

use ovs_agent_common::{CommandExecutor, OvsConfig, OvsResult};
use tracing::{debug, error, instrument};

use crate::bridge::OvsBridge;
use crate::commands::{self, EXTERNAL_ID_TIMEOUT_SECS};

/// Exit code of `br-exists` for a bridge that does not exist
pub const BR_EXISTS_ABSENT_EXIT_CODE: i32 = 2;

/// Exit code of `port-to-br` for a port that is not on any bridge
pub const PORT_TO_BR_ABSENT_EXIT_CODE: i32 = 1;

/// Handle on the local switch
#[derive(Clone)]
pub struct Ovs {
    executor: Arc<dyn CommandExecutor>,
    vsctl_timeout: Duration,
}

impl std::fmt::Debug for Ovs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ovs")
            .field("vsctl_timeout", &self.vsctl_timeout)
            .finish_non_exhaustive()
    }
}

impl Ovs {
    /// Creates a handle using the configured `ovs-vsctl` timeout
    pub fn new(executor: Arc<dyn CommandExecutor>, config: &OvsConfig) -> Self {
        Self {
            executor,
            vsctl_timeout: config.vsctl_timeout(),
        }
    }

    /// Creates a handle with an explicit `ovs-vsctl` timeout in seconds
    pub fn with_timeout(executor: Arc<dyn CommandExecutor>, vsctl_timeout: u64) -> Self {
        Self {
            executor,
            vsctl_timeout: Duration::from_secs(vsctl_timeout),
        }
    }

    /// The executor every command goes through
    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    /// `ovs-vsctl` timeout in seconds
    pub fn vsctl_timeout(&self) -> u64 {
        self.vsctl_timeout.as_secs()
    }

    /// `ovs-vsctl` timeout, also the deadline for ofport assignment
    pub fn vsctl_deadline(&self) -> Duration {
        self.vsctl_timeout
    }

    /// Handle on a bridge, without touching the switch
    pub fn bridge(&self, name: impl Into<String>) -> OvsBridge {
        OvsBridge::new(self.clone(), name)
    }

    /// Runs `ovs-vsctl --timeout=N` with `args`
    pub async fn run_vsctl(&self, args: Vec<String>) -> OvsResult<String> {
        self.run_vsctl_with_timeout(self.vsctl_timeout(), args).await
    }

    /// Runs `ovs-vsctl` with `args` and an explicit timeout
    pub async fn run_vsctl_with_timeout(
        &self,
        timeout_secs: u64,
        args: Vec<String>,
    ) -> OvsResult<String> {
        let argv = commands::vsctl_argv(timeout_secs, args);
        self.executor.execute(&argv, None).await
    }

    /// Runs a complete argument vector, optionally feeding stdin
    pub async fn execute(&self, argv: &[String], stdin: Option<&str>) -> OvsResult<String> {
        self.executor.execute(argv, stdin).await
    }

    /// Creates the bridge if it does not exist yet
    #[instrument(skip(self))]
    pub async fn add_bridge(&self, name: &str) -> OvsResult<OvsBridge> {
        self.run_vsctl(commands::build_add_bridge_args(name)).await?;
        Ok(self.bridge(name))
    }

    /// Removes the bridge if it exists
    #[instrument(skip(self))]
    pub async fn delete_bridge(&self, name: &str) -> OvsResult<()> {
        self.run_vsctl(commands::build_del_bridge_args(name)).await?;
        Ok(())
    }

    /// Checks if a bridge exists.
    ///
    /// `br-exists` exits with code 2 for an unknown bridge; any other
    /// failure is an error.
    #[instrument(skip(self))]
    pub async fn bridge_exists(&self, name: &str) -> OvsResult<bool> {
        match self.run_vsctl(commands::build_br_exists_args(name)).await {
            Ok(_) => Ok(true),
            Err(e) if e.exit_code() == Some(BR_EXISTS_ABSENT_EXIT_CODE) => {
                debug!(bridge = %name, "Bridge does not exist");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Name of the bridge holding `port`, or `None` when no bridge has it
    #[instrument(skip(self))]
    pub async fn get_bridge_name_for_port_name(&self, port: &str) -> OvsResult<Option<String>> {
        match self.run_vsctl(commands::build_port_to_br_args(port)).await {
            Ok(output) => {
                let name = output.trim();
                Ok((!name.is_empty()).then(|| name.to_string()))
            }
            Err(e) if e.exit_code() == Some(PORT_TO_BR_ABSENT_EXIT_CODE) => {
                debug!(port = %port, "Port is not on any bridge");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Checks if any bridge has `port`
    pub async fn port_exists(&self, port: &str) -> OvsResult<bool> {
        Ok(self.get_bridge_name_for_port_name(port).await?.is_some())
    }

    /// Names of all bridges
    #[instrument(skip(self))]
    pub async fn get_bridges(&self) -> OvsResult<Vec<String>> {
        let output = self
            .run_vsctl(commands::build_list_br_args())
            .await
            .map_err(|e| {
                error!(error = %e, "Unable to retrieve bridges");
                e
            })?;
        Ok(split_lines(&output))
    }

    /// Bridge holding interface `iface`. Failures are logged and read as
    /// "no bridge".
    #[instrument(skip(self))]
    pub async fn get_bridge_for_iface(&self, iface: &str) -> Option<String> {
        match self.run_vsctl(commands::build_iface_to_br_args(iface)).await {
            Ok(output) => Some(output.trim().to_string()),
            Err(e) => {
                error!(iface = %iface, error = %e, "Interface not found");
                None
            }
        }
    }

    /// The `bridge-id` external id of `bridge`, looked up with a short
    /// fixed timeout. Failures are logged and read as "none".
    #[instrument(skip(self))]
    pub async fn get_bridge_external_bridge_id(&self, bridge: &str) -> Option<String> {
        let args = commands::build_br_get_external_id_args(bridge);
        match self.run_vsctl_with_timeout(EXTERNAL_ID_TIMEOUT_SECS, args).await {
            Ok(output) => Some(output.trim().to_string()),
            Err(e) => {
                error!(bridge = %bridge, error = %e, "Bridge not found");
                None
            }
        }
    }
}

/// Non-empty trimmed lines of a listing command's output
pub(crate) fn split_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
