//! Agent configuration
//!
//! Loads the agent's settings from a TOML file.
//! Default location: /etc/ovs-agent/ovs-agent.conf

use crate::error::{OvsError, OvsResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ovs-agent/ovs-agent.conf";

/// Default timeout in seconds for ovs-vsctl commands.
pub const DEFAULT_OVS_VSCTL_TIMEOUT: u64 = 10;

/// Complete agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvsConfig {
    /// Timeout in seconds for ovs-vsctl commands. Also bounds how long the
    /// agent waits for a new port to be assigned an OpenFlow port number.
    #[serde(default = "default_vsctl_timeout")]
    pub ovs_vsctl_timeout: u64,

    /// Command prefix used to run switch commands with privileges
    #[serde(default)]
    pub root_helper: Option<String>,
}

fn default_vsctl_timeout() -> u64 {
    DEFAULT_OVS_VSCTL_TIMEOUT
}

impl Default for OvsConfig {
    fn default() -> Self {
        Self {
            ovs_vsctl_timeout: default_vsctl_timeout(),
            root_helper: None,
        }
    }
}

impl OvsConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> OvsResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    OvsError::config(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %path.display(),
                    "Config file not found, using defaults"
                );
                Ok(Self::default())
            }
            Err(e) => Err(OvsError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> OvsResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Get the ovs-vsctl timeout as Duration
    pub fn vsctl_timeout(&self) -> Duration {
        Duration::from_secs(self.ovs_vsctl_timeout)
    }

    /// Validate configuration
    pub fn validate(&self) -> OvsResult<()> {
        if self.ovs_vsctl_timeout == 0 {
            return Err(OvsError::config("ovs_vsctl_timeout must be > 0"));
        }

        if let Some(helper) = &self.root_helper {
            if helper.trim().is_empty() {
                return Err(OvsError::config("root_helper must not be empty when set"));
            }
        }

        Ok(())
    }
}
