//! Common infrastructure for the Open vSwitch agent library.
//!
//! This crate provides the pieces shared by everything that drives
//! `ovs-vsctl` and `ovs-ofctl`:
//!
//! - [`executor`]: the [`CommandExecutor`] seam and the real process executor
//! - [`error`]: error types for switch operations
//! - [`config`]: TOML-backed agent configuration
//!
//! # Example
//!
//! ```ignore
//! use ovs_agent_common::{CommandExecutor, OvsConfig, ProcessExecutor};
//!
//! let config = OvsConfig::load()?;
//! let executor = ProcessExecutor::with_root_helper(config.root_helper.as_deref());
//! let argv = vec!["ovs-vsctl".to_string(), format!("--timeout={}", config.ovs_vsctl_timeout),
//!     "list-br".to_string()];
//! let output = executor.execute(&argv, None).await?;
//! ```

pub mod config;
pub mod error;
pub mod executor;

// Re-export commonly used items at crate root
pub use config::OvsConfig;
pub use error::{OvsError, OvsResult};
pub use executor::{format_command, CommandExecutor, ExecResult, ProcessExecutor};
