//! Test infrastructure for the Open vSwitch agent library
//!
//! Provides:
//! - A recording, scripted [`MockExecutor`] standing in for `ovs-vsctl`/`ovs-ofctl`
//! - Fixtures for the switch's textual and JSON response shapes
//! - Command verification helpers

pub mod fixtures;
mod mock;

pub use fixtures::*;
pub use mock::*;
