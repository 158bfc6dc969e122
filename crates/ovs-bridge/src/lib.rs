//! Bridge, port and flow management for Open vSwitch.
//!
//! Everything here drives the switch through its command line clients:
//! `ovs-vsctl` for the configuration database and `ovs-ofctl` for flows.
//! Commands go through the [`CommandExecutor`](ovs_agent_common::CommandExecutor)
//! seam, so the whole crate can be exercised against a scripted executor.
//!
//! # Pieces
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ovs`] | Switch-wide operations (bridges, port lookups) |
//! | [`bridge`] | Per-bridge controller: ports, flows, VIF discovery |
//! | [`deferred`] | Batching of flow operations into few `ovs-ofctl` calls |
//! | [`ofport`] | Waiting for OpenFlow port number assignment |
//! | [`db`] | Decoding of `ovs-vsctl` map strings and JSON tables |
//! | [`flow`] | Flow rules and their `ovs-ofctl` text encoding |
//! | [`commands`] | Argument vector builders |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ovs_agent_common::{OvsConfig, ProcessExecutor};
//! use ovs_bridge::{DeferredOptions, FlowRule, Ovs};
//!
//! let config = OvsConfig::load()?;
//! let executor = Arc::new(ProcessExecutor::with_root_helper(config.root_helper.as_deref()));
//! let ovs = Ovs::new(executor, &config);
//!
//! let br = ovs.add_bridge("br-int").await?;
//! let ofport = br.add_port("tap0", &[]).await?;
//!
//! let mut flows = br.deferred(DeferredOptions::default());
//! flows.add_flow(FlowRule::new().with_field("in_port", ofport).with_actions("normal"));
//! flows.apply_flows().await?;
//! ```

pub mod bridge;
pub mod commands;
pub mod db;
pub mod deferred;
pub mod flow;
pub mod link;
pub mod ofport;
pub mod ovs;
pub mod tables;
pub mod types;

pub use bridge::OvsBridge;
pub use db::{parse_db_map, DbParseError, DbValue, TabularResult};
pub use deferred::{group_pending, DeferredBridge, DeferredOptions};
pub use flow::{build_flow_expr, FlowAction, FlowRule, PendingFlowOp};
pub use link::{IpLinkInspector, LinkInspector};
pub use ofport::OfportWaiter;
pub use ovs::Ovs;
pub use types::{InterfaceOptions, TunnelOptions, TunnelType, VifPort, INVALID_OFPORT};
