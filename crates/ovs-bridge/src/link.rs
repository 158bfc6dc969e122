//! Link-layer introspection of local network devices

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use ovs_agent_common::{CommandExecutor, OvsResult};
use regex::Regex;
use tracing::debug;

use crate::commands;

/// Matches the hardware address in `ip -o link show` output
static LINK_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"link/\w+ ([0-9a-fA-F]{2}(?::[0-9a-fA-F]{2})+)").expect("Invalid regex pattern")
});

/// Looks up hardware addresses of local devices
#[async_trait]
pub trait LinkInspector: Send + Sync {
    /// Hardware address of `device`, or `None` if it has none
    async fn link_address(&self, device: &str) -> OvsResult<Option<String>>;
}

/// [`LinkInspector`] backed by `ip -o link show`
#[derive(Clone)]
pub struct IpLinkInspector {
    executor: Arc<dyn CommandExecutor>,
}

impl IpLinkInspector {
    /// Creates an inspector running `ip` through `executor`
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl LinkInspector for IpLinkInspector {
    async fn link_address(&self, device: &str) -> OvsResult<Option<String>> {
        let argv = commands::build_link_show_argv(device);
        let output = self.executor.execute(&argv, None).await?;
        let address = parse_link_address(&output);
        debug!(device = %device, address = ?address, "Link address lookup");
        Ok(address)
    }
}

/// Extracts the hardware address from one line of `ip -o link show`
pub fn parse_link_address(output: &str) -> Option<String> {
    LINK_ADDRESS_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}
