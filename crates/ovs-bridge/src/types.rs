//! Type definitions for bridge and port management

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value reported for a port that never got a usable OpenFlow port number
pub const INVALID_OFPORT: i32 = -1;

/// Default VXLAN UDP destination port
pub const VXLAN_UDP_PORT: u16 = 4789;

/// Interface settings applied with `set Interface PORT key=value ...`
pub type InterfaceOptions = Vec<(String, String)>;

/// Builds an [`InterfaceOptions`] collection from key-value pairs.
#[macro_export]
macro_rules! interface_options {
    ($($key:expr => $value:expr),* $(,)?) => {
        vec![
            $(($key.to_string(), $value.to_string()),)*
        ]
    };
}

/// A port bound to a workload's network attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VifPort {
    /// Port name on the bridge
    pub port_name: String,
    /// Assigned OpenFlow port number
    pub ofport: i32,
    /// Attachment identifier (iface-id)
    pub vif_id: String,
    /// Attached MAC address
    pub vif_mac: String,
    /// Bridge owning the port
    pub bridge_name: String,
}

impl VifPort {
    /// Create a new VifPort
    pub fn new(
        port_name: impl Into<String>,
        ofport: i32,
        vif_id: impl Into<String>,
        vif_mac: impl Into<String>,
        bridge_name: impl Into<String>,
    ) -> Self {
        Self {
            port_name: port_name.into(),
            ofport,
            vif_id: vif_id.into(),
            vif_mac: vif_mac.into(),
            bridge_name: bridge_name.into(),
        }
    }
}

impl fmt::Display for VifPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iface-id={}, vif_mac={}, port_name={}, ofport={}, bridge_name={}",
            self.vif_id, self.vif_mac, self.port_name, self.ofport, self.bridge_name
        )
    }
}

/// Tunnel encapsulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    /// GRE
    Gre,
    /// VXLAN
    Vxlan,
}

impl TunnelType {
    /// Interface type string understood by the switch
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelType::Gre => "gre",
            TunnelType::Vxlan => "vxlan",
        }
    }
}

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TunnelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gre" => Ok(TunnelType::Gre),
            "vxlan" => Ok(TunnelType::Vxlan),
            _ => Err(format!("Unsupported tunnel type: {}", s)),
        }
    }
}

/// Settings for a tunnel port besides its endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelOptions {
    /// Encapsulation
    pub tunnel_type: TunnelType,
    /// UDP destination port (VXLAN only)
    pub vxlan_udp_port: u16,
    /// Set the DF bit on encapsulated packets
    pub dont_fragment: bool,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            tunnel_type: TunnelType::Gre,
            vxlan_udp_port: VXLAN_UDP_PORT,
            dont_fragment: true,
        }
    }
}

impl TunnelOptions {
    /// Set the tunnel type (builder pattern)
    pub fn with_tunnel_type(mut self, tunnel_type: TunnelType) -> Self {
        self.tunnel_type = tunnel_type;
        self
    }

    /// Set the VXLAN UDP port (builder pattern)
    pub fn with_vxlan_udp_port(mut self, port: u16) -> Self {
        self.vxlan_udp_port = port;
        self
    }

    /// Set the don't-fragment flag (builder pattern)
    pub fn with_dont_fragment(mut self, dont_fragment: bool) -> Self {
        self.dont_fragment = dont_fragment;
        self
    }

    /// Interface options for a tunnel between `local_ip` and `remote_ip`.
    ///
    /// The UDP port is only written for VXLAN, and only when it differs
    /// from the default.
    pub fn to_interface_options(&self, remote_ip: &str, local_ip: &str) -> InterfaceOptions {
        let mut options = interface_options! { "type" => self.tunnel_type };
        if self.tunnel_type == TunnelType::Vxlan && self.vxlan_udp_port != VXLAN_UDP_PORT {
            options.push(("options:dst_port".to_string(), self.vxlan_udp_port.to_string()));
        }
        options.extend(interface_options! {
            "options:df_default" => self.dont_fragment,
            "options:remote_ip" => remote_ip,
            "options:local_ip" => local_ip,
            "options:in_key" => "flow",
            "options:out_key" => "flow",
        });
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_vif_port_display() {
        let port = VifPort::new("tap1", 5, "uuid-1", "fa:16:3e:00:00:01", "br-int");
        assert_eq!(
            port.to_string(),
            "iface-id=uuid-1, vif_mac=fa:16:3e:00:00:01, port_name=tap1, ofport=5, bridge_name=br-int"
        );
    }

    #[test]
    fn test_tunnel_type_from_str() {
        assert_eq!("gre".parse::<TunnelType>().unwrap(), TunnelType::Gre);
        assert_eq!("vxlan".parse::<TunnelType>().unwrap(), TunnelType::Vxlan);
        assert!("geneve".parse::<TunnelType>().is_err());
    }

    #[test]
    fn test_gre_tunnel_options() {
        let options = TunnelOptions::default().to_interface_options("10.0.0.2", "10.0.0.1");
        assert_eq!(
            options,
            interface_options! {
                "type" => "gre",
                "options:df_default" => "true",
                "options:remote_ip" => "10.0.0.2",
                "options:local_ip" => "10.0.0.1",
                "options:in_key" => "flow",
                "options:out_key" => "flow",
            }
        );
    }

    #[test]
    fn test_vxlan_default_port_omitted() {
        let options = TunnelOptions::default()
            .with_tunnel_type(TunnelType::Vxlan)
            .to_interface_options("10.0.0.2", "10.0.0.1");
        assert!(!options.iter().any(|(k, _)| k == "options:dst_port"));
        assert_eq!(options[0], ("type".to_string(), "vxlan".to_string()));
    }

    #[test]
    fn test_vxlan_custom_port() {
        let options = TunnelOptions::default()
            .with_tunnel_type(TunnelType::Vxlan)
            .with_vxlan_udp_port(8472)
            .with_dont_fragment(false)
            .to_interface_options("10.0.0.2", "10.0.0.1");
        assert_eq!(options[1], ("options:dst_port".to_string(), "8472".to_string()));
        assert!(options.contains(&("options:df_default".to_string(), "false".to_string())));
    }

    #[test]
    fn test_gre_ignores_udp_port() {
        let options = TunnelOptions::default()
            .with_vxlan_udp_port(8472)
            .to_interface_options("10.0.0.2", "10.0.0.1");
        assert!(!options.iter().any(|(k, _)| k == "options:dst_port"));
    }
}
