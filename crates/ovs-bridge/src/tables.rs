//! Table, column and external-id key names for the Open vSwitch database

/// Bridge table
pub const BRIDGE_TABLE: &str = "Bridge";

/// Port table (carries the VLAN tag)
pub const PORT_TABLE: &str = "Port";

/// Interface table (carries ofport, options and external_ids)
pub const INTERFACE_TABLE: &str = "Interface";

/// Column names
pub mod columns {
    /// Row name
    pub const NAME: &str = "name";

    /// Assigned OpenFlow port number
    pub const OFPORT: &str = "ofport";

    /// Free-form metadata written by whoever attached the interface
    pub const EXTERNAL_IDS: &str = "external_ids";

    /// Access VLAN tag of a port
    pub const TAG: &str = "tag";

    /// Interface counters
    pub const STATISTICS: &str = "statistics";

    /// Bridge datapath id
    pub const DATAPATH_ID: &str = "datapath_id";

    /// OpenFlow versions a bridge speaks
    pub const PROTOCOLS: &str = "protocols";
}

/// Keys found in an interface's external_ids
pub mod external_ids {
    /// Identifier of the attached logical port
    pub const IFACE_ID: &str = "iface-id";

    /// MAC address of the attached VIF
    pub const ATTACHED_MAC: &str = "attached-mac";

    /// XenServer VIF uuid, used when iface-id is not synced from XAPI
    pub const XS_VIF_UUID: &str = "xs-vif-uuid";

    /// Bridge external id naming the physical bridge
    pub const BRIDGE_ID: &str = "bridge-id";
}
