//! Argument builders for `ovs-vsctl`, `ovs-ofctl` and friends
//!
//! `build_*_args` functions return the `ovs-vsctl` arguments that follow the
//! `--timeout=N` flag; [`vsctl_argv`] adds the program and the flag.
//! `build_*_argv` functions return complete argument vectors.

use ovs_agent_common::executor::{IP_CMD, OVS_OFCTL_CMD, OVS_VSCTL_CMD, XE_CMD};

use crate::flow::FlowAction;
use crate::tables::{columns, external_ids, BRIDGE_TABLE, INTERFACE_TABLE};

/// Timeout used for `br-get-external-id`, independent of configuration
pub const EXTERNAL_ID_TIMEOUT_SECS: u64 = 2;

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn push_interface_options(args: &mut Vec<String>, port: &str, options: &[(String, String)]) {
    if options.is_empty() {
        return;
    }
    args.extend(to_args(&["--", "set", INTERFACE_TABLE, port]));
    args.extend(options.iter().map(|(key, value)| format!("{}={}", key, value)));
}

/// Full `ovs-vsctl --timeout=N ...` argument vector
pub fn vsctl_argv(timeout_secs: u64, args: Vec<String>) -> Vec<String> {
    let mut argv = Vec::with_capacity(args.len() + 2);
    argv.push(OVS_VSCTL_CMD.to_string());
    argv.push(format!("--timeout={}", timeout_secs));
    argv.extend(args);
    argv
}

/// Full `ovs-ofctl CMD BRIDGE ...` argument vector
pub fn ofctl_argv(cmd: &str, bridge: &str, args: &[&str]) -> Vec<String> {
    let mut argv = to_args(&[OVS_OFCTL_CMD, cmd, bridge]);
    argv.extend(to_args(args));
    argv
}

// Bridges

/// Idempotent bridge creation
pub fn build_add_bridge_args(bridge: &str) -> Vec<String> {
    to_args(&["--", "--may-exist", "add-br", bridge])
}

/// Idempotent bridge removal
pub fn build_del_bridge_args(bridge: &str) -> Vec<String> {
    to_args(&["--", "--if-exists", "del-br", bridge])
}

/// Bridge existence check (exit code 2 when absent)
pub fn build_br_exists_args(bridge: &str) -> Vec<String> {
    to_args(&["br-exists", bridge])
}

/// Bridge owning a port (exit code 1 when the port is unknown)
pub fn build_port_to_br_args(port: &str) -> Vec<String> {
    to_args(&["port-to-br", port])
}

/// Bridge owning an interface
pub fn build_iface_to_br_args(iface: &str) -> Vec<String> {
    to_args(&["iface-to-br", iface])
}

/// All bridge names
pub fn build_list_br_args() -> Vec<String> {
    to_args(&["list-br"])
}

/// The `bridge-id` external id of a bridge
pub fn build_br_get_external_id_args(bridge: &str) -> Vec<String> {
    to_args(&["br-get-external-id", bridge, external_ids::BRIDGE_ID])
}

/// Point the bridge at one or more OpenFlow controllers
pub fn build_set_controller_args(bridge: &str, targets: &[String]) -> Vec<String> {
    let mut args = to_args(&["--", "set-controller", bridge]);
    args.extend(targets.iter().cloned());
    args
}

/// Remove all controllers from the bridge
pub fn build_del_controller_args(bridge: &str) -> Vec<String> {
    to_args(&["--", "del-controller", bridge])
}

/// List the bridge's controllers
pub fn build_get_controller_args(bridge: &str) -> Vec<String> {
    to_args(&["--", "get-controller", bridge])
}

/// Secure fail mode: no flows are installed when controllers are lost
pub fn build_set_secure_mode_args(bridge: &str) -> Vec<String> {
    to_args(&["--", "set-fail-mode", bridge, "secure"])
}

/// Restrict the OpenFlow versions the bridge speaks
pub fn build_set_protocols_args(bridge: &str, protocols: &str) -> Vec<String> {
    let mut args = to_args(&["--", "set", "bridge", bridge]);
    args.push(format!("{}={}", columns::PROTOCOLS, protocols));
    args
}

// Ports

/// Idempotent port creation, optionally setting interface options in the
/// same transaction
pub fn build_add_port_args(bridge: &str, port: &str, options: &[(String, String)]) -> Vec<String> {
    let mut args = to_args(&["--", "--may-exist", "add-port", bridge, port]);
    push_interface_options(&mut args, port, options);
    args
}

/// Recreate a port from scratch, wherever it currently lives
pub fn build_replace_port_args(
    bridge: &str,
    port: &str,
    options: &[(String, String)],
) -> Vec<String> {
    let mut args = to_args(&["--", "--if-exists", "del-port", port, "--", "add-port", bridge, port]);
    push_interface_options(&mut args, port, options);
    args
}

/// Idempotent port removal
pub fn build_del_port_args(bridge: &str, port: &str) -> Vec<String> {
    to_args(&["--", "--if-exists", "del-port", bridge, port])
}

/// Names of the bridge's ports
pub fn build_list_ports_args(bridge: &str) -> Vec<String> {
    to_args(&["list-ports", bridge])
}

// Database access

/// `set TABLE RECORD column=value`
pub fn build_db_set_args(table: &str, record: &str, column: &str, value: &str) -> Vec<String> {
    let mut args = to_args(&["set", table, record]);
    args.push(format!("{}={}", column, value));
    args
}

/// `clear TABLE RECORD column`
pub fn build_db_clear_args(table: &str, record: &str, column: &str) -> Vec<String> {
    to_args(&["clear", table, record, column])
}

/// `get TABLE RECORD column`
pub fn build_db_get_args(table: &str, record: &str, column: &str) -> Vec<String> {
    to_args(&["get", table, record, column])
}

/// JSON `list` of selected columns, restricted to `records`
pub fn build_json_list_args(table: &str, column_names: &[&str], records: &[String]) -> Vec<String> {
    let mut args = vec![
        "--format=json".to_string(),
        "--".to_string(),
        format!("--columns={}", column_names.join(",")),
        "list".to_string(),
        table.to_string(),
    ];
    args.extend(records.iter().cloned());
    args
}

/// JSON lookup of interfaces attached to `iface_id`
pub fn build_find_iface_by_id_args(iface_id: &str) -> Vec<String> {
    vec![
        "--format=json".to_string(),
        "--".to_string(),
        format!(
            "--columns={},{},{}",
            columns::EXTERNAL_IDS,
            columns::NAME,
            columns::OFPORT
        ),
        "find".to_string(),
        INTERFACE_TABLE.to_string(),
        format!("{}:{}=\"{}\"", columns::EXTERNAL_IDS, external_ids::IFACE_ID, iface_id),
    ]
}

/// `get Bridge BR datapath_id`
pub fn build_get_datapath_id_args(bridge: &str) -> Vec<String> {
    build_db_get_args(BRIDGE_TABLE, bridge, columns::DATAPATH_ID)
}

// Flows

/// Apply flow expressions read from stdin
pub fn build_flows_argv(action: FlowAction, bridge: &str) -> Vec<String> {
    ofctl_argv(&action.ofctl_command(), bridge, &["-"])
}

/// Dump the bridge's flows, optionally for one table only
pub fn build_dump_flows_argv(bridge: &str, table: Option<&str>) -> Vec<String> {
    match table {
        Some(table) => ofctl_argv("dump-flows", bridge, &[&format!("table={}", table)]),
        None => ofctl_argv("dump-flows", bridge, &[]),
    }
}

/// Remove every flow from the bridge
pub fn build_del_all_flows_argv(bridge: &str) -> Vec<String> {
    ofctl_argv(&FlowAction::Delete.ofctl_command(), bridge, &[])
}

// Host lookups

/// XenServer lookup of the iface-id recorded for a VIF
pub fn build_xapi_iface_id_argv(xs_vif_uuid: &str) -> Vec<String> {
    vec![
        XE_CMD.to_string(),
        "vif-param-get".to_string(),
        "param-name=other-config".to_string(),
        "param-key=nicira-iface-id".to_string(),
        format!("uuid={}", xs_vif_uuid),
    ]
}

/// One-line link details of a network device
pub fn build_link_show_argv(device: &str) -> Vec<String> {
    to_args(&[IP_CMD, "-o", "link", "show", "dev", device])
}
