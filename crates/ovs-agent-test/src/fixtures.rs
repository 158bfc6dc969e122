//! Test fixtures for switch responses
//!
//! Builders for the output shapes `ovs-vsctl` produces, so tests describe
//! switch state instead of hand-writing JSON.

use serde_json::{json, Value};

/// OVSDB map cell: `["map", [[k, v], ...]]`
pub fn ovs_map<I, K, V>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let entries: Vec<Value> = pairs
        .into_iter()
        .map(|(k, v)| json!([k.into(), v.into()]))
        .collect();
    json!(["map", entries])
}

/// OVSDB set cell: `["set", [...]]`
pub fn ovs_set(values: Vec<Value>) -> Value {
    json!(["set", values])
}

/// The empty-set encoding used for unset optional columns
pub fn empty_set() -> Value {
    ovs_set(Vec::new())
}

/// `--format=json` table output: `{"headings": [...], "data": [[...]]}`
pub fn tabular(headings: &[&str], rows: Vec<Vec<Value>>) -> String {
    json!({
        "headings": headings,
        "data": rows,
    })
    .to_string()
}

/// `ovs-vsctl get` output for a map column: `{k="v", ...}` plus newline
pub fn db_map_string(pairs: &[(&str, &str)]) -> String {
    let body: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect();
    format!("{{{}}}\n", body.join(", "))
}

/// Common interface fixtures
pub mod interface_fixtures {
    use super::*;

    /// external_ids of a VIF attached by a compute agent
    pub fn vif_external_ids(iface_id: &str, mac: &str) -> Value {
        ovs_map([
            ("attached-mac", mac),
            ("iface-id", iface_id),
            ("iface-status", "active"),
        ])
    }

    /// external_ids of a XenServer VIF that only carries the vif uuid
    pub fn xen_external_ids(xs_vif_uuid: &str, mac: &str) -> Value {
        ovs_map([("attached-mac", mac), ("xs-vif-uuid", xs_vif_uuid)])
    }

    /// `list Interface` output with columns external_ids,ofport
    pub fn interface_list(rows: Vec<(Value, Value)>) -> String {
        tabular(
            &["external_ids", "ofport"],
            rows.into_iter().map(|(ids, ofport)| vec![ids, ofport]).collect(),
        )
    }

    /// `find Interface` output with columns external_ids,name,ofport
    pub fn interface_find(rows: Vec<(Value, &str, Value)>) -> String {
        tabular(
            &["external_ids", "name", "ofport"],
            rows.into_iter()
                .map(|(ids, name, ofport)| vec![ids, json!(name), ofport])
                .collect(),
        )
    }
}

/// Common port fixtures
pub mod port_fixtures {
    use super::*;

    /// `list Port` output with columns name,tag
    pub fn port_tags(rows: Vec<(&str, Value)>) -> String {
        tabular(
            &["name", "tag"],
            rows.into_iter().map(|(name, tag)| vec![json!(name), tag]).collect(),
        )
    }

    /// `list-ports` output
    pub fn port_list(names: &[&str]) -> String {
        let mut out = names.join("\n");
        out.push('\n');
        out
    }
}

/// Common flow fixtures
pub mod flow_fixtures {
    /// `dump-flows` output with a reply header line
    pub fn dump_flows(flows: &[&str]) -> String {
        let mut out = String::from("NXST_FLOW reply (xid=0x4):\n");
        for flow in flows {
            out.push(' ');
            out.push_str(flow);
            out.push('\n');
        }
        out
    }
}
