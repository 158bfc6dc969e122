//! Bridge controller
//!
//! [`OvsBridge`] is a stateless handle on one bridge. Every operation turns
//! into one or more `ovs-vsctl`/`ovs-ofctl` invocations; nothing is cached
//! between calls, so handles can be cloned and shared freely.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use ovs_agent_common::{format_command, OvsError, OvsResult};
use tracing::{debug, error, info, instrument, warn};

use crate::commands;
use crate::db::{parse_db_map, DbParseError, DbValue, TabularResult};
use crate::deferred::{DeferredBridge, DeferredOptions};
use crate::flow::{build_flow_expr, FlowAction, FlowRule};
use crate::link::{IpLinkInspector, LinkInspector};
use crate::ofport::OfportWaiter;
use crate::ovs::{split_lines, Ovs};
use crate::tables::{columns, external_ids, INTERFACE_TABLE, PORT_TABLE};
use crate::types::{TunnelOptions, VifPort, INVALID_OFPORT};

/// Marker on `dump-flows` reply header lines
const DUMP_FLOWS_HEADER: &str = "NXST";

/// How an interface's external_ids tie it to a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VifBinding<'a> {
    /// iface-id written directly by the attaching agent
    Direct { iface_id: &'a str, mac: &'a str },
    /// XenServer VIF whose iface-id has to be fetched from XAPI
    Xen { xs_vif_uuid: &'a str, mac: &'a str },
}

impl<'a> VifBinding<'a> {
    /// Classifies external_ids. Interfaces without an attached MAC are
    /// not VIFs.
    fn from_external_ids(ids: &'a BTreeMap<String, String>) -> Option<Self> {
        let mac = ids.get(external_ids::ATTACHED_MAC)?;
        if let Some(iface_id) = ids.get(external_ids::IFACE_ID) {
            return Some(VifBinding::Direct { iface_id, mac });
        }
        ids.get(external_ids::XS_VIF_UUID)
            .map(|xs_vif_uuid| VifBinding::Xen { xs_vif_uuid, mac })
    }
}

/// ofport of a listed interface when it is a positive integer. Ports that
/// are not ready yet or failed are logged and skipped.
fn usable_ofport(port: &str, value: &DbValue) -> Option<i32> {
    match value.as_i64() {
        None => {
            warn!(port = %port, ofport = ?value, "Found not yet ready openvswitch port");
            None
        }
        Some(ofport) if ofport < 1 => {
            warn!(port = %port, ofport, "Found failed openvswitch port");
            None
        }
        Some(ofport) => match i32::try_from(ofport) {
            Ok(ofport) => Some(ofport),
            Err(_) => {
                warn!(port = %port, ofport, "Found openvswitch port with out of range ofport");
                None
            }
        },
    }
}

/// Log label for an interface row listed without its name: the iface-id,
/// the XenServer VIF uuid, or the whole map.
fn external_ids_label(ids: &BTreeMap<String, String>) -> String {
    ids.get(external_ids::IFACE_ID)
        .or_else(|| ids.get(external_ids::XS_VIF_UUID))
        .cloned()
        .unwrap_or_else(|| format!("{:?}", ids))
}

/// Handle on one bridge
#[derive(Clone)]
pub struct OvsBridge {
    ovs: Ovs,
    br_name: String,
    link: Arc<dyn LinkInspector>,
}

impl std::fmt::Debug for OvsBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvsBridge")
            .field("br_name", &self.br_name)
            .field("ovs", &self.ovs)
            .finish_non_exhaustive()
    }
}

impl OvsBridge {
    /// Creates a handle on `br_name`. The bridge itself is not created.
    pub fn new(ovs: Ovs, br_name: impl Into<String>) -> Self {
        let link = Arc::new(IpLinkInspector::new(ovs.executor().clone()));
        Self {
            ovs,
            br_name: br_name.into(),
            link,
        }
    }

    /// Replaces the link inspector (builder pattern)
    pub fn with_link_inspector(mut self, link: Arc<dyn LinkInspector>) -> Self {
        self.link = link;
        self
    }

    /// Bridge name
    pub fn br_name(&self) -> &str {
        &self.br_name
    }

    /// Switch-wide handle this bridge belongs to
    pub fn ovs(&self) -> &Ovs {
        &self.ovs
    }

    async fn run_vsctl(&self, args: Vec<String>) -> OvsResult<String> {
        self.ovs.run_vsctl(args).await
    }

    /// Runs a JSON `list`/`find` query. Empty output means no rows.
    async fn run_vsctl_table(&self, args: Vec<String>) -> OvsResult<Option<(String, TabularResult)>> {
        let command = format_command(&commands::vsctl_argv(self.ovs.vsctl_timeout(), args.clone()));
        let output = self.run_vsctl(args).await?;
        if output.trim().is_empty() {
            return Ok(None);
        }
        let table = TabularResult::parse(&output).map_err(|e| malformed(&command, e))?;
        Ok(Some((command, table)))
    }

    // Controller and bridge settings

    /// Points the bridge at `targets` (e.g. `tcp:127.0.0.1:6633`)
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn set_controller(&self, targets: &[String]) -> OvsResult<()> {
        self.run_vsctl(commands::build_set_controller_args(&self.br_name, targets))
            .await?;
        Ok(())
    }

    /// Removes all controllers
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn del_controller(&self) -> OvsResult<()> {
        self.run_vsctl(commands::build_del_controller_args(&self.br_name))
            .await?;
        Ok(())
    }

    /// Configured controller targets
    pub async fn get_controller(&self) -> OvsResult<Vec<String>> {
        let output = self
            .run_vsctl(commands::build_get_controller_args(&self.br_name))
            .await?;
        Ok(split_lines(&output))
    }

    /// Switches the bridge to secure fail mode
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn set_secure_mode(&self) -> OvsResult<()> {
        self.run_vsctl(commands::build_set_secure_mode_args(&self.br_name))
            .await?;
        Ok(())
    }

    /// Sets the OpenFlow versions the bridge speaks, e.g. `OpenFlow10,OpenFlow13`
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn set_protocols(&self, protocols: &str) -> OvsResult<()> {
        self.run_vsctl(commands::build_set_protocols_args(&self.br_name, protocols))
            .await?;
        Ok(())
    }

    // Lifecycle

    /// Creates the bridge if missing
    pub async fn create(&self) -> OvsResult<()> {
        self.ovs.add_bridge(&self.br_name).await?;
        Ok(())
    }

    /// Removes the bridge if present
    pub async fn destroy(&self) -> OvsResult<()> {
        self.ovs.delete_bridge(&self.br_name).await
    }

    /// Destroys and recreates the bridge
    pub async fn reset_bridge(&self) -> OvsResult<()> {
        self.destroy().await?;
        self.create().await
    }

    /// Checks if this bridge exists
    pub async fn exists(&self) -> OvsResult<bool> {
        self.ovs.bridge_exists(&self.br_name).await
    }

    /// Creates the bridge, runs `f` with it and destroys it again, whether
    /// `f` succeeded or not. An error from `f` takes precedence over an
    /// error destroying the bridge.
    pub async fn scoped<T, F>(&self, f: F) -> OvsResult<T>
    where
        F: for<'a> FnOnce(&'a OvsBridge) -> BoxFuture<'a, OvsResult<T>>,
    {
        self.create().await?;
        let result = f(self).await;
        let destroyed = self.destroy().await;

        match (result, destroyed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), destroyed) => {
                if let Err(destroy_err) = destroyed {
                    error!(
                        bridge = %self.br_name,
                        error = %destroy_err,
                        "Failed to destroy bridge after error"
                    );
                }
                Err(e)
            }
        }
    }

    // Ports

    /// Adds `port` (if missing) with interface `options` and waits for its
    /// OpenFlow port number.
    ///
    /// A port that never gets a valid number is deleted again and
    /// [`INVALID_OFPORT`] is returned.
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn add_port(&self, port: &str, options: &[(String, String)]) -> OvsResult<i32> {
        self.run_vsctl(commands::build_add_port_args(&self.br_name, port, options))
            .await?;

        let ofport = self.get_port_ofport(port).await?;
        if ofport == INVALID_OFPORT {
            warn!(port = %port, "Port has no valid ofport, removing it");
            self.delete_port(port).await?;
        } else {
            info!(port = %port, ofport, "Added port");
        }
        Ok(ofport)
    }

    /// Recreates `port` on this bridge in one transaction, without waiting
    /// for its OpenFlow port number
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn replace_port(&self, port: &str, options: &[(String, String)]) -> OvsResult<()> {
        self.run_vsctl(commands::build_replace_port_args(&self.br_name, port, options))
            .await?;
        Ok(())
    }

    /// Removes `port` if present
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn delete_port(&self, port: &str) -> OvsResult<()> {
        self.run_vsctl(commands::build_del_port_args(&self.br_name, port))
            .await?;
        Ok(())
    }

    /// Adds a GRE or VXLAN tunnel port between `local_ip` and `remote_ip`
    pub async fn add_tunnel_port(
        &self,
        port: &str,
        remote_ip: &str,
        local_ip: &str,
        tunnel: &TunnelOptions,
    ) -> OvsResult<i32> {
        let options = tunnel.to_interface_options(remote_ip, local_ip);
        self.add_port(port, &options).await
    }

    /// Adds a patch port peered with `remote`
    pub async fn add_patch_port(&self, local: &str, remote: &str) -> OvsResult<i32> {
        let options = crate::interface_options! {
            "type" => "patch",
            "options:peer" => remote,
        };
        self.add_port(local, &options).await
    }

    /// Names of the ports on this bridge
    pub async fn get_port_name_list(&self) -> OvsResult<Vec<String>> {
        let output = self
            .run_vsctl(commands::build_list_ports_args(&self.br_name))
            .await?;
        Ok(split_lines(&output))
    }

    /// Removes VIF ports, or every port when `all_ports` is set
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn delete_ports(&self, all_ports: bool) -> OvsResult<()> {
        let names = if all_ports {
            self.get_port_name_list().await?
        } else {
            self.get_vif_ports()
                .await?
                .into_iter()
                .map(|vif| vif.port_name)
                .collect()
        };

        for name in &names {
            self.delete_port(name).await?;
        }
        Ok(())
    }

    /// OpenFlow port number of `port`, waiting for the switch to assign
    /// one for at most the `ovs-vsctl` timeout
    pub async fn get_port_ofport(&self, port: &str) -> OvsResult<i32> {
        let waiter = OfportWaiter::new(self.ovs.vsctl_deadline());
        let this = self;
        let ofport = waiter
            .wait(move || this.db_get_val(INTERFACE_TABLE, port, columns::OFPORT, false))
            .await?;

        if ofport == INVALID_OFPORT {
            error!(
                port = %port,
                timeout_secs = self.ovs.vsctl_timeout(),
                "Timed out retrieving ofport on port"
            );
        }
        Ok(ofport)
    }

    /// Datapath id of the bridge, without quotes
    pub async fn get_datapath_id(&self) -> OvsResult<Option<String>> {
        let output = self
            .run_vsctl(commands::build_get_datapath_id_args(&self.br_name))
            .await?;
        let id = output.trim().trim_matches('"');
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    /// Hardware address of the bridge's local port
    pub async fn get_local_port_mac(&self) -> OvsResult<String> {
        self.link
            .link_address(&self.br_name)
            .await?
            .ok_or_else(|| OvsError::MacNotFound {
                device: self.br_name.clone(),
            })
    }

    // Database helpers

    /// `set TABLE RECORD column=value`
    pub async fn set_db_attribute(
        &self,
        table: &str,
        record: &str,
        column: &str,
        value: &str,
    ) -> OvsResult<()> {
        self.run_vsctl(commands::build_db_set_args(table, record, column, value))
            .await?;
        Ok(())
    }

    /// `clear TABLE RECORD column`
    pub async fn clear_db_attribute(&self, table: &str, record: &str, column: &str) -> OvsResult<()> {
        self.run_vsctl(commands::build_db_clear_args(table, record, column))
            .await?;
        Ok(())
    }

    /// Raw value of a column with trailing newlines removed, `None` when
    /// empty. Without `check_error` a failed command is logged and read as
    /// `None`.
    pub async fn db_get_val(
        &self,
        table: &str,
        record: &str,
        column: &str,
        check_error: bool,
    ) -> OvsResult<Option<String>> {
        match self.run_vsctl(commands::build_db_get_args(table, record, column)).await {
            Ok(output) => {
                let value = output.trim_end_matches(&['\n', '\r'][..]);
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(e) if !check_error => {
                error!(table, record, column, error = %e, "Unable to read database value");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Map column decoded from `{k=v, ...}`; empty when unset. See
    /// [`OvsBridge::db_get_val`] for `check_error`.
    pub async fn db_get_map(
        &self,
        table: &str,
        record: &str,
        column: &str,
        check_error: bool,
    ) -> OvsResult<HashMap<String, String>> {
        Ok(self
            .db_get_val(table, record, column, check_error)
            .await?
            .map(|value| parse_db_map(&value))
            .unwrap_or_default())
    }

    /// Interface counters of `port`
    pub async fn get_port_stats(&self, port: &str) -> OvsResult<HashMap<String, String>> {
        self.db_get_map(INTERFACE_TABLE, port, columns::STATISTICS, false)
            .await
    }

    // Flows

    /// Renders `rules` for `action` and applies them in one `ovs-ofctl`
    /// call. Nothing is sent if any rule fails validation.
    #[instrument(skip(self, rules), fields(bridge = %self.br_name, count = rules.len()))]
    pub async fn do_action_flows(&self, action: FlowAction, rules: &[FlowRule]) -> OvsResult<()> {
        let exprs = rules
            .iter()
            .map(|rule| build_flow_expr(rule, action))
            .collect::<OvsResult<Vec<_>>>()?;
        self.apply_flow_exprs(action, &exprs).await
    }

    /// Feeds already rendered flow expressions to `ovs-ofctl X-flows BR -`
    pub(crate) async fn apply_flow_exprs(&self, action: FlowAction, exprs: &[String]) -> OvsResult<()> {
        if exprs.is_empty() {
            return Ok(());
        }
        let argv = commands::build_flows_argv(action, &self.br_name);
        let payload = exprs.join("\n");
        debug!(bridge = %self.br_name, action = %action, count = exprs.len(), "Applying flows");

        self.ovs
            .execute(&argv, Some(&payload))
            .await
            .map_err(|e| {
                error!(bridge = %self.br_name, action = %action, error = %e, "Unable to apply flows");
                e
            })?;
        Ok(())
    }

    /// Adds one flow
    pub async fn add_flow(&self, rule: FlowRule) -> OvsResult<()> {
        self.do_action_flows(FlowAction::Add, &[rule]).await
    }

    /// Modifies flows matching `rule`
    pub async fn mod_flow(&self, rule: FlowRule) -> OvsResult<()> {
        self.do_action_flows(FlowAction::Modify, &[rule]).await
    }

    /// Deletes flows matching `rule`
    pub async fn delete_flows(&self, rule: FlowRule) -> OvsResult<()> {
        self.do_action_flows(FlowAction::Delete, &[rule]).await
    }

    /// Removes every flow on the bridge
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn remove_all_flows(&self) -> OvsResult<()> {
        let argv = commands::build_del_all_flows_argv(&self.br_name);
        self.ovs.execute(&argv, None).await?;
        Ok(())
    }

    /// Number of flows installed on the bridge
    pub async fn count_flows(&self) -> OvsResult<usize> {
        let output = self.dump(None).await?;
        Ok(output
            .lines()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .count())
    }

    /// Flows of one table without reply headers, `None` for empty output
    pub async fn dump_flows_for_table(&self, table: &str) -> OvsResult<Option<String>> {
        let output = self.dump(Some(table)).await?;
        if output.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            output
                .lines()
                .filter(|line| !line.contains(DUMP_FLOWS_HEADER))
                .collect::<Vec<_>>()
                .join("\n"),
        ))
    }

    /// All flows, one trimmed entry per flow
    pub async fn dump_flows(&self) -> OvsResult<Vec<String>> {
        let output = self.dump(None).await?;
        Ok(output
            .lines()
            .filter(|line| !line.contains(DUMP_FLOWS_HEADER))
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn dump(&self, table: Option<&str>) -> OvsResult<String> {
        let argv = commands::build_dump_flows_argv(&self.br_name, table);
        self.ovs.execute(&argv, None).await
    }

    /// Starts a flow batching session on this bridge
    pub fn deferred(&self, options: DeferredOptions) -> DeferredBridge {
        DeferredBridge::new(self.clone(), options)
    }

    // VIFs

    /// iface-id stored in XAPI for a XenServer VIF
    pub async fn get_xapi_iface_id(&self, xs_vif_uuid: &str) -> OvsResult<String> {
        let argv = commands::build_xapi_iface_id_argv(xs_vif_uuid);
        let output = self.ovs.execute(&argv, None).await.map_err(|e| {
            error!(xs_vif_uuid = %xs_vif_uuid, error = %e, "Unable to query XAPI");
            e
        })?;
        Ok(output.trim().to_string())
    }

    async fn resolve_iface_id(&self, binding: VifBinding<'_>) -> OvsResult<(String, String)> {
        match binding {
            VifBinding::Direct { iface_id, mac } => Ok((iface_id.to_string(), mac.to_string())),
            VifBinding::Xen { xs_vif_uuid, mac } => {
                let iface_id = self.get_xapi_iface_id(xs_vif_uuid).await?;
                Ok((iface_id, mac.to_string()))
            }
        }
    }

    /// VIF ports on this bridge with a usable OpenFlow port number
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn get_vif_ports(&self) -> OvsResult<Vec<VifPort>> {
        let ports = self.get_port_name_list().await?;
        if ports.is_empty() {
            return Ok(Vec::new());
        }

        let args = commands::build_json_list_args(
            INTERFACE_TABLE,
            &[columns::EXTERNAL_IDS, columns::NAME, columns::OFPORT],
            &ports,
        );
        let Some((command, table)) = self.run_vsctl_table(args).await? else {
            return Ok(Vec::new());
        };
        let rows = table
            .select(&[columns::EXTERNAL_IDS, columns::NAME, columns::OFPORT])
            .map_err(|e| malformed(&command, e))?;

        let mut vifs = Vec::new();
        for row in rows {
            let name = row[1]
                .as_str()
                .ok_or_else(|| OvsError::malformed(&command, "interface name is not a string"))?;
            let Some(binding) = row[0].as_map().and_then(VifBinding::from_external_ids) else {
                continue;
            };
            let Some(ofport) = usable_ofport(name, row[2]) else {
                continue;
            };
            let (iface_id, mac) = self.resolve_iface_id(binding).await?;
            vifs.push(VifPort::new(name, ofport, iface_id, mac, self.br_name.as_str()));
        }
        Ok(vifs)
    }

    /// iface-ids of the VIF ports on this bridge with a usable OpenFlow
    /// port number
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn get_vif_port_set(&self) -> OvsResult<HashSet<String>> {
        let ports = self.get_port_name_list().await?;
        if ports.is_empty() {
            return Ok(HashSet::new());
        }

        let args = commands::build_json_list_args(
            INTERFACE_TABLE,
            &[columns::EXTERNAL_IDS, columns::OFPORT],
            &ports,
        );
        let Some((command, table)) = self.run_vsctl_table(args).await? else {
            return Ok(HashSet::new());
        };
        let rows = table
            .select(&[columns::EXTERNAL_IDS, columns::OFPORT])
            .map_err(|e| malformed(&command, e))?;

        let mut iface_ids = HashSet::new();
        for row in rows {
            let Some(ids) = row[0].as_map() else {
                continue;
            };
            if usable_ofport(&external_ids_label(ids), row[1]).is_none() {
                continue;
            }
            if let Some(binding) = VifBinding::from_external_ids(ids) {
                let (iface_id, _) = self.resolve_iface_id(binding).await?;
                iface_ids.insert(iface_id);
            }
        }
        Ok(iface_ids)
    }

    /// VLAN tag of every port on this bridge; `None` for untagged ports
    pub async fn get_port_tag_dict(&self) -> OvsResult<HashMap<String, Option<u16>>> {
        let ports = self.get_port_name_list().await?;
        if ports.is_empty() {
            return Ok(HashMap::new());
        }

        let args =
            commands::build_json_list_args(PORT_TABLE, &[columns::NAME, columns::TAG], &ports);
        let Some((command, table)) = self.run_vsctl_table(args).await? else {
            return Ok(HashMap::new());
        };
        let rows = table
            .select(&[columns::NAME, columns::TAG])
            .map_err(|e| malformed(&command, e))?;

        rows.into_iter()
            .map(|row| -> OvsResult<(String, Option<u16>)> {
                let name = row[0]
                    .as_str()
                    .ok_or_else(|| OvsError::malformed(&command, "port name is not a string"))?;
                let tag = match row[1] {
                    DbValue::Absent => None,
                    value => {
                        let tag = value
                            .as_i64()
                            .and_then(|t| u16::try_from(t).ok())
                            .ok_or_else(|| {
                                OvsError::malformed(&command, format!("invalid tag {:?}", value))
                            })?;
                        Some(tag)
                    }
                };
                Ok((name.to_string(), tag))
            })
            .collect()
    }

    /// VIF port attached to `iface_id`, if it lives on this bridge and has
    /// a usable OpenFlow port number
    #[instrument(skip(self), fields(bridge = %self.br_name))]
    pub async fn get_vif_port_by_id(&self, iface_id: &str) -> OvsResult<Option<VifPort>> {
        let args = commands::build_find_iface_by_id_args(iface_id);
        let Some((command, table)) = self.run_vsctl_table(args).await? else {
            return Ok(None);
        };
        let rows = table
            .select(&[columns::EXTERNAL_IDS, columns::NAME, columns::OFPORT])
            .map_err(|e| malformed(&command, e))?;

        for row in rows {
            let Some(name) = row[1].as_str() else {
                warn!(iface_id = %iface_id, "Unable to parse interface details: missing name");
                return Ok(None);
            };
            let on_bridge = self.ovs.get_bridge_for_iface(name).await;
            if on_bridge.as_deref() != Some(self.br_name.as_str()) {
                continue;
            }

            let ofport = match row[2].as_i64().and_then(|o| i32::try_from(o).ok()) {
                Some(ofport) if ofport > 0 => ofport,
                _ => {
                    warn!(ofport = ?row[2], vif = %iface_id, "ofport for VIF is not a positive integer");
                    return Ok(None);
                }
            };

            let mac = row[0]
                .as_map()
                .and_then(|ids| ids.get(external_ids::ATTACHED_MAC));
            let Some(mac) = mac else {
                warn!(iface_id = %iface_id, "Unable to parse interface details: no attached-mac");
                return Ok(None);
            };
            return Ok(Some(VifPort::new(name, ofport, iface_id, mac.as_str(), self.br_name.as_str())));
        }

        info!(iface_id = %iface_id, bridge = %self.br_name, "Port not present in bridge");
        Ok(None)
    }
}

fn malformed(command: &str, error: DbParseError) -> OvsError {
    OvsError::malformed(command, error.to_string())
}
