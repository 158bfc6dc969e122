//! Flow rules and their `ovs-ofctl` text encoding
//!
//! A [`FlowRule`] is an ordered set of match/attribute fields plus an
//! optional action list. [`build_flow_expr`] renders it in the form
//! `ovs-ofctl {add,mod,del}-flows` reads from stdin, e.g.
//! `hard_timeout=0,idle_timeout=0,priority=1,table=0,arp,actions=NORMAL`.

use ovs_agent_common::{OvsError, OvsResult};
use std::fmt;

/// Field rendered as a bare token (`arp`, `tcp`, ...) instead of `key=value`
pub const PROTO_FIELD: &str = "proto";

/// Action list field, always rendered last
pub const ACTIONS_FIELD: &str = "actions";

/// Priority field
pub const PRIORITY_FIELD: &str = "priority";

/// Hard timeout field
pub const HARD_TIMEOUT_FIELD: &str = "hard_timeout";

/// Idle timeout field
pub const IDLE_TIMEOUT_FIELD: &str = "idle_timeout";

/// Flow-programming verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowAction {
    /// `add-flows`
    Add,
    /// `mod-flows`
    Modify,
    /// `del-flows`
    Delete,
}

impl FlowAction {
    /// Short verb used in ofctl subcommands
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowAction::Add => "add",
            FlowAction::Modify => "mod",
            FlowAction::Delete => "del",
        }
    }

    /// ofctl subcommand reading flows for this verb
    pub fn ofctl_command(&self) -> String {
        format!("{}-flows", self.as_str())
    }
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match and attribute fields of a flow, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowRule {
    fields: Vec<(String, String)>,
    actions: Option<String>,
}

impl FlowRule {
    /// Create an empty rule
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any earlier value in place.
    ///
    /// `actions` is routed to [`FlowRule::with_actions`].
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        let value = value.to_string();
        if key == ACTIONS_FIELD {
            self.actions = Some(value);
            return self;
        }
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    /// Set the action list
    pub fn with_actions(mut self, actions: impl Into<String>) -> Self {
        self.actions = Some(actions.into());
        self
    }

    /// Gets the value for a field, if present
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Checks if a field exists
    pub fn has_field(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// The action list, if any
    pub fn actions(&self) -> Option<&str> {
        self.actions.as_deref()
    }

    /// Fields other than actions, in insertion order
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// Renders `rule` as an ofctl flow expression for `action`.
///
/// Additions get `hard_timeout`, `idle_timeout` and `priority` first
/// (defaulting to 0, 0 and 1). Modifications and deletions must not carry
/// a priority; additions and modifications must carry actions. Rules that
/// break either constraint are rejected before anything is rendered.
pub fn build_flow_expr(rule: &FlowRule, action: FlowAction) -> OvsResult<String> {
    if action != FlowAction::Add && rule.has_field(PRIORITY_FIELD) {
        return Err(OvsError::invalid_flow(
            "Cannot match priority on flow deletion or modification",
        ));
    }
    if action != FlowAction::Delete && rule.actions.is_none() {
        return Err(OvsError::invalid_flow(
            "Must specify one or more actions on flow addition or modification",
        ));
    }

    let mut parts = Vec::with_capacity(rule.fields.len() + 4);
    let mut leading: &[&str] = &[];

    if action == FlowAction::Add {
        leading = &[HARD_TIMEOUT_FIELD, IDLE_TIMEOUT_FIELD, PRIORITY_FIELD];
        parts.push(format!(
            "{}={}",
            HARD_TIMEOUT_FIELD,
            rule.field(HARD_TIMEOUT_FIELD).unwrap_or("0")
        ));
        parts.push(format!(
            "{}={}",
            IDLE_TIMEOUT_FIELD,
            rule.field(IDLE_TIMEOUT_FIELD).unwrap_or("0")
        ));
        parts.push(format!(
            "{}={}",
            PRIORITY_FIELD,
            rule.field(PRIORITY_FIELD).unwrap_or("1")
        ));
    }

    for (key, value) in rule.fields.iter().filter(|(k, _)| !leading.contains(&k.as_str())) {
        if key == PROTO_FIELD {
            parts.push(value.clone());
        } else {
            parts.push(format!("{}={}", key, value));
        }
    }

    if let Some(actions) = &rule.actions {
        parts.push(format!("{}={}", ACTIONS_FIELD, actions));
    }

    Ok(parts.join(","))
}

/// A flow mutation waiting to be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingFlowOp {
    /// Flow to add
    Add(FlowRule),
    /// Flow to modify
    Modify(FlowRule),
    /// Flows to delete
    Delete(FlowRule),
}

impl PendingFlowOp {
    /// Verb of this operation
    pub fn action(&self) -> FlowAction {
        match self {
            PendingFlowOp::Add(_) => FlowAction::Add,
            PendingFlowOp::Modify(_) => FlowAction::Modify,
            PendingFlowOp::Delete(_) => FlowAction::Delete,
        }
    }

    /// The rule carried by this operation
    pub fn rule(&self) -> &FlowRule {
        match self {
            PendingFlowOp::Add(rule) | PendingFlowOp::Modify(rule) | PendingFlowOp::Delete(rule) => {
                rule
            }
        }
    }

    /// Consumes the operation, returning its rule
    pub fn into_rule(self) -> FlowRule {
        match self {
            PendingFlowOp::Add(rule) | PendingFlowOp::Modify(rule) | PendingFlowOp::Delete(rule) => {
                rule
            }
        }
    }
}
