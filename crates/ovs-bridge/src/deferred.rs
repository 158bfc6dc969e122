//! Deferred flow programming
//!
//! A [`DeferredBridge`] buffers flow additions, modifications and deletions
//! and applies them in as few `ovs-ofctl` calls as possible. Unless full
//! ordering is requested, buffered operations are stably sorted by verb
//! (additions, then modifications, then deletions by default), so operations
//! of the same verb keep their submission order. Every maximal run of one
//! verb becomes a single `X-flows BR -` call.
//!
//! A batcher is a single-session object: it takes `&mut self` to buffer and
//! is not meant to be shared. Use one instance per batching session.

use futures::future::BoxFuture;
use itertools::Itertools;
use ovs_agent_common::OvsResult;
use tracing::{debug, error};

use crate::bridge::OvsBridge;
use crate::flow::{build_flow_expr, FlowAction, FlowRule, PendingFlowOp};
use crate::types::TunnelOptions;

/// Default verb order for grouped application
pub const DEFAULT_ORDER: [FlowAction; 3] = [FlowAction::Add, FlowAction::Modify, FlowAction::Delete];

/// How buffered operations are ordered when flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredOptions {
    full_ordered: bool,
    order: [FlowAction; 3],
}

impl Default for DeferredOptions {
    fn default() -> Self {
        Self {
            full_ordered: false,
            order: DEFAULT_ORDER,
        }
    }
}

impl DeferredOptions {
    /// Apply operations strictly in submission order. Slower, since only
    /// adjacent operations of the same verb share a call.
    pub fn full_ordered() -> Self {
        Self {
            full_ordered: true,
            ..Self::default()
        }
    }

    /// Set the verb order used for grouping (builder pattern)
    pub fn with_order(mut self, order: [FlowAction; 3]) -> Self {
        self.order = order;
        self
    }

    /// True when submission order is preserved
    pub fn is_full_ordered(&self) -> bool {
        self.full_ordered
    }

    /// Verb order used for grouping
    pub fn order(&self) -> &[FlowAction; 3] {
        &self.order
    }

    /// Sort weight of `action`; verbs missing from the order go last
    pub fn weight(&self, action: FlowAction) -> usize {
        self.order
            .iter()
            .position(|a| *a == action)
            .unwrap_or(self.order.len())
    }
}

/// Orders `ops` according to `options` and splits them into maximal runs
/// of one verb, in application order.
pub fn group_pending(
    mut ops: Vec<PendingFlowOp>,
    options: &DeferredOptions,
) -> Vec<(FlowAction, Vec<FlowRule>)> {
    if !options.full_ordered {
        ops.sort_by_key(|op| options.weight(op.action()));
    }

    let runs = ops.into_iter().chunk_by(PendingFlowOp::action);
    let groups = runs
        .into_iter()
        .map(|(action, run)| (action, run.map(PendingFlowOp::into_rule).collect()))
        .collect();
    groups
}

/// Flow batching session on one bridge
#[derive(Debug)]
pub struct DeferredBridge {
    bridge: OvsBridge,
    options: DeferredOptions,
    pending: Vec<PendingFlowOp>,
}

impl DeferredBridge {
    /// Starts an empty session on `bridge`
    pub fn new(bridge: OvsBridge, options: DeferredOptions) -> Self {
        Self {
            bridge,
            options,
            pending: Vec::new(),
        }
    }

    /// Runs `f` with a fresh session and flushes it if `f` succeeds. If `f`
    /// fails, buffered operations are dropped without touching the switch
    /// and the error is returned.
    pub async fn scoped<T, F>(bridge: &OvsBridge, options: DeferredOptions, f: F) -> OvsResult<T>
    where
        F: for<'a> FnOnce(&'a mut DeferredBridge) -> BoxFuture<'a, OvsResult<T>>,
    {
        let mut deferred = bridge.deferred(options);
        match f(&mut deferred).await {
            Ok(value) => {
                deferred.apply_flows().await?;
                Ok(value)
            }
            Err(e) => {
                error!(
                    bridge = %bridge.br_name(),
                    discarded = deferred.pending.len(),
                    error = %e,
                    "OVS flows could not be applied on bridge"
                );
                Err(e)
            }
        }
    }

    /// Name of the wrapped bridge
    pub fn bridge_name(&self) -> &str {
        self.bridge.br_name()
    }

    /// Ordering options of this session
    pub fn options(&self) -> &DeferredOptions {
        &self.options
    }

    /// Buffered operations, in submission order
    pub fn pending(&self) -> &[PendingFlowOp] {
        &self.pending
    }

    /// Number of buffered operations
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Buffers a flow addition
    pub fn add_flow(&mut self, rule: FlowRule) {
        self.pending.push(PendingFlowOp::Add(rule));
    }

    /// Buffers a flow modification
    pub fn mod_flow(&mut self, rule: FlowRule) {
        self.pending.push(PendingFlowOp::Modify(rule));
    }

    /// Buffers a flow deletion
    pub fn delete_flows(&mut self, rule: FlowRule) {
        self.pending.push(PendingFlowOp::Delete(rule));
    }

    /// Adds a port on the wrapped bridge right away
    pub async fn add_port(&self, port: &str, options: &[(String, String)]) -> OvsResult<i32> {
        self.bridge.add_port(port, options).await
    }

    /// Adds a tunnel port on the wrapped bridge right away
    pub async fn add_tunnel_port(
        &self,
        port: &str,
        remote_ip: &str,
        local_ip: &str,
        tunnel: &TunnelOptions,
    ) -> OvsResult<i32> {
        self.bridge
            .add_tunnel_port(port, remote_ip, local_ip, tunnel)
            .await
    }

    /// Removes a port from the wrapped bridge right away
    pub async fn delete_port(&self, port: &str) -> OvsResult<()> {
        self.bridge.delete_port(port).await
    }

    /// Applies and clears the buffer.
    ///
    /// The buffer is emptied before anything is sent, so failed operations
    /// are never retried by a later flush. Every rule is validated before
    /// the first call; a rule that fails validation means nothing is sent.
    /// A call failing after earlier runs went through leaves those runs
    /// applied: there is no rollback.
    pub async fn apply_flows(&mut self) -> OvsResult<()> {
        let ops = std::mem::take(&mut self.pending);
        if ops.is_empty() {
            return Ok(());
        }

        let total = ops.len();
        let runs = group_pending(ops, &self.options)
            .into_iter()
            .map(|(action, rules)| {
                rules
                    .iter()
                    .map(|rule| build_flow_expr(rule, action))
                    .collect::<OvsResult<Vec<_>>>()
                    .map(|exprs| (action, exprs))
            })
            .collect::<OvsResult<Vec<_>>>()?;

        debug!(
            bridge = %self.bridge.br_name(),
            operations = total,
            calls = runs.len(),
            "Applying deferred flows"
        );

        for (action, exprs) in &runs {
            self.bridge.apply_flow_exprs(*action, exprs).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ovs::Ovs;
    use ovs_agent_common::OvsError;
    use ovs_agent_test::MockExecutor;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn setup() -> (Arc<MockExecutor>, OvsBridge) {
        let mock = Arc::new(MockExecutor::new());
        let bridge = Ovs::with_timeout(mock.clone(), 10).bridge("br-int");
        (mock, bridge)
    }

    fn rule(table: u32) -> FlowRule {
        FlowRule::new().with_field("table", table).with_actions("drop")
    }

    fn match_only(table: u32) -> FlowRule {
        FlowRule::new().with_field("table", table)
    }

    fn tables(rules: &[FlowRule]) -> Vec<&str> {
        rules.iter().filter_map(|r| r.field("table")).collect()
    }

    #[test]
    fn test_group_default_order_is_stable() {
        let ops = vec![
            PendingFlowOp::Delete(match_only(1)),
            PendingFlowOp::Add(rule(2)),
            PendingFlowOp::Modify(rule(3)),
            PendingFlowOp::Add(rule(4)),
            PendingFlowOp::Delete(match_only(5)),
            PendingFlowOp::Modify(rule(6)),
            PendingFlowOp::Add(rule(7)),
        ];

        let groups = group_pending(ops, &DeferredOptions::default());

        let summary: Vec<(FlowAction, Vec<&str>)> = groups
            .iter()
            .map(|(action, rules)| (*action, tables(rules)))
            .collect();
        assert_eq!(
            summary,
            vec![
                (FlowAction::Add, vec!["2", "4", "7"]),
                (FlowAction::Modify, vec!["3", "6"]),
                (FlowAction::Delete, vec!["1", "5"]),
            ]
        );
    }

    #[test]
    fn test_group_full_ordered_keeps_runs() {
        let ops = vec![
            PendingFlowOp::Add(rule(1)),
            PendingFlowOp::Add(rule(2)),
            PendingFlowOp::Delete(match_only(3)),
            PendingFlowOp::Add(rule(4)),
        ];

        let groups = group_pending(ops, &DeferredOptions::full_ordered());

        let actions: Vec<FlowAction> = groups.iter().map(|(action, _)| *action).collect();
        assert_eq!(actions, vec![FlowAction::Add, FlowAction::Delete, FlowAction::Add]);
        assert_eq!(tables(&groups[0].1), vec!["1", "2"]);
    }

    #[test]
    fn test_group_custom_order() {
        let ops = vec![
            PendingFlowOp::Add(rule(1)),
            PendingFlowOp::Delete(match_only(2)),
            PendingFlowOp::Modify(rule(3)),
        ];
        let options = DeferredOptions::default().with_order([
            FlowAction::Delete,
            FlowAction::Add,
            FlowAction::Modify,
        ]);

        let actions: Vec<FlowAction> = group_pending(ops, &options)
            .iter()
            .map(|(action, _)| *action)
            .collect();
        assert_eq!(actions, vec![FlowAction::Delete, FlowAction::Add, FlowAction::Modify]);
    }

    #[test]
    fn test_weight_of_missing_verb() {
        let options = DeferredOptions::default().with_order([
            FlowAction::Delete,
            FlowAction::Delete,
            FlowAction::Add,
        ]);
        assert_eq!(options.weight(FlowAction::Delete), 0);
        assert_eq!(options.weight(FlowAction::Add), 2);
        assert_eq!(options.weight(FlowAction::Modify), 3);
    }

    #[test]
    fn test_buffering_issues_nothing() {
        let (mock, bridge) = setup();
        let mut deferred = bridge.deferred(DeferredOptions::default());

        deferred.add_flow(rule(0));
        deferred.mod_flow(rule(1));
        deferred.delete_flows(match_only(2));

        assert_eq!(deferred.len(), 3);
        assert_eq!(deferred.pending()[1].action(), FlowAction::Modify);
        assert_eq!(deferred.bridge_name(), "br-int");
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_flows_one_call_per_verb() {
        let (mock, bridge) = setup();
        let mut deferred = bridge.deferred(DeferredOptions::default());

        deferred.delete_flows(match_only(9));
        deferred.add_flow(rule(1));
        deferred.add_flow(rule(2));

        deferred.apply_flows().await.unwrap();

        let commands = mock.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].command_line(), "ovs-ofctl add-flows br-int -");
        assert_eq!(
            commands[0].stdin.as_deref(),
            Some(
                "hard_timeout=0,idle_timeout=0,priority=1,table=1,actions=drop\n\
                 hard_timeout=0,idle_timeout=0,priority=1,table=2,actions=drop"
            )
        );
        assert_eq!(commands[1].command_line(), "ovs-ofctl del-flows br-int -");
        assert_eq!(commands[1].stdin.as_deref(), Some("table=9"));
        assert!(deferred.is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_repeated_flush() {
        let (mock, bridge) = setup();
        let mut deferred = bridge.deferred(DeferredOptions::default());

        deferred.apply_flows().await.unwrap();
        assert_eq!(mock.call_count(), 0);

        deferred.add_flow(rule(1));
        deferred.apply_flows().await.unwrap();
        deferred.apply_flows().await.unwrap();
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_rule_blocks_whole_flush() {
        let (mock, bridge) = setup();
        let mut deferred = bridge.deferred(DeferredOptions::default());

        deferred.add_flow(rule(1));
        deferred.delete_flows(FlowRule::new().with_field("priority", 5));

        let err = deferred.apply_flows().await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(mock.call_count(), 0);
        assert!(deferred.is_empty());
    }

    #[tokio::test]
    async fn test_failure_mid_flush_is_not_rolled_back() {
        let (mock, bridge) = setup();
        mock.fail("mod-flows", 1, "OFPT_ERROR");
        let mut deferred = bridge.deferred(DeferredOptions::default());

        deferred.add_flow(rule(1));
        deferred.mod_flow(rule(2));
        deferred.delete_flows(match_only(3));

        let err = deferred.apply_flows().await.unwrap_err();

        assert!(err.is_command_failure());
        assert_eq!(
            mock.command_lines(),
            vec!["ovs-ofctl add-flows br-int -", "ovs-ofctl mod-flows br-int -"]
        );
        assert!(deferred.is_empty());
    }

    #[tokio::test]
    async fn test_scoped_flushes_on_success() {
        let (mock, bridge) = setup();

        let queued = DeferredBridge::scoped(&bridge, DeferredOptions::default(), |deferred| {
            Box::pin(async move {
                deferred.mod_flow(rule(1));
                deferred.add_flow(rule(2));
                Ok(deferred.len())
            })
        })
        .await
        .unwrap();

        assert_eq!(queued, 2);
        mock.verify_order(&["add-flows", "mod-flows"]).unwrap();
    }

    #[tokio::test]
    async fn test_scoped_discards_on_error() {
        let (mock, bridge) = setup();

        let result: OvsResult<()> =
            DeferredBridge::scoped(&bridge, DeferredOptions::default(), |deferred| {
                Box::pin(async move {
                    deferred.add_flow(rule(1));
                    deferred.delete_port("tap1").await?;
                    Err(OvsError::invalid_flow("caller gave up"))
                })
            })
            .await;

        assert!(result.is_err());
        mock.verify_issued("del-port br-int tap1").unwrap();
        mock.verify_not_issued("add-flows").unwrap();
    }
}
