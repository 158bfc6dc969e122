//! Bridge controller integration tests
//!
//! Drives whole scenarios through the public API against a scripted
//! executor and checks the exact command lines and stdin payloads that
//! would reach `ovs-vsctl` and `ovs-ofctl`.

use std::sync::Arc;

use ovs_agent_test::fixtures::{empty_set, interface_fixtures, port_fixtures};
use ovs_agent_test::{MockExecutor, MockResponse};
use ovs_bridge::{
    DeferredBridge, DeferredOptions, FlowRule, Ovs, OvsBridge, TunnelOptions, TunnelType, VifPort,
    INVALID_OFPORT,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn setup(timeout_secs: u64) -> (Arc<MockExecutor>, Ovs) {
    let mock = Arc::new(MockExecutor::new());
    let ovs = Ovs::with_timeout(mock.clone(), timeout_secs);
    (mock, ovs)
}

fn script_ports(mock: &MockExecutor, bridge: &str, ports: &[&str]) {
    mock.respond(format!("list-ports {}", bridge), port_fixtures::port_list(ports));
}

/// A port that never gets an ofport is removed again.
///
/// Scenario:
/// 1. add-port succeeds but the ofport column stays `["set", []]`
/// 2. The waiter gives up after the configured timeout
/// 3. The port is deleted and the invalid sentinel is returned
#[tokio::test(start_paused = true)]
async fn test_add_port_timeout_cleans_up() {
    let (mock, ovs) = setup(1);
    mock.respond("get Interface tap1 ofport", "[\"set\", []]\n");
    let bridge = ovs.bridge("br-int");

    let start = tokio::time::Instant::now();
    let ofport = bridge
        .add_port("tap1", &[])
        .await
        .expect("add_port should not fail on timeout");

    assert_eq!(ofport, INVALID_OFPORT);
    assert!(start.elapsed() >= std::time::Duration::from_secs(1));
    assert!(mock.matching("get Interface tap1 ofport").len() > 1);

    let lines = mock.command_lines();
    assert_eq!(
        lines.last().map(String::as_str),
        Some("ovs-vsctl --timeout=1 -- --if-exists del-port br-int tap1")
    );
}

/// Tunnel ports carry their encapsulation settings in the add-port
/// transaction.
#[tokio::test]
async fn test_vxlan_tunnel_port() {
    let (mock, ovs) = setup(10);
    mock.respond("get Interface vxlan-0a000002 ofport", "7\n");
    let bridge = ovs.bridge("br-tun");

    let tunnel = TunnelOptions::default()
        .with_tunnel_type(TunnelType::Vxlan)
        .with_vxlan_udp_port(8472);
    let ofport = bridge
        .add_tunnel_port("vxlan-0a000002", "10.0.0.2", "10.0.0.1", &tunnel)
        .await
        .expect("tunnel port");

    assert_eq!(ofport, 7);
    mock.verify_issued(
        "ovs-vsctl --timeout=10 -- --may-exist add-port br-tun vxlan-0a000002 \
         -- set Interface vxlan-0a000002 type=vxlan options:dst_port=8472 \
         options:df_default=true options:remote_ip=10.0.0.2 options:local_ip=10.0.0.1 \
         options:in_key=flow options:out_key=flow",
    )
    .expect("tunnel add-port");
}

/// A deferred session on a tunnel bridge: the port is added right away,
/// the flows go out grouped by verb when the session ends.
#[tokio::test]
async fn test_deferred_session_with_passthrough() {
    let (mock, ovs) = setup(10);
    mock.respond("get Interface gre-1 ofport", "3\n");
    let bridge = ovs.bridge("br-tun");

    DeferredBridge::scoped(&bridge, DeferredOptions::default(), |flows| {
        Box::pin(async move {
            flows.delete_flows(FlowRule::new().with_field("table", 2).with_field("tun_id", "0x1"));
            let ofport = flows
                .add_tunnel_port("gre-1", "10.0.0.2", "10.0.0.1", &TunnelOptions::default())
                .await?;
            flows.add_flow(
                FlowRule::new()
                    .with_field("priority", 1)
                    .with_field("in_port", ofport)
                    .with_actions("resubmit(,2)"),
            );
            flows.mod_flow(
                FlowRule::new()
                    .with_field("table", 22)
                    .with_field("dl_vlan", 5)
                    .with_actions(format!("strip_vlan,set_tunnel:0x1,output:{}", ofport)),
            );
            Ok(())
        })
    })
    .await
    .expect("deferred session");

    let commands = mock.commands();
    let ofctl: Vec<_> = commands
        .iter()
        .filter(|c| c.argv[0] == "ovs-ofctl")
        .collect();
    assert_eq!(ofctl.len(), 3);
    assert_eq!(ofctl[0].command_line(), "ovs-ofctl add-flows br-tun -");
    assert_eq!(
        ofctl[0].stdin.as_deref(),
        Some("hard_timeout=0,idle_timeout=0,priority=1,in_port=3,actions=resubmit(,2)")
    );
    assert_eq!(ofctl[1].command_line(), "ovs-ofctl mod-flows br-tun -");
    assert_eq!(
        ofctl[1].stdin.as_deref(),
        Some("table=22,dl_vlan=5,actions=strip_vlan,set_tunnel:0x1,output:3")
    );
    assert_eq!(ofctl[2].command_line(), "ovs-ofctl del-flows br-tun -");
    assert_eq!(ofctl[2].stdin.as_deref(), Some("table=2,tun_id=0x1"));

    mock.verify_order(&["add-port br-tun gre-1", "add-flows", "mod-flows", "del-flows"])
        .expect("port before flows");
}

/// VIF discovery keeps only attached, ready ports and resolves XenServer
/// ids through XAPI.
#[tokio::test]
async fn test_get_vif_ports() {
    let (mock, ovs) = setup(10);
    script_ports(&mock, "br-int", &["tap1", "tap2", "tap3", "patch-tun", "tap5"]);
    mock.respond(
        "list Interface",
        interface_fixtures::interface_find(vec![
            (interface_fixtures::vif_external_ids("id-1", "fa:16:3e:00:00:01"), "tap1", json!(1)),
            (interface_fixtures::xen_external_ids("xs-2", "fa:16:3e:00:00:02"), "tap2", json!(2)),
            (interface_fixtures::vif_external_ids("id-3", "fa:16:3e:00:00:03"), "tap3", empty_set()),
            (json!(["map", []]), "patch-tun", json!(4)),
            (interface_fixtures::vif_external_ids("id-5", "fa:16:3e:00:00:05"), "tap5", json!(-1)),
        ]),
    );
    mock.respond("uuid=xs-2", "id-2\n");
    let bridge = ovs.bridge("br-int");

    let vifs = bridge.get_vif_ports().await.expect("vif ports");

    assert_eq!(
        vifs,
        vec![
            VifPort::new("tap1", 1, "id-1", "fa:16:3e:00:00:01", "br-int"),
            VifPort::new("tap2", 2, "id-2", "fa:16:3e:00:00:02", "br-int"),
        ]
    );
    mock.verify_issued(
        "--format=json -- --columns=external_ids,name,ofport list Interface \
         tap1 tap2 tap3 patch-tun tap5",
    )
    .expect("single listing query");
}

/// Removing VIF ports leaves infrastructure ports alone.
#[tokio::test]
async fn test_delete_vif_ports_only() {
    let (mock, ovs) = setup(10);
    script_ports(&mock, "br-int", &["tap1", "patch-tun"]);
    mock.respond(
        "list Interface",
        interface_fixtures::interface_find(vec![
            (interface_fixtures::vif_external_ids("id-1", "fa:16:3e:00:00:01"), "tap1", json!(1)),
            (json!(["map", []]), "patch-tun", json!(2)),
        ]),
    );
    let bridge = ovs.bridge("br-int");

    bridge.delete_ports(false).await.expect("delete vif ports");
    mock.verify_issued("del-port br-int tap1").expect("vif removed");
    mock.verify_not_issued("del-port br-int patch-tun")
        .expect("patch port kept");

    mock.clear_history();
    bridge.delete_ports(true).await.expect("delete all ports");
    mock.verify_order(&["del-port br-int tap1", "del-port br-int patch-tun"])
        .expect("all ports removed");
}

/// Lookup by iface-id only answers for ports on this bridge.
#[tokio::test]
async fn test_get_vif_port_by_id() {
    let (mock, ovs) = setup(10);
    mock.respond(
        "find Interface external_ids:iface-id=\"id-1\"",
        interface_fixtures::interface_find(vec![(
            interface_fixtures::vif_external_ids("id-1", "fa:16:3e:00:00:01"),
            "tap1",
            json!(9),
        )]),
    );
    mock.respond(
        "find Interface external_ids:iface-id=\"id-2\"",
        interface_fixtures::interface_find(vec![(
            interface_fixtures::vif_external_ids("id-2", "fa:16:3e:00:00:02"),
            "tap2",
            empty_set(),
        )]),
    );
    mock.respond("iface-to-br tap1", "br-int\n");
    mock.respond("iface-to-br tap2", "br-int\n");

    let br_int = ovs.bridge("br-int");
    let br_ex = ovs.bridge("br-ex");

    assert_eq!(
        br_int.get_vif_port_by_id("id-1").await.expect("lookup"),
        Some(VifPort::new("tap1", 9, "id-1", "fa:16:3e:00:00:01", "br-int"))
    );
    assert_eq!(br_ex.get_vif_port_by_id("id-1").await.expect("lookup"), None);
    assert_eq!(br_int.get_vif_port_by_id("id-2").await.expect("lookup"), None);
    assert_eq!(br_int.get_vif_port_by_id("id-3").await.expect("lookup"), None);
}

/// Port tags distinguish untagged ports from VLAN 0.
#[tokio::test]
async fn test_port_tag_dict() {
    let (mock, ovs) = setup(10);
    script_ports(&mock, "br-int", &["tap1", "tap2"]);
    mock.respond(
        "list Port",
        port_fixtures::port_tags(vec![("tap1", json!(["set", [0]])), ("tap2", json!([]))]),
    );

    let tags = ovs
        .bridge("br-int")
        .get_port_tag_dict()
        .await
        .expect("port tags");

    assert_eq!(tags.get("tap1"), Some(&Some(0)));
    assert_eq!(tags.get("tap2"), Some(&None));
}

/// A scoped bridge is torn down even when the work inside fails.
#[tokio::test]
async fn test_scoped_bridge_with_failing_flows() {
    let (mock, ovs) = setup(10);
    mock.fail("add-flows", 1, "ovs-ofctl: br-test is not a bridge or a socket");
    let bridge: OvsBridge = ovs.bridge("br-test");

    let result = bridge
        .scoped(|br| {
            Box::pin(async move {
                br.set_protocols("OpenFlow10,OpenFlow13").await?;
                br.add_flow(FlowRule::new().with_actions("normal")).await
            })
        })
        .await;

    let err = result.expect_err("flow failure should propagate");
    assert_eq!(err.exit_code(), Some(1));
    mock.verify_order(&[
        "-- --may-exist add-br br-test",
        "-- set bridge br-test protocols=OpenFlow10,OpenFlow13",
        "ovs-ofctl add-flows br-test -",
        "-- --if-exists del-br br-test",
    ])
    .expect("create, work, destroy");
}

/// Resetting a bridge is destroy followed by create, and existence checks
/// read exit code 2 as "absent".
#[tokio::test]
async fn test_reset_and_exists() {
    let (mock, ovs) = setup(10);
    mock.respond_sequence(
        "br-exists br-int",
        vec![MockResponse::fail(2, ""), MockResponse::output("")],
    );
    let bridge = ovs.bridge("br-int");

    assert!(!bridge.exists().await.expect("exists"));
    bridge.reset_bridge().await.expect("reset");
    assert!(bridge.exists().await.expect("exists"));

    mock.verify_order(&["br-exists br-int", "del-br br-int", "add-br br-int", "br-exists br-int"])
        .expect("reset order");
}
