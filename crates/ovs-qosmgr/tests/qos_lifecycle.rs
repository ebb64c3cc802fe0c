//! Integration tests for the QoS reconciler
//!
//! Drives whole bandwidth and netem lifecycles against the in-memory switch:
//! - ingress policing and HTB egress shaping
//! - netem apply, reuse, replace and removal
//! - full interface cleanup

use std::num::NonZeroUsize;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use ovs_qos_test::{FakeVswitchd, PodFixture, SwitchVerifier, TEST_BRIDGE};
use ovs_qosmgr::tables::{HTB_QOS, NETEM_QOS};
use ovs_qosmgr::{HtbQueueParams, NetemParams, PodRef, QosMgr, QueueIfaceMap, SwitchConfig};
use ovs_vsctl::{OvsError, Vsctl};

/// Test fixture: one pod attached to the integration bridge
struct TestSetup {
    switch: Arc<FakeVswitchd>,
    mgr: QosMgr,
    pod: PodFixture,
}

impl TestSetup {
    fn new() -> Self {
        let switch = FakeVswitchd::with_bridge(TEST_BRIDGE);
        let pod = PodFixture::new("web-0", "default");
        switch.add_port(TEST_BRIDGE, &pod.port_spec());
        let vsctl = Vsctl::new(switch.clone(), NonZeroUsize::new(16).unwrap());
        let mgr = QosMgr::new(vsctl, SwitchConfig::default());
        Self { switch, mgr, pod }
    }

    fn pod_ref(&self) -> PodRef {
        PodRef::new(&self.pod.name, &self.pod.namespace)
    }

    fn verifier(&self) -> SwitchVerifier<'_> {
        SwitchVerifier::new(&self.switch)
    }
}

#[tokio::test]
async fn test_bandwidth_lifecycle() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let port = setup.pod.port_name();
    let mut queue_map = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 10, 20, &mut queue_map)
        .await
        .expect("Failed to set bandwidth");

    let verifier = setup.verifier();
    verifier
        .assert_atom("interface", &port, "ingress_policing_rate", "10000")
        .unwrap();
    verifier
        .assert_atom("interface", &port, "ingress_policing_burst", "8000")
        .unwrap();
    let qos = verifier.assert_port_qos_type(&port, HTB_QOS).unwrap();
    let queue = queue_map.get(&iface_id).cloned().expect("queue not recorded");
    assert_eq!(qos.map("queues").get("0"), Some(&queue));
    verifier
        .assert_map_value("queue", &queue, "other_config", "max-rate", "20000000")
        .unwrap();
    assert!(setup.mgr.is_htb_qos(&iface_id).await.unwrap());

    // Reapplying changes values in place without new records
    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 10, 50, &mut queue_map)
        .await
        .unwrap();
    verifier.assert_row_count("qos", 1).unwrap();
    verifier.assert_row_count("queue", 1).unwrap();
    verifier
        .assert_map_value("queue", &queue, "other_config", "max-rate", "50000000")
        .unwrap();

    // Zero egress drops the HTB state, zero ingress drops policing
    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 0, 0, &mut queue_map)
        .await
        .unwrap();
    assert!(!setup.mgr.is_htb_qos(&iface_id).await.unwrap());
    assert!(queue_map.is_empty());
    verifier.assert_port_qos_cleared(&port).unwrap();
    verifier.assert_row_count("qos", 0).unwrap();
    verifier.assert_row_count("queue", 0).unwrap();
    verifier
        .assert_atom("interface", &port, "ingress_policing_rate", "0")
        .unwrap();
}

#[tokio::test]
async fn test_ingress_only_leaves_egress_untouched() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let mut queue_map = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 5, 0, &mut queue_map)
        .await
        .unwrap();

    let verifier = setup.verifier();
    verifier
        .assert_atom("interface", &setup.pod.port_name(), "ingress_policing_rate", "5000")
        .unwrap();
    verifier.assert_row_count("qos", 0).unwrap();
    verifier.assert_row_count("queue", 0).unwrap();
    assert!(queue_map.is_empty());
}

#[tokio::test]
async fn test_bandwidth_for_unknown_interface_is_noop() {
    let setup = TestSetup::new();
    let mut queue_map = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&PodRef::default(), "missing.default", 10, 10, &mut queue_map)
        .await
        .unwrap();

    assert!(queue_map.is_empty());
    assert_eq!(setup.switch.count("queue"), 0);
    assert_eq!(setup.switch.count("qos"), 0);
}

#[tokio::test]
async fn test_qos_list_follows_binding() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let pod = setup.pod_ref();
    let mut queue_map = QueueIfaceMap::new();

    assert!(setup.mgr.get_qos_list(&pod, &iface_id).await.unwrap().is_empty());

    let queue = setup
        .mgr
        .set_htb_qos_queue_record(&pod, &iface_id, &HtbQueueParams::max_rate(1_000_000), &mut queue_map)
        .await
        .unwrap();
    let qos = setup
        .mgr
        .set_qos_queue_binding(&pod, &setup.pod.port_name(), &iface_id, &queue, &queue_map)
        .await
        .unwrap();

    assert_eq!(setup.mgr.get_qos_list(&pod, &iface_id).await.unwrap(), vec![qos.clone()]);
    // The pod tag finds the same record
    assert_eq!(setup.mgr.get_qos_list(&pod, "").await.unwrap(), vec![qos]);

    setup.mgr.clear_htb_qos_queue(&pod, &iface_id).await.unwrap();
    assert!(!setup.mgr.is_htb_qos(&iface_id).await.unwrap());
    assert!(setup.mgr.get_qos_list(&pod, &iface_id).await.unwrap().is_empty());
    setup.verifier().assert_no_orphans().unwrap();
}

#[tokio::test]
async fn test_netem_lifecycle() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let pod = setup.pod_ref();
    let port = setup.pod.port_name();

    setup
        .mgr
        .set_netem_qos(&pod, &iface_id, &NetemParams::new(1, 1, 1, 1.0))
        .await
        .expect("Failed to set netem");

    let row = setup.verifier().assert_port_qos_type(&port, NETEM_QOS).unwrap();
    let config = setup.mgr.get_netem_qos_config(&row.uuid).await.unwrap();
    assert_eq!(config.latency_us, 1000);
    assert_eq!(config.jitter_us, 1000);
    assert_eq!(config.limit_pkts, 1);
    assert_eq!(config.loss_percent, 1.0);

    // Identical settings reuse the record
    setup
        .mgr
        .set_netem_qos(&pod, &iface_id, &NetemParams::new(1, 1, 1, 1.0))
        .await
        .unwrap();
    assert_eq!(setup.switch.count("qos"), 1);
    assert_eq!(setup.mgr.get_qos_list(&pod, &iface_id).await.unwrap(), vec![row.uuid.clone()]);

    // Different settings replace it
    setup
        .mgr
        .set_netem_qos(&pod, &iface_id, &NetemParams::new(50, 0, 1000, 0.0))
        .await
        .unwrap();
    assert_eq!(setup.switch.count("qos"), 1);
    let replaced = setup.verifier().assert_port_qos_type(&port, NETEM_QOS).unwrap();
    assert_ne!(replaced.uuid, row.uuid);
    let config = setup.mgr.get_netem_qos_config(&replaced.uuid).await.unwrap();
    assert_eq!(config.latency_us, 50_000);
    assert_eq!(config.limit_pkts, 1000);

    // All zero removes the emulation
    setup
        .mgr
        .set_netem_qos(&pod, &iface_id, &NetemParams::default())
        .await
        .unwrap();
    setup.verifier().assert_port_qos_cleared(&port).unwrap();
    assert_eq!(setup.switch.count("qos"), 0);
}

#[tokio::test]
async fn test_netem_refuses_htb_shaped_port() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let mut queue_map = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 0, 10, &mut queue_map)
        .await
        .unwrap();

    let err = setup
        .mgr
        .set_netem_qos(&setup.pod_ref(), &iface_id, &NetemParams::new(10, 0, 0, 0.0))
        .await
        .unwrap_err();
    assert!(matches!(err, OvsError::InconsistentState { .. }));
    setup
        .verifier()
        .assert_port_qos_type(&setup.pod.port_name(), HTB_QOS)
        .unwrap();
}

#[tokio::test]
async fn test_delete_netem_by_id_is_idempotent() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let pod = setup.pod_ref();

    setup
        .mgr
        .set_netem_qos(&pod, &iface_id, &NetemParams::new(10, 0, 0, 0.0))
        .await
        .unwrap();
    let qos = setup.mgr.get_qos_list(&pod, &iface_id).await.unwrap();
    assert_eq!(qos.len(), 1);

    setup.mgr.delete_netem_qos_by_id(&qos[0], &iface_id, &pod).await.unwrap();
    setup.mgr.delete_netem_qos_by_id(&qos[0], &iface_id, &pod).await.unwrap();

    assert_eq!(setup.switch.count("qos"), 0);
    setup
        .verifier()
        .assert_port_qos_cleared(&setup.pod.port_name())
        .unwrap();
}

#[tokio::test]
async fn test_clear_pod_bandwidth_removes_everything() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let pod = setup.pod_ref();
    let port = setup.pod.port_name();
    let mut queue_map = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&pod, &iface_id, 100, 200, &mut queue_map)
        .await
        .unwrap();

    setup.mgr.clear_pod_bandwidth(&pod, &iface_id).await.unwrap();

    let verifier = setup.verifier();
    verifier.assert_port_qos_cleared(&port).unwrap();
    verifier.assert_row_count("qos", 0).unwrap();
    verifier.assert_row_count("queue", 0).unwrap();
    verifier
        .assert_atom("interface", &port, "ingress_policing_rate", "0")
        .unwrap();
    verifier
        .assert_atom("interface", &port, "ingress_policing_burst", "0")
        .unwrap();

    // Clearing again finds nothing to do
    setup.mgr.clear_pod_bandwidth(&pod, &iface_id).await.unwrap();
}

#[tokio::test]
async fn test_clear_pod_bandwidth_by_pod_tag() {
    let setup = TestSetup::new();
    let pod = setup.pod_ref();
    let mut queue_map = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&pod, &setup.pod.iface_id(), 1, 1, &mut queue_map)
        .await
        .unwrap();

    setup.mgr.clear_pod_bandwidth(&pod, "").await.unwrap();

    setup.verifier().assert_port_qos_cleared(&setup.pod.port_name()).unwrap();
    assert_eq!(setup.switch.count("qos"), 0);
    assert_eq!(setup.switch.count("queue"), 0);
}

#[tokio::test]
async fn test_queue_map_seeded_from_switch() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let mut first = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 0, 10, &mut first)
        .await
        .unwrap();

    // A fresh process rebuilds the map and keeps the same queue
    let mut seeded = setup.mgr.queue_iface_map().await.unwrap();
    assert_eq!(seeded, first);
    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 0, 30, &mut seeded)
        .await
        .unwrap();
    assert_eq!(setup.switch.count("queue"), 1);
    assert_eq!(setup.switch.count("qos"), 1);

    let qos_queues = setup.mgr.list_qos_queue_ids().await.unwrap();
    assert_eq!(qos_queues.len(), 1);
    assert_eq!(qos_queues.values().next(), first.get(&iface_id));
}

#[tokio::test]
async fn test_rebinding_with_lost_map_replaces_queue() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let port = setup.pod.port_name();
    let mut first = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 0, 10, &mut first)
        .await
        .unwrap();
    let old = first.get(&iface_id).cloned().unwrap();

    // The caller forgot its map: a fresh queue is created and must take over
    let mut fresh = QueueIfaceMap::new();
    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 0, 50, &mut fresh)
        .await
        .unwrap();
    let new = fresh.get(&iface_id).cloned().unwrap();
    assert_ne!(old, new);

    let verifier = setup.verifier();
    let qos = verifier.assert_port_qos_type(&port, HTB_QOS).unwrap();
    let queues = qos.map("queues");
    assert_eq!(queues.len(), 1);
    assert_eq!(queues.get("0"), Some(&new));
    verifier.assert_row_count("qos", 1).unwrap();
    verifier.assert_row_count("queue", 1).unwrap();
    assert!(setup.switch.row("queue", &old).is_none());
    verifier
        .assert_map_value("queue", &new, "other_config", "max-rate", "50000000")
        .unwrap();
    verifier.assert_no_orphans().unwrap();

    // A rebuilt map now points at the surviving queue
    let seeded = setup.mgr.queue_iface_map().await.unwrap();
    assert_eq!(seeded.get(&iface_id), Some(&new));
}

#[tokio::test]
async fn test_queue_map_ignores_unbound_duplicate() {
    let setup = TestSetup::new();
    let iface_id = setup.pod.iface_id();
    let mut queue_map = QueueIfaceMap::new();

    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 0, 10, &mut queue_map)
        .await
        .unwrap();
    let live = queue_map.get(&iface_id).cloned().unwrap();

    // A queue created for the same interface but never bound
    let mut abandoned = QueueIfaceMap::new();
    setup
        .mgr
        .set_htb_qos_queue_record(
            &setup.pod_ref(),
            &iface_id,
            &HtbQueueParams::max_rate(99_000_000),
            &mut abandoned,
        )
        .await
        .unwrap();
    assert_eq!(setup.switch.count("queue"), 2);

    let mut seeded = setup.mgr.queue_iface_map().await.unwrap();
    assert_eq!(seeded.get(&iface_id), Some(&live));

    setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &iface_id, 0, 20, &mut seeded)
        .await
        .unwrap();
    setup
        .verifier()
        .assert_map_value("queue", &live, "other_config", "max-rate", "20000000")
        .unwrap();
    let qos = setup
        .verifier()
        .assert_port_qos_type(&setup.pod.port_name(), HTB_QOS)
        .unwrap();
    assert_eq!(qos.map("queues").get("0"), Some(&live));
    assert_eq!(qos.map("queues").len(), 1);
}

#[tokio::test]
async fn test_failed_command_surfaces_error() {
    let setup = TestSetup::new();
    let mut queue_map = QueueIfaceMap::new();
    setup.switch.fail_command("create", 1);

    let err = setup
        .mgr
        .set_interface_bandwidth(&setup.pod_ref(), &setup.pod.iface_id(), 0, 10, &mut queue_map)
        .await
        .unwrap_err();

    assert!(matches!(err, OvsError::CommandFailed { .. }));
    assert!(queue_map.is_empty());
    assert_eq!(setup.switch.count("queue"), 0);
}
