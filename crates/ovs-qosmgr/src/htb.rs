//! HTB egress shaping: one queue record per interface, bound into the
//! interface's `linux-htb` QoS record.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use ovs_vsctl::{Atom, Field, OvsError, OvsResult, Table};

use crate::qos_mgr::QosMgr;
use crate::tables::{columns, HTB_QOS};
use crate::types::{owner_fields, HtbQueueParams, PodRef, QosKind, QueueIfaceMap};

/// Smallest queue id not present in `queues`.
pub fn next_queue_id(queues: &BTreeMap<u32, String>) -> u32 {
    let mut next = 0;
    for id in queues.keys() {
        if *id != next {
            break;
        }
        next += 1;
    }
    next
}

impl QosMgr {
    /// Updates the interface's queue record in place, or creates it when the
    /// map has no entry for `iface_id`. Returns the queue handle.
    #[instrument(skip(self, queue_map))]
    pub async fn set_htb_qos_queue_record(
        &self,
        pod: &PodRef,
        iface_id: &str,
        params: &HtbQueueParams,
        queue_map: &mut QueueIfaceMap,
    ) -> OvsResult<String> {
        let mut fields = params.fields();

        if let Some(queue) = queue_map.get(iface_id) {
            self.vsctl.set(Table::Queue, queue, &fields).await?;
            debug!(queue = %queue, "Updated HTB queue");
            return Ok(queue.clone());
        }

        fields.extend(owner_fields(pod, iface_id));
        let queue = self.vsctl.create(Table::Queue, &fields).await?;
        info!(queue = %queue, max_rate = params.max_rate_bps, "Created HTB queue");
        queue_map.insert(iface_id.to_string(), queue.clone());
        Ok(queue)
    }

    /// Binds `queue` into the interface's HTB QoS record and points
    /// `port_name` at that record. Returns the QoS handle.
    ///
    /// The queue must be the map's entry for `iface_id`. Any other queue
    /// still bound in the record is unbound and destroyed, and duplicate HTB
    /// records for the interface are collapsed onto the first one.
    #[instrument(skip(self, queue_map))]
    pub async fn set_qos_queue_binding(
        &self,
        pod: &PodRef,
        port_name: &str,
        iface_id: &str,
        queue: &str,
        queue_map: &QueueIfaceMap,
    ) -> OvsResult<String> {
        if queue_map.get(iface_id).map(String::as_str) != Some(queue) {
            return Err(OvsError::UnknownQueue {
                iface: iface_id.to_string(),
                queue: queue.to_string(),
            });
        }

        if let Some(current) = self.port_qos(port_name).await? {
            if let Some(kind) = self.qos_kind(&current).await?.found() {
                if kind != QosKind::Htb {
                    return Err(OvsError::inconsistent(port_name, HTB_QOS, kind.as_str()));
                }
            }
        }

        let mut existing = self.qos_of_kind(pod, iface_id, QosKind::Htb).await?;
        let mut replaced = Vec::new();
        let qos = if existing.is_empty() {
            let mut fields = vec![
                Field::new(columns::TYPE, HTB_QOS),
                Field::map_entry(columns::QUEUES, "0", Atom::uuid(queue)),
            ];
            fields.extend(owner_fields(pod, iface_id));
            let qos = self.vsctl.create(Table::Qos, &fields).await?;
            info!(qos = %qos, "Created HTB QoS");
            qos
        } else {
            let qos = existing.remove(0);
            replaced = self.rebind_queue(&qos, queue).await?;
            qos
        };

        self.vsctl
            .set_ref(Table::Port, port_name, columns::QOS, &qos)
            .await?;

        for duplicate in existing {
            warn!(qos = %duplicate, kept = %qos, "Removing duplicate HTB QoS");
            self.destroy_qos(&duplicate, Some(queue)).await?;
        }
        self.destroy_unbound_queues(&replaced).await?;
        Ok(qos)
    }

    /// Leaves `queue` as the only queue bound in `qos`. When it is not bound
    /// yet it takes the smallest id free once the other entries are dropped.
    /// Returns the handles of the queues that were unbound.
    async fn rebind_queue(&self, qos: &str, queue: &str) -> OvsResult<Vec<String>> {
        let (kept, stale): (BTreeMap<u32, String>, BTreeMap<u32, String>) = self
            .qos_queues(qos)
            .await?
            .into_iter()
            .partition(|(_, bound)| bound == queue);
        if !kept.is_empty() && stale.is_empty() {
            return Ok(Vec::new());
        }

        let mut stale_ids: Vec<u32> = stale.keys().copied().collect();
        if kept.is_empty() {
            let id = next_queue_id(&kept);
            self.vsctl
                .set_field(
                    Table::Qos,
                    qos,
                    Field::map_entry(columns::QUEUES, id.to_string(), Atom::uuid(queue)),
                )
                .await?;
            stale_ids.retain(|stale| *stale != id);
            debug!(qos = %qos, queue = %queue, id, "Bound queue");
        }
        let stale_ids: Vec<String> = stale_ids.iter().map(u32::to_string).collect();
        self.vsctl
            .remove(Table::Qos, qos, columns::QUEUES, &stale_ids)
            .await?;

        if !stale.is_empty() {
            info!(qos = %qos, queue = %queue, "Corrected stale HTB queue binding");
        }
        Ok(stale.into_values().collect())
    }

    /// Destroys the given queue records unless some QoS record still binds
    /// them.
    async fn destroy_unbound_queues(&self, queues: &[String]) -> OvsResult<()> {
        if queues.is_empty() {
            return Ok(());
        }
        let still_bound = self.bound_queues().await?;
        for stale in queues.iter().filter(|q| !still_bound.contains(*q)) {
            self.vsctl.destroy(Table::Queue, stale).await?;
            debug!(queue = %stale, "Destroyed replaced HTB queue");
        }
        Ok(())
    }

    /// True when an HTB QoS record exists for the interface.
    #[instrument(skip(self))]
    pub async fn is_htb_qos(&self, iface_id: &str) -> OvsResult<bool> {
        let kinds = self
            .vsctl
            .find(Table::Qos, columns::TYPE, &[Self::iface_id_condition(iface_id)])
            .await?;
        Ok(kinds.iter().any(|kind| kind == HTB_QOS))
    }

    /// Rewrites stale `queues` maps of the interface's HTB records so that
    /// only the queue known to `queue_map` stays bound.
    #[instrument(skip(self, queue_map))]
    pub async fn check_and_update_htb_qos(
        &self,
        pod: &PodRef,
        iface_id: &str,
        queue_map: &QueueIfaceMap,
    ) -> OvsResult<()> {
        let Some(queue) = queue_map.get(iface_id) else {
            return Ok(());
        };

        let mut replaced = Vec::new();
        for qos in self.qos_of_kind(pod, iface_id, QosKind::Htb).await? {
            replaced.extend(self.rebind_queue(&qos, queue).await?);
        }
        self.destroy_unbound_queues(&replaced).await
    }

    /// Removes the interface's queues from its HTB records, destroys records
    /// left without queues and then the queue records themselves.
    #[instrument(skip(self))]
    pub async fn clear_htb_qos_queue(&self, pod: &PodRef, iface_id: &str) -> OvsResult<()> {
        let Some(owner) = Self::owner_condition(pod, iface_id) else {
            return Ok(());
        };
        let queues = self
            .vsctl
            .find(Table::Queue, columns::UUID, std::slice::from_ref(&owner))
            .await?;

        for qos in self.qos_of_kind(pod, iface_id, QosKind::Htb).await? {
            let bound = self.qos_queues(&qos).await?;
            let ids: Vec<String> = bound
                .iter()
                .filter(|(_, q)| queues.contains(q))
                .map(|(id, _)| id.to_string())
                .collect();
            if ids.len() < bound.len() {
                self.vsctl
                    .remove(Table::Qos, &qos, columns::QUEUES, &ids)
                    .await?;
                continue;
            }
            self.release_port_qos(&qos).await?;
            self.vsctl.destroy(Table::Qos, &qos).await?;
            info!(qos = %qos, "Destroyed HTB QoS");
        }

        // Queues still bound into untagged QoS records would fail to destroy.
        let still_bound = self.bound_queues().await?;
        for queue in queues.iter().filter(|q| !still_bound.contains(*q)) {
            self.vsctl.destroy(Table::Queue, queue).await?;
            debug!(queue = %queue, "Destroyed HTB queue");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwitchConfig;
    use ovs_qos_test::{FakeVswitchd, PodFixture, SwitchVerifier, TEST_BRIDGE};
    use ovs_vsctl::Vsctl;
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    fn setup() -> (Arc<FakeVswitchd>, QosMgr, PodFixture, PodRef) {
        let switch = FakeVswitchd::with_bridge(TEST_BRIDGE);
        let pod = PodFixture::new("web-0", "default");
        switch.add_port(TEST_BRIDGE, &pod.port_spec());
        let vsctl = Vsctl::new(switch.clone(), NonZeroUsize::new(8).unwrap());
        let mgr = QosMgr::new(vsctl, SwitchConfig::default());
        let pod_ref = PodRef::new(&pod.name, &pod.namespace);
        (switch, mgr, pod, pod_ref)
    }

    #[test]
    fn test_next_queue_id() {
        let mut queues = BTreeMap::new();
        assert_eq!(next_queue_id(&queues), 0);
        queues.insert(0, "a".to_string());
        queues.insert(1, "b".to_string());
        assert_eq!(next_queue_id(&queues), 2);
        queues.remove(&0);
        assert_eq!(next_queue_id(&queues), 0);
        queues.insert(0, "a".to_string());
        queues.insert(3, "c".to_string());
        assert_eq!(next_queue_id(&queues), 2);
    }

    #[tokio::test]
    async fn test_queue_record_is_created_once() {
        let (switch, mgr, pod, pod_ref) = setup();
        let mut map = QueueIfaceMap::new();
        let params = HtbQueueParams::max_rate(10_000_000);

        let first = mgr
            .set_htb_qos_queue_record(&pod_ref, &pod.iface_id(), &params, &mut map)
            .await
            .unwrap();
        let second = mgr
            .set_htb_qos_queue_record(
                &pod_ref,
                &pod.iface_id(),
                &HtbQueueParams::max_rate(20_000_000),
                &mut map,
            )
            .await
            .unwrap();

        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_eq!(switch.count("queue"), 1);
        SwitchVerifier::new(&switch)
            .assert_map_value("queue", &first, "other_config", "max-rate", "20000000")
            .unwrap();
        SwitchVerifier::new(&switch)
            .assert_map_value("queue", &first, "external_ids", "pod", "default/web-0")
            .unwrap();
    }

    #[tokio::test]
    async fn test_binding_unknown_queue_fails() {
        let (switch, mgr, pod, pod_ref) = setup();
        let mut map = QueueIfaceMap::new();
        let queue = mgr
            .set_htb_qos_queue_record(
                &pod_ref,
                &pod.iface_id(),
                &HtbQueueParams::max_rate(1_000_000),
                &mut map,
            )
            .await
            .unwrap();

        let err = mgr
            .set_qos_queue_binding(&pod_ref, &pod.port_name(), &pod.iface_id(), &queue, &QueueIfaceMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OvsError::UnknownQueue { .. }));

        let err = mgr
            .set_qos_queue_binding(&pod_ref, &pod.port_name(), &pod.iface_id(), "bogus", &map)
            .await
            .unwrap_err();
        assert!(matches!(err, OvsError::UnknownQueue { .. }));
        assert_eq!(switch.count("qos"), 0);
    }

    #[tokio::test]
    async fn test_binding_creates_htb_qos() {
        let (switch, mgr, pod, pod_ref) = setup();
        let mut map = QueueIfaceMap::new();
        let queue = mgr
            .set_htb_qos_queue_record(
                &pod_ref,
                &pod.iface_id(),
                &HtbQueueParams::max_rate(1_000_000),
                &mut map,
            )
            .await
            .unwrap();

        let qos = mgr
            .set_qos_queue_binding(&pod_ref, &pod.port_name(), &pod.iface_id(), &queue, &map)
            .await
            .unwrap();
        let again = mgr
            .set_qos_queue_binding(&pod_ref, &pod.port_name(), &pod.iface_id(), &queue, &map)
            .await
            .unwrap();

        assert_eq!(qos, again);
        let verifier = SwitchVerifier::new(&switch);
        let row = verifier.assert_port_qos_type(&pod.port_name(), HTB_QOS).unwrap();
        assert_eq!(row.map("queues").get("0"), Some(&queue));
        assert_eq!(row.map("queues").len(), 1);
        assert!(mgr.is_htb_qos(&pod.iface_id()).await.unwrap());
        verifier.assert_no_orphans().unwrap();
    }

    #[tokio::test]
    async fn test_binding_onto_netem_port_is_inconsistent() {
        let (switch, mgr, pod, pod_ref) = setup();
        let netem = switch.apply(&["create", "qos", "type=linux-netem"]).unwrap();
        switch
            .apply(&["set", "port", &pod.port_name(), &format!("qos={}", netem)])
            .unwrap();

        let mut map = QueueIfaceMap::new();
        let queue = mgr
            .set_htb_qos_queue_record(
                &pod_ref,
                &pod.iface_id(),
                &HtbQueueParams::max_rate(1_000_000),
                &mut map,
            )
            .await
            .unwrap();
        let err = mgr
            .set_qos_queue_binding(&pod_ref, &pod.port_name(), &pod.iface_id(), &queue, &map)
            .await
            .unwrap_err();
        assert!(matches!(err, OvsError::InconsistentState { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_htb_records_collapse() {
        let (switch, mgr, pod, pod_ref) = setup();
        let iface = pod.iface_id();
        let stray_queue = switch.apply(&["create", "queue"]).unwrap();
        for queue in [None, Some(stray_queue.as_str())] {
            let mut args = vec![
                "create".to_string(),
                "qos".to_string(),
                "type=linux-htb".to_string(),
                format!("external_ids:iface-id={}", iface),
            ];
            if let Some(queue) = queue {
                args.push(format!("queues:0={}", queue));
            }
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            switch.apply(&args).unwrap();
        }
        assert_eq!(switch.count("qos"), 2);

        let mut map = QueueIfaceMap::new();
        let queue = mgr
            .set_htb_qos_queue_record(&pod_ref, &iface, &HtbQueueParams::max_rate(1_000_000), &mut map)
            .await
            .unwrap();
        mgr.set_qos_queue_binding(&pod_ref, &pod.port_name(), &iface, &queue, &map)
            .await
            .unwrap();

        assert_eq!(switch.count("qos"), 1);
        assert_eq!(switch.count("queue"), 1);
        SwitchVerifier::new(&switch).assert_no_orphans().unwrap();
    }

    #[tokio::test]
    async fn test_check_and_update_replaces_stale_queue() {
        let (switch, mgr, pod, pod_ref) = setup();
        let iface = pod.iface_id();
        let mut map = QueueIfaceMap::new();
        let old = mgr
            .set_htb_qos_queue_record(&pod_ref, &iface, &HtbQueueParams::max_rate(1_000_000), &mut map)
            .await
            .unwrap();
        let qos = mgr
            .set_qos_queue_binding(&pod_ref, &pod.port_name(), &iface, &old, &map)
            .await
            .unwrap();

        // The caller lost its map and created a fresh queue.
        let mut fresh_map = QueueIfaceMap::new();
        let fresh = mgr
            .set_htb_qos_queue_record(&pod_ref, &iface, &HtbQueueParams::max_rate(2_000_000), &mut fresh_map)
            .await
            .unwrap();
        assert_ne!(old, fresh);

        mgr.check_and_update_htb_qos(&pod_ref, &iface, &fresh_map)
            .await
            .unwrap();
        let queues = switch.row("qos", &qos).unwrap().map("queues");
        assert_eq!(queues.len(), 1);
        assert_eq!(queues.get("0"), Some(&fresh));
        assert!(switch.row("queue", &old).is_none());
        SwitchVerifier::new(&switch).assert_no_orphans().unwrap();

        // Already consistent: nothing is rewritten.
        switch.clear_calls();
        mgr.check_and_update_htb_qos(&pod_ref, &iface, &fresh_map)
            .await
            .unwrap();
        assert_eq!(switch.count_calls("set"), 0);
        assert_eq!(switch.count_calls("remove"), 0);
    }

    #[tokio::test]
    async fn test_clear_htb_qos_queue() {
        let (switch, mgr, pod, pod_ref) = setup();
        let iface = pod.iface_id();
        let mut map = QueueIfaceMap::new();
        let queue = mgr
            .set_htb_qos_queue_record(&pod_ref, &iface, &HtbQueueParams::max_rate(1_000_000), &mut map)
            .await
            .unwrap();
        mgr.set_qos_queue_binding(&pod_ref, &pod.port_name(), &iface, &queue, &map)
            .await
            .unwrap();

        mgr.clear_htb_qos_queue(&pod_ref, &iface).await.unwrap();

        assert!(!mgr.is_htb_qos(&iface).await.unwrap());
        let verifier = SwitchVerifier::new(&switch);
        verifier.assert_port_qos_cleared(&pod.port_name()).unwrap();
        verifier.assert_row_count("qos", 0).unwrap();
        verifier.assert_row_count("queue", 0).unwrap();

        // Clearing again is a no-op.
        mgr.clear_htb_qos_queue(&pod_ref, &iface).await.unwrap();
    }
}
