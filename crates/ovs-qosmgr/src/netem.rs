//! Network emulation: one `linux-netem` QoS record per interface.

use tracing::{debug, info, instrument};

use ovs_vsctl::{parse_map, Column, Field, Lookup, OvsError, OvsResult, Table};

use crate::qos_mgr::QosMgr;
use crate::tables::{columns, HTB_QOS, NETEM_QOS};
use crate::types::{owner_fields, NetemConfig, NetemParams, PodRef, QosKind};

impl QosMgr {
    /// Applies `params` to every interface carrying `iface_id`.
    ///
    /// An existing netem record with identical settings is reused; stale ones
    /// are deleted. All-zero parameters remove the emulation.
    #[instrument(skip(self))]
    pub async fn set_netem_qos(
        &self,
        pod: &PodRef,
        iface_id: &str,
        params: &NetemParams,
    ) -> OvsResult<()> {
        let desired = params.to_config();

        for port in self.interface_names(iface_id).await? {
            let netem = self.qos_of_kind(pod, iface_id, QosKind::Netem).await?;

            if !params.is_active() {
                for qos in netem {
                    self.delete_netem_qos_by_id(&qos, iface_id, pod).await?;
                }
                continue;
            }

            if let Some(current) = self.port_qos(&port).await? {
                if self.qos_kind(&current).await?.found() == Some(QosKind::Htb) {
                    return Err(OvsError::inconsistent(&port, NETEM_QOS, HTB_QOS));
                }
            }

            let mut reuse = None;
            for qos in netem {
                let matches = match self.get_netem_qos_config(&qos).await {
                    Ok(config) => config == desired,
                    Err(OvsError::MalformedOutput { .. }) => false,
                    Err(e) => return Err(e),
                };
                if matches && reuse.is_none() {
                    reuse = Some(qos);
                } else {
                    info!(qos = %qos, "Replacing netem QoS with different settings");
                    self.delete_netem_qos_by_id(&qos, iface_id, pod).await?;
                }
            }

            let qos = match reuse {
                Some(qos) => {
                    debug!(qos = %qos, "Reusing netem QoS");
                    qos
                }
                None => {
                    let mut fields = vec![Field::new(columns::TYPE, NETEM_QOS)];
                    fields.extend(desired.fields());
                    fields.extend(owner_fields(pod, iface_id));
                    let qos = self.vsctl.create(Table::Qos, &fields).await?;
                    info!(
                        qos = %qos,
                        latency_us = desired.latency_us,
                        jitter_us = desired.jitter_us,
                        limit = desired.limit_pkts,
                        loss = desired.loss_percent,
                        "Created netem QoS"
                    );
                    qos
                }
            };
            self.vsctl
                .set_ref(Table::Port, &port, columns::QOS, &qos)
                .await?;
        }
        Ok(())
    }

    /// Reads the emulation settings of a netem QoS record.
    #[instrument(skip(self))]
    pub async fn get_netem_qos_config(&self, qos_id: &str) -> OvsResult<NetemConfig> {
        let raw = self
            .vsctl
            .get(Table::Qos, qos_id, &Column::new(columns::OTHER_CONFIG))
            .await?
            .required(Table::Qos, qos_id)?;
        let command = format!("get qos {} other_config", qos_id);

        let map = parse_map(&raw)
            .ok_or_else(|| OvsError::malformed(command.clone(), raw.clone(), "not a map"))?;
        NetemConfig::from_other_config(&map)
            .map_err(|reason| OvsError::malformed(command, raw, reason))
    }

    /// Unbinds and destroys a netem QoS record. An absent record is success;
    /// a record of another discipline is left alone and reported.
    #[instrument(skip(self))]
    pub async fn delete_netem_qos_by_id(
        &self,
        qos_id: &str,
        iface_id: &str,
        pod: &PodRef,
    ) -> OvsResult<()> {
        match self.qos_kind(qos_id).await? {
            Lookup::NotFound => return Ok(()),
            Lookup::Found(QosKind::Netem) => {}
            Lookup::Found(other) => {
                return Err(OvsError::inconsistent(iface_id, NETEM_QOS, other.as_str()))
            }
        }
        self.release_port_qos(qos_id).await?;
        self.vsctl.destroy(Table::Qos, qos_id).await?;
        info!(qos = %qos_id, "Destroyed netem QoS");
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

    #[tokio::test]
    async fn test_netem_round_trip() {
        let (switch, mgr, pod, pod_ref) = setup();
        mgr.set_netem_qos(&pod_ref, &pod.iface_id(), &NetemParams::new(1, 1, 1, 1.0))
            .await
            .unwrap();

        let list = mgr.get_qos_list(&pod_ref, &pod.iface_id()).await.unwrap();
        assert_eq!(list.len(), 1);

        let config = mgr.get_netem_qos_config(&list[0]).await.unwrap();
        assert_eq!(config.latency_us, 1000);
        assert_eq!(config.jitter_us, 1000);
        assert_eq!(config.limit_pkts, 1);
        assert_eq!(config.loss_percent, 1.0);

        SwitchVerifier::new(&switch)
            .assert_port_qos_type(&pod.port_name(), NETEM_QOS)
            .unwrap();
    }

    #[tokio::test]
    async fn test_identical_settings_are_reused() {
        let (switch, mgr, pod, pod_ref) = setup();
        let params = NetemParams::new(50, 5, 1000, 0.5);

        mgr.set_netem_qos(&pod_ref, &pod.iface_id(), &params).await.unwrap();
        let first = mgr.get_qos_list(&pod_ref, &pod.iface_id()).await.unwrap();
        mgr.set_netem_qos(&pod_ref, &pod.iface_id(), &params).await.unwrap();
        let second = mgr.get_qos_list(&pod_ref, &pod.iface_id()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(switch.count_calls("create"), 1);
    }

    #[tokio::test]
    async fn test_changed_settings_replace_record() {
        let (switch, mgr, pod, pod_ref) = setup();
        mgr.set_netem_qos(&pod_ref, &pod.iface_id(), &NetemParams::new(10, 0, 0, 0.0))
            .await
            .unwrap();
        mgr.set_netem_qos(&pod_ref, &pod.iface_id(), &NetemParams::new(20, 0, 0, 0.0))
            .await
            .unwrap();

        let list = mgr.get_qos_list(&pod_ref, &pod.iface_id()).await.unwrap();
        assert_eq!(list.len(), 1);
        let config = mgr.get_netem_qos_config(&list[0]).await.unwrap();
        assert_eq!(config.latency_us, 20_000);
        SwitchVerifier::new(&switch).assert_no_orphans().unwrap();
    }

    #[tokio::test]
    async fn test_zero_params_remove_netem() {
        let (switch, mgr, pod, pod_ref) = setup();
        mgr.set_netem_qos(&pod_ref, &pod.iface_id(), &NetemParams::new(10, 0, 0, 0.0))
            .await
            .unwrap();
        mgr.set_netem_qos(&pod_ref, &pod.iface_id(), &NetemParams::default())
            .await
            .unwrap();

        assert!(mgr.get_qos_list(&pod_ref, &pod.iface_id()).await.unwrap().is_empty());
        SwitchVerifier::new(&switch)
            .assert_port_qos_cleared(&pod.port_name())
            .unwrap();
    }

    #[tokio::test]
    async fn test_netem_on_htb_port_is_inconsistent() {
        let (switch, mgr, pod, pod_ref) = setup();
        let htb = switch.apply(&["create", "qos", "type=linux-htb"]).unwrap();
        switch
            .apply(&["set", "port", &pod.port_name(), &format!("qos={}", htb)])
            .unwrap();

        let err = mgr
            .set_netem_qos(&pod_ref, &pod.iface_id(), &NetemParams::new(10, 0, 0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, OvsError::InconsistentState { .. }));
    }

    #[tokio::test]
    async fn test_get_netem_config_errors() {
        let (switch, mgr, _, _) = setup();
        let err = mgr
            .get_netem_qos_config("00000000-0000-0000-0000-000000000000")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let partial = switch
            .apply(&["create", "qos", "type=linux-netem", "other_config:latency=1000"])
            .unwrap();
        let err = mgr.get_netem_qos_config(&partial).await.unwrap_err();
        assert!(matches!(err, OvsError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn test_delete_netem_by_id() {
        let (switch, mgr, pod, pod_ref) = setup();
        mgr.set_netem_qos(&pod_ref, &pod.iface_id(), &NetemParams::new(10, 0, 0, 0.0))
            .await
            .unwrap();
        let qos = mgr.get_qos_list(&pod_ref, &pod.iface_id()).await.unwrap().remove(0);

        mgr.delete_netem_qos_by_id(&qos, &pod.iface_id(), &pod_ref)
            .await
            .unwrap();
        assert_eq!(switch.count("qos"), 0);
        SwitchVerifier::new(&switch)
            .assert_port_qos_cleared(&pod.port_name())
            .unwrap();

        // Absent record is success.
        mgr.delete_netem_qos_by_id(&qos, &pod.iface_id(), &pod_ref)
            .await
            .unwrap();

        let htb = switch.apply(&["create", "qos", "type=linux-htb"]).unwrap();
        let err = mgr
            .delete_netem_qos_by_id(&htb, &pod.iface_id(), &pod_ref)
            .await
            .unwrap_err();
        assert!(matches!(err, OvsError::InconsistentState { .. }));
        assert_eq!(switch.count("qos"), 1);
    }
}
