//! QosMgr: per-interface QoS state on the integration bridge.
//!
//! The operations are split by concern across `bandwidth`, `htb`, `netem`,
//! `housekeeping` and `inventory`; this module holds the manager itself and
//! the lookups they share.
//!
//! There is no per-interface lock. Every operation is a sequence of
//! lookup-or-create steps, each of them a single atomic command, so a
//! concurrent or repeated call converges on the same state.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, instrument};

use ovs_vsctl::{
    is_empty_datum, parse_map, Atom, Column, Condition, Lookup, OvsError, OvsResult, Table, Vsctl,
};

use crate::config::{QosMgrConfig, SwitchConfig};
use crate::tables::{columns, external_ids};
use crate::types::{PodRef, QosKind};

/// QoS reconciler for one switch.
#[derive(Debug, Clone)]
pub struct QosMgr {
    pub(crate) vsctl: Vsctl,
    pub(crate) switch: SwitchConfig,
}

impl QosMgr {
    /// Creates a manager over an existing executor.
    pub fn new(vsctl: Vsctl, switch: SwitchConfig) -> Self {
        Self { vsctl, switch }
    }

    /// Creates a manager spawning the tool described by `config`.
    pub fn from_config(config: &QosMgrConfig) -> OvsResult<Self> {
        Ok(Self::new(config.build_vsctl()?, config.switch.clone()))
    }

    pub fn vsctl(&self) -> &Vsctl {
        &self.vsctl
    }

    pub fn switch_config(&self) -> &SwitchConfig {
        &self.switch
    }

    /// Changes the command concurrency limit. Zero is rejected.
    pub fn update_limiter(&self, limit: usize) -> OvsResult<()> {
        self.vsctl.update_limiter(limit)
    }

    pub(crate) fn iface_id_condition(iface_id: &str) -> Condition {
        Condition::eq(
            Column::key(columns::EXTERNAL_IDS, external_ids::IFACE_ID),
            iface_id,
        )
    }

    /// Selects records owned by the iface-id, or by the pod when the iface-id
    /// is empty. `None` when neither is known.
    pub(crate) fn owner_condition(pod: &PodRef, iface_id: &str) -> Option<Condition> {
        if !iface_id.is_empty() {
            return Some(Self::iface_id_condition(iface_id));
        }
        pod.tag().map(|tag| {
            Condition::eq(Column::key(columns::EXTERNAL_IDS, external_ids::POD), tag)
        })
    }

    /// Names of the interfaces carrying `iface_id`. Each has a port of the
    /// same name.
    pub(crate) async fn interface_names(&self, iface_id: &str) -> OvsResult<Vec<String>> {
        self.vsctl
            .find(
                Table::Interface,
                columns::NAME,
                &[Self::iface_id_condition(iface_id)],
            )
            .await
    }

    /// Returns the handles of every QoS record owned by the interface, or by
    /// the pod when `iface_id` is empty.
    #[instrument(skip(self))]
    pub async fn get_qos_list(&self, pod: &PodRef, iface_id: &str) -> OvsResult<Vec<String>> {
        let Some(owner) = Self::owner_condition(pod, iface_id) else {
            return Ok(Vec::new());
        };
        self.vsctl.find(Table::Qos, columns::UUID, &[owner]).await
    }

    /// QoS handles of one discipline owned by the interface or pod.
    pub(crate) async fn qos_of_kind(
        &self,
        pod: &PodRef,
        iface_id: &str,
        kind: QosKind,
    ) -> OvsResult<Vec<String>> {
        let Some(owner) = Self::owner_condition(pod, iface_id) else {
            return Ok(Vec::new());
        };
        self.vsctl
            .find(
                Table::Qos,
                columns::UUID,
                &[owner, Condition::eq(columns::TYPE, kind.as_str())],
            )
            .await
    }

    pub(crate) async fn qos_kind(&self, qos: &str) -> OvsResult<Lookup<QosKind>> {
        Ok(self
            .vsctl
            .get(Table::Qos, qos, &Column::new(columns::TYPE))
            .await?
            .map(|kind| QosKind::from(kind.as_str())))
    }

    /// The QoS handle a port points at. An absent port has none.
    pub(crate) async fn port_qos(&self, port: &str) -> OvsResult<Option<String>> {
        let qos = self
            .vsctl
            .get(Table::Port, port, &Column::new(columns::QOS))
            .await?;
        Ok(qos.found().filter(|handle| !is_empty_datum(handle)))
    }

    /// The `queues` map of a QoS record, keyed by queue id. An absent record
    /// has no queues.
    pub(crate) async fn qos_queues(&self, qos: &str) -> OvsResult<BTreeMap<u32, String>> {
        let Lookup::Found(raw) = self
            .vsctl
            .get(Table::Qos, qos, &Column::new(columns::QUEUES))
            .await?
        else {
            return Ok(BTreeMap::new());
        };
        let command = format!("get qos {} queues", qos);
        let map = parse_map(&raw)
            .ok_or_else(|| OvsError::malformed(command.clone(), raw.clone(), "not a map"))?;

        map.into_iter()
            .map(|(id, queue)| {
                id.parse::<u32>()
                    .map(|id| (id, queue))
                    .map_err(|_| OvsError::malformed(command.clone(), raw.clone(), "queue id is not a number"))
            })
            .collect()
    }

    /// Every queue handle bound into any QoS record.
    pub(crate) async fn bound_queues(&self) -> OvsResult<HashSet<String>> {
        let records = self
            .vsctl
            .find_columns(Table::Qos, &[columns::QUEUES], &[])
            .await?;
        let mut bound = HashSet::new();
        for record in records {
            let map = parse_map(&record[0]).ok_or_else(|| {
                OvsError::malformed("find qos --columns=queues", record[0].clone(), "not a map")
            })?;
            bound.extend(map.into_values());
        }
        Ok(bound)
    }

    /// Clears the `qos` column of every port pointing at `qos`.
    pub(crate) async fn release_port_qos(&self, qos: &str) -> OvsResult<()> {
        let ports = self
            .vsctl
            .find(
                Table::Port,
                columns::NAME,
                &[Condition::eq(columns::QOS, Atom::uuid(qos))],
            )
            .await?;
        for port in ports {
            self.vsctl.clear(Table::Port, &port, &[columns::QOS]).await?;
            debug!(port = %port, qos = %qos, "Released port QoS binding");
        }
        Ok(())
    }

    /// Unbinds and destroys a QoS record together with its queues, except
    /// `keep`.
    pub(crate) async fn destroy_qos(&self, qos: &str, keep: Option<&str>) -> OvsResult<()> {
        let queues = self.qos_queues(qos).await?;
        self.release_port_qos(qos).await?;
        self.vsctl.destroy(Table::Qos, qos).await?;
        for queue in queues.values().filter(|q| Some(q.as_str()) != keep) {
            self.vsctl.destroy(Table::Queue, queue).await?;
        }
        Ok(())
    }
}
