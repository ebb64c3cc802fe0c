//! Cleanup of switch records whose owner is gone or duplicated.

use std::collections::{BTreeMap, HashSet};

use tracing::{info, instrument, warn};

use ovs_vsctl::{parse_map, unquote, Column, Condition, Field, OvsError, OvsResult, Table};

use crate::lister::PodLister;
use crate::qos_mgr::QosMgr;
use crate::tables::{columns, external_ids, INTERNAL_IFACE_TYPE, NO_SUCH_DEVICE};
use crate::types::PodRef;

fn external_ids_of(command: &str, raw: &str) -> OvsResult<BTreeMap<String, String>> {
    parse_map(raw).ok_or_else(|| OvsError::malformed(command, raw, "external_ids is not a map"))
}

impl QosMgr {
    /// Internal interfaces with their external_ids.
    async fn internal_ports(&self) -> OvsResult<Vec<(String, BTreeMap<String, String>)>> {
        let records = self
            .vsctl
            .find_columns(
                Table::Interface,
                &[columns::NAME, columns::EXTERNAL_IDS],
                &[Condition::eq(columns::TYPE, INTERNAL_IFACE_TYPE)],
            )
            .await?;
        records
            .into_iter()
            .map(|record| {
                let ids = external_ids_of("find interface type=internal", &record[1])?;
                Ok((unquote(&record[0]), ids))
            })
            .collect()
    }

    /// Internal ports tagged with a pod but no longer bound to a logical
    /// switch port (no iface-id).
    #[instrument(skip(self))]
    pub async fn get_residual_internal_ports(&self) -> OvsResult<Vec<String>> {
        Ok(self
            .internal_ports()
            .await?
            .into_iter()
            .filter(|(_, ids)| {
                ids.contains_key(external_ids::POD_NAME) && !ids.contains_key(external_ids::IFACE_ID)
            })
            .map(|(name, _)| name)
            .collect())
    }

    /// Like [`QosMgr::get_residual_internal_ports`], additionally reporting
    /// internal ports whose pod is no longer known to `lister`.
    #[instrument(skip(self, lister))]
    pub async fn get_residual_internal_ports_with(
        &self,
        lister: &dyn PodLister,
    ) -> OvsResult<Vec<String>> {
        let mut residual = Vec::new();
        for (name, ids) in self.internal_ports().await? {
            let Some(pod_name) = ids.get(external_ids::POD_NAME) else {
                continue;
            };
            if !ids.contains_key(external_ids::IFACE_ID) {
                residual.push(name);
                continue;
            }
            let namespace = ids
                .get(external_ids::POD_NAMESPACE)
                .map(String::as_str)
                .unwrap_or_default();
            if !namespace.is_empty() && lister.get(namespace, pod_name)?.is_none() {
                residual.push(name);
            }
        }
        Ok(residual)
    }

    /// Deletes pod interfaces whose kernel device has disappeared
    /// (`ofport=-1`, "No such device"), together with their QoS records.
    /// Returns the deleted interface names.
    #[instrument(skip(self))]
    pub async fn clean_lost_interface(&self) -> OvsResult<Vec<String>> {
        let records = self
            .vsctl
            .find_columns(
                Table::Interface,
                &[columns::NAME, columns::ERROR],
                &[
                    Condition::eq(columns::OFPORT, -1i64),
                    Condition::present(Column::key(columns::EXTERNAL_IDS, external_ids::POD_NETNS)),
                ],
            )
            .await?;

        let mut removed = Vec::new();
        for record in records {
            let name = unquote(&record[0]);
            let error = unquote(&record[1]);
            if !error.contains(NO_SUCH_DEVICE) {
                continue;
            }

            let qos = self.port_qos(&name).await?;
            warn!(interface = %name, error = %error, "Deleting lost interface");
            self.vsctl
                .del_port(Some(self.switch.integration_bridge.as_str()), &name)
                .await?;
            if let Some(qos) = qos {
                self.destroy_qos(&qos, None).await?;
            }
            removed.push(name);
        }
        Ok(removed)
    }

    /// Keeps one interface per iface-id: `port_name` when present, otherwise
    /// the first one attached to the datapath. Returns the deleted names.
    #[instrument(skip(self))]
    pub async fn clean_duplicate_port(
        &self,
        iface_id: &str,
        port_name: &str,
    ) -> OvsResult<Vec<String>> {
        let records = self
            .vsctl
            .find_columns(
                Table::Interface,
                &[columns::NAME, columns::OFPORT],
                &[Self::iface_id_condition(iface_id)],
            )
            .await?;
        if records.len() <= 1 {
            return Ok(Vec::new());
        }

        let candidates: Vec<(String, i64)> = records
            .iter()
            .map(|r| (unquote(&r[0]), unquote(&r[1]).parse().unwrap_or(-1)))
            .collect();
        let keep = candidates
            .iter()
            .find(|(name, _)| name == port_name)
            .or_else(|| candidates.iter().find(|(_, ofport)| *ofport > 0))
            .unwrap_or(&candidates[0])
            .0
            .clone();

        let mut removed = Vec::new();
        for (name, _) in candidates.into_iter().filter(|(name, _)| *name != keep) {
            warn!(interface = %name, kept = %keep, iface_id = %iface_id, "Deleting duplicate port");
            self.vsctl.del_port(None, &name).await?;
            removed.push(name);
        }
        Ok(removed)
    }

    /// Clears the `qos` column of every port carrying `iface_id`.
    #[instrument(skip(self))]
    pub async fn clear_port_qos_binding(&self, iface_id: &str) -> OvsResult<()> {
        for port in self.interface_names(iface_id).await? {
            self.vsctl.clear(Table::Port, &port, &[columns::QOS]).await?;
        }
        Ok(())
    }

    /// Removes every bandwidth and emulation setting of the interface: ingress
    /// policing, the port binding, the QoS records and their queues.
    ///
    /// With an empty `iface_id` the pod's interfaces and records are used.
    #[instrument(skip(self))]
    pub async fn clear_pod_bandwidth(&self, pod: &PodRef, iface_id: &str) -> OvsResult<()> {
        let ports = if !iface_id.is_empty() {
            self.interface_names(iface_id).await?
        } else if pod.is_set() {
            self.vsctl
                .find(
                    Table::Interface,
                    columns::NAME,
                    &[
                        Condition::eq(
                            Column::key(columns::EXTERNAL_IDS, external_ids::POD_NAME),
                            pod.name.as_str(),
                        ),
                        Condition::eq(
                            Column::key(columns::EXTERNAL_IDS, external_ids::POD_NAMESPACE),
                            pod.namespace.as_str(),
                        ),
                    ],
                )
                .await?
        } else {
            return Ok(());
        };

        for port in &ports {
            self.vsctl
                .set(
                    Table::Interface,
                    port,
                    &[
                        Field::new(columns::INGRESS_POLICING_RATE, 0i64),
                        Field::new(columns::INGRESS_POLICING_BURST, 0i64),
                    ],
                )
                .await?;
            self.vsctl.clear(Table::Port, port, &[columns::QOS]).await?;
        }

        for qos in self.get_qos_list(pod, iface_id).await? {
            self.destroy_qos(&qos, None).await?;
            info!(qos = %qos, "Destroyed QoS");
        }
        self.clear_htb_qos_queue(pod, iface_id).await
    }

    /// Destroys QoS and queue records tagged with an iface-id that no
    /// interface carries any more. Returns the destroyed QoS handles.
    #[instrument(skip(self))]
    pub async fn clean_orphan_qos(&self) -> OvsResult<Vec<String>> {
        let live: HashSet<String> = self
            .list_external_ids(Table::Interface)
            .await?
            .into_keys()
            .collect();
        let owned = [Condition::present(Column::key(
            columns::EXTERNAL_IDS,
            external_ids::IFACE_ID,
        ))];
        let dead_owner = |raw: &str, command: &str| -> OvsResult<bool> {
            let ids = external_ids_of(command, raw)?;
            Ok(ids
                .get(external_ids::IFACE_ID)
                .is_some_and(|id| !live.contains(id)))
        };

        let mut destroyed = Vec::new();
        for record in self
            .vsctl
            .find_columns(Table::Qos, &[columns::UUID, columns::EXTERNAL_IDS], &owned)
            .await?
        {
            if dead_owner(&record[1], "find qos external_ids")? {
                self.destroy_qos(&record[0], None).await?;
                info!(qos = %record[0], "Destroyed orphan QoS");
                destroyed.push(record[0].clone());
            }
        }

        let bound = self.bound_queues().await?;
        for record in self
            .vsctl
            .find_columns(Table::Queue, &[columns::UUID, columns::EXTERNAL_IDS], &owned)
            .await?
        {
            if !bound.contains(&record[0]) && dead_owner(&record[1], "find queue external_ids")? {
                self.vsctl.destroy(Table::Queue, &record[0]).await?;
                info!(queue = %record[0], "Destroyed orphan queue");
            }
        }
        Ok(destroyed)
    }
}
