//! Queries and small mutations on bridges, ports and mirrors.

use std::collections::HashMap;

use tracing::{debug, instrument};

use ovs_vsctl::{parse_map, Column, Condition, Field, Lookup, OvsError, OvsResult, Table};

use crate::qos_mgr::QosMgr;
use crate::tables::{columns, external_ids, HTB_QOS, NETDEV_DATAPATH};
use crate::types::QueueIfaceMap;

/// Highest valid 802.1Q VLAN id.
pub const MAX_VLAN_TAG: u16 = 4095;

impl QosMgr {
    /// Bridges tagged with the configured vendor.
    pub async fn bridges(&self) -> OvsResult<Vec<String>> {
        self.vsctl
            .find(
                Table::Bridge,
                columns::NAME,
                &[Condition::eq(
                    Column::key(columns::EXTERNAL_IDS, external_ids::VENDOR),
                    self.switch.vendor.as_str(),
                )],
            )
            .await
    }

    pub async fn bridge_exists(&self, name: &str) -> OvsResult<bool> {
        Ok(self.bridges().await?.iter().any(|bridge| bridge == name))
    }

    pub async fn port_exists(&self, name: &str) -> OvsResult<bool> {
        let ports = self
            .vsctl
            .find(Table::Port, columns::NAME, &[Condition::eq(columns::NAME, name)])
            .await?;
        Ok(!ports.is_empty())
    }

    /// True when the integration bridge runs in the userspace (netdev)
    /// datapath.
    pub async fn is_userspace_datapath(&self) -> OvsResult<bool> {
        let types = self
            .vsctl
            .find(
                Table::Bridge,
                columns::DATAPATH_TYPE,
                &[Condition::eq(
                    columns::NAME,
                    self.switch.integration_bridge.as_str(),
                )],
            )
            .await?;
        Ok(types.first().map(String::as_str) == Some(NETDEV_DATAPATH))
    }

    /// Sets the access VLAN of a port.
    #[instrument(skip(self))]
    pub async fn set_port_tag(&self, port: &str, tag: u16) -> OvsResult<()> {
        if tag > MAX_VLAN_TAG {
            return Err(OvsError::invalid_config(
                "tag",
                format!("VLAN tag {} is out of range 0-{}", tag, MAX_VLAN_TAG),
            ));
        }
        self.vsctl
            .set_field(Table::Port, port, Field::new(columns::TAG, u32::from(tag)))
            .await
    }

    /// True when the port carries the configured vendor tag.
    pub async fn validate_port_vendor(&self, port: &str) -> OvsResult<bool> {
        let ports = self
            .vsctl
            .find(
                Table::Port,
                columns::NAME,
                &[Condition::eq(
                    Column::key(columns::EXTERNAL_IDS, external_ids::VENDOR),
                    self.switch.vendor.as_str(),
                )],
            )
            .await?;
        Ok(ports.iter().any(|p| p == port))
    }

    /// The network namespace path recorded on the interface.
    pub async fn get_interface_pod_ns(&self, iface_id: &str) -> OvsResult<Lookup<String>> {
        let records = self
            .vsctl
            .find_columns(
                Table::Interface,
                &[columns::EXTERNAL_IDS],
                &[Self::iface_id_condition(iface_id)],
            )
            .await?;
        let Some(record) = records.first() else {
            return Ok(Lookup::NotFound);
        };
        let ids = parse_map(&record[0]).ok_or_else(|| {
            OvsError::malformed("find interface external_ids", record[0].clone(), "not a map")
        })?;
        Ok(match ids.get(external_ids::POD_NETNS) {
            Some(netns) => Lookup::Found(netns.clone()),
            None => Lookup::NotFound,
        })
    }

    /// Maps iface-id to record handle for every record of `table` carrying
    /// one.
    pub async fn list_external_ids(&self, table: Table) -> OvsResult<HashMap<String, String>> {
        let records = self
            .vsctl
            .find_columns(
                table,
                &[columns::UUID, columns::EXTERNAL_IDS],
                &[Condition::present(Column::key(
                    columns::EXTERNAL_IDS,
                    external_ids::IFACE_ID,
                ))],
            )
            .await?;

        let mut result = HashMap::with_capacity(records.len());
        for record in records {
            let ids = parse_map(&record[1]).ok_or_else(|| {
                OvsError::malformed(format!("find {} external_ids", table), record[1].clone(), "not a map")
            })?;
            if let Some(iface_id) = ids.get(external_ids::IFACE_ID) {
                result.insert(iface_id.clone(), record[0].clone());
            }
        }
        Ok(result)
    }

    /// Maps each QoS handle to the queue bound at id 0.
    pub async fn list_qos_queue_ids(&self) -> OvsResult<HashMap<String, String>> {
        let records = self
            .vsctl
            .find_columns(
                Table::Qos,
                &[columns::UUID, columns::QUEUES],
                &[Condition::present(Column::key(columns::QUEUES, "0"))],
            )
            .await?;

        let mut result = HashMap::with_capacity(records.len());
        for record in records {
            let queues = parse_map(&record[1]).ok_or_else(|| {
                OvsError::malformed("find qos queues", record[1].clone(), "not a map")
            })?;
            if let Some(queue) = queues.get("0") {
                result.insert(record[0].clone(), queue.clone());
            }
        }
        Ok(result)
    }

    /// Rebuilds the queue map from the switch.
    ///
    /// An interface maps to the queue bound at the lowest id of its HTB QoS
    /// record. Tagged queues only fill in interfaces with nothing bound, so
    /// a stray or replaced queue never shadows the live one.
    #[instrument(skip(self))]
    pub async fn queue_iface_map(&self) -> OvsResult<QueueIfaceMap> {
        let records = self
            .vsctl
            .find_columns(
                Table::Qos,
                &[columns::EXTERNAL_IDS, columns::QUEUES],
                &[
                    Condition::present(Column::key(columns::EXTERNAL_IDS, external_ids::IFACE_ID)),
                    Condition::eq(columns::TYPE, HTB_QOS),
                ],
            )
            .await?;

        let mut map = QueueIfaceMap::with_capacity(records.len());
        for record in records {
            let (Some(ids), Some(queues)) = (parse_map(&record[0]), parse_map(&record[1])) else {
                return Err(OvsError::malformed(
                    "find qos --columns=external_ids,queues",
                    record.join(" "),
                    "not a map",
                ));
            };
            let Some(iface_id) = ids.get(external_ids::IFACE_ID) else {
                continue;
            };
            let first = queues
                .into_iter()
                .filter_map(|(id, queue)| id.parse::<u32>().ok().map(|id| (id, queue)))
                .min_by_key(|(id, _)| *id);
            if let Some((_, queue)) = first {
                map.entry(iface_id.clone()).or_insert(queue);
            }
        }

        for (iface_id, queue) in self.list_external_ids(Table::Queue).await? {
            map.entry(iface_id).or_insert(queue);
        }
        debug!(entries = map.len(), "Rebuilt queue map");
        Ok(map)
    }

    /// Adds the interface's port to, or removes it from, both selection sets
    /// of the configured mirror. Nothing to do when global mirroring is on.
    #[instrument(skip(self))]
    pub async fn config_interface_mirror(
        &self,
        global_mirror: bool,
        enable: bool,
        iface_id: &str,
    ) -> OvsResult<()> {
        if global_mirror {
            return Ok(());
        }
        let names = self.interface_names(iface_id).await?;
        let Some(name) = names.first() else {
            return Err(OvsError::not_found(Table::Interface.as_str(), iface_id));
        };
        let handles = self
            .vsctl
            .find(Table::Port, columns::UUID, &[Condition::eq(columns::NAME, name.as_str())])
            .await?;
        let Some(port) = handles.first() else {
            return Err(OvsError::not_found(Table::Port.as_str(), name.as_str()));
        };

        let mirror = self.switch.mirror_name.as_str();
        let values = std::slice::from_ref(port);
        for column in [columns::SELECT_DST_PORT, columns::SELECT_SRC_PORT] {
            if enable {
                self.vsctl.add(Table::Mirror, mirror, column, values).await?;
            } else {
                self.vsctl.remove(Table::Mirror, mirror, column, values).await?;
            }
        }
        debug!(port = %name, mirror = %mirror, enable, "Configured port mirroring");
        Ok(())
    }
}
