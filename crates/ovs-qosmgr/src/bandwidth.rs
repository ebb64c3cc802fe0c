//! Ingress policing and the egress cap of a pod interface.

use tracing::{debug, instrument};

use ovs_vsctl::{Field, OvsResult, Table};

use crate::qos_mgr::QosMgr;
use crate::tables::columns;
use crate::types::{HtbQueueParams, PodRef, QueueIfaceMap};

/// Ingress policing rate in kbps for a limit in Mbps.
pub fn policing_rate_kbps(mbps: u64) -> u64 {
    mbps.saturating_mul(1000)
}

/// Ingress policing burst: 80% of the rate.
pub fn policing_burst_kb(rate_kbps: u64) -> u64 {
    rate_kbps.saturating_mul(8) / 10
}

impl QosMgr {
    /// Sets ingress policing on every interface carrying `iface_id` and
    /// shapes egress through the interface's HTB queue.
    ///
    /// Zero ingress disables policing. Zero egress clears the HTB state.
    /// Reapplying the same limits rewrites the same values.
    #[instrument(skip(self, queue_map))]
    pub async fn set_interface_bandwidth(
        &self,
        pod: &PodRef,
        iface_id: &str,
        ingress_mbps: u64,
        egress_mbps: u64,
        queue_map: &mut QueueIfaceMap,
    ) -> OvsResult<()> {
        let rate = policing_rate_kbps(ingress_mbps);
        let burst = policing_burst_kb(rate);

        for port in self.interface_names(iface_id).await? {
            self.vsctl
                .set(
                    Table::Interface,
                    &port,
                    &[
                        Field::new(columns::INGRESS_POLICING_RATE, rate),
                        Field::new(columns::INGRESS_POLICING_BURST, burst),
                    ],
                )
                .await?;
            debug!(port = %port, rate_kbps = rate, burst_kb = burst, "Set ingress policing");

            if egress_mbps > 0 {
                // Saturates, then clamps again to i64::MAX when written.
                let params = HtbQueueParams::max_rate(egress_mbps.saturating_mul(1_000_000));
                let queue = self
                    .set_htb_qos_queue_record(pod, iface_id, &params, queue_map)
                    .await?;
                self.set_qos_queue_binding(pod, &port, iface_id, &queue, queue_map)
                    .await?;
            } else if queue_map.remove(iface_id).is_some() || self.is_htb_qos(iface_id).await? {
                self.clear_htb_qos_queue(pod, iface_id).await?;
            }
        }
        Ok(())
    }
}
