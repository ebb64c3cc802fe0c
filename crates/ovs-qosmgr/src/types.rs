//! Value types passed to and returned by the reconciler.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use ovs_vsctl::{Atom, Field};

use crate::tables::{columns, external_ids, other_config, HTB_QOS, NETEM_QOS};

/// Caller-owned map from iface-id to the handle of its HTB queue record.
///
/// Keys are the `external_ids:iface-id` value (`<pod>.<namespace>`), never
/// the port or interface name: one pod interface may be reattached under a
/// new port name and must keep its queue. An empty map means "nothing
/// created yet". [`QosMgr::queue_iface_map`] rebuilds it from the switch.
///
/// [`QosMgr::queue_iface_map`]: crate::QosMgr::queue_iface_map
pub type QueueIfaceMap = HashMap<String, String>;

/// The pod owning an interface. Either part may be empty when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
}

impl PodRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// True when both name and namespace are known.
    pub fn is_set(&self) -> bool {
        !self.name.is_empty() && !self.namespace.is_empty()
    }

    /// The `external_ids:pod` value, `<namespace>/<name>`.
    pub fn tag(&self) -> Option<String> {
        self.is_set()
            .then(|| format!("{}/{}", self.namespace, self.name))
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// External-id fields tagging a QoS or queue record with its owner.
pub(crate) fn owner_fields(pod: &PodRef, iface_id: &str) -> Vec<Field> {
    let mut fields = Vec::with_capacity(2);
    if !iface_id.is_empty() {
        fields.push(Field::map_entry(
            columns::EXTERNAL_IDS,
            external_ids::IFACE_ID,
            iface_id,
        ));
    }
    if let Some(tag) = pod.tag() {
        fields.push(Field::map_entry(columns::EXTERNAL_IDS, external_ids::POD, tag));
    }
    fields
}

/// QoS discipline of a QoS record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QosKind {
    Htb,
    Netem,
    Other(String),
}

impl QosKind {
    pub fn as_str(&self) -> &str {
        match self {
            QosKind::Htb => HTB_QOS,
            QosKind::Netem => NETEM_QOS,
            QosKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for QosKind {
    fn from(kind: &str) -> Self {
        match kind {
            HTB_QOS => QosKind::Htb,
            NETEM_QOS => QosKind::Netem,
            other => QosKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for QosKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rates of one HTB queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtbQueueParams {
    /// Ceiling in bits per second.
    pub max_rate_bps: u64,
    /// Guaranteed rate in bits per second.
    pub min_rate_bps: Option<u64>,
    /// Burst size in bits.
    pub burst_bits: Option<u64>,
}

impl HtbQueueParams {
    /// A queue capped at `max_rate_bps` with no guarantee.
    pub fn max_rate(max_rate_bps: u64) -> Self {
        Self {
            max_rate_bps,
            min_rate_bps: None,
            burst_bits: None,
        }
    }

    pub fn with_min_rate(mut self, min_rate_bps: u64) -> Self {
        self.min_rate_bps = Some(min_rate_bps);
        self
    }

    pub fn with_burst(mut self, burst_bits: u64) -> Self {
        self.burst_bits = Some(burst_bits);
        self
    }

    /// The `other_config` entries for the queue record.
    pub(crate) fn fields(&self) -> Vec<Field> {
        let mut fields = vec![Field::map_entry(
            columns::OTHER_CONFIG,
            other_config::MAX_RATE,
            self.max_rate_bps,
        )];
        if let Some(min) = self.min_rate_bps {
            fields.push(Field::map_entry(columns::OTHER_CONFIG, other_config::MIN_RATE, min));
        }
        if let Some(burst) = self.burst_bits {
            fields.push(Field::map_entry(columns::OTHER_CONFIG, other_config::BURST, burst));
        }
        fields
    }
}

/// Requested network emulation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetemParams {
    pub latency_ms: u32,
    pub jitter_ms: u32,
    pub limit_pkts: u32,
    pub loss_percent: f64,
}

impl NetemParams {
    pub fn new(latency_ms: u32, jitter_ms: u32, limit_pkts: u32, loss_percent: f64) -> Self {
        Self {
            latency_ms,
            jitter_ms,
            limit_pkts,
            loss_percent,
        }
    }

    /// False when every setting is zero, which means "no emulation".
    pub fn is_active(&self) -> bool {
        self.latency_ms > 0 || self.jitter_ms > 0 || self.limit_pkts > 0 || self.loss_percent > 0.0
    }

    /// The settings as stored on the switch.
    pub fn to_config(&self) -> NetemConfig {
        NetemConfig {
            latency_us: u64::from(self.latency_ms) * 1000,
            jitter_us: u64::from(self.jitter_ms) * 1000,
            limit_pkts: u64::from(self.limit_pkts),
            loss_percent: self.loss_percent,
        }
    }
}

/// Network emulation settings as stored in a QoS record's `other_config`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetemConfig {
    pub latency_us: u64,
    pub jitter_us: u64,
    pub limit_pkts: u64,
    pub loss_percent: f64,
}

impl NetemConfig {
    /// All four `other_config` entries.
    pub(crate) fn fields(&self) -> Vec<Field> {
        vec![
            Field::map_entry(columns::OTHER_CONFIG, other_config::LATENCY, self.latency_us),
            Field::map_entry(columns::OTHER_CONFIG, other_config::JITTER, self.jitter_us),
            Field::map_entry(columns::OTHER_CONFIG, other_config::LIMIT, self.limit_pkts),
            Field::map_entry(
                columns::OTHER_CONFIG,
                other_config::LOSS,
                Atom::Real(self.loss_percent),
            ),
        ]
    }

    /// Reads the settings back from a parsed `other_config` map.
    ///
    /// The error names the first missing or unparsable key.
    pub fn from_other_config(map: &BTreeMap<String, String>) -> Result<Self, String> {
        fn value<T: std::str::FromStr>(map: &BTreeMap<String, String>, key: &str) -> Result<T, String> {
            let raw = map
                .get(key)
                .ok_or_else(|| format!("missing other_config:{}", key))?;
            raw.trim()
                .parse()
                .map_err(|_| format!("invalid other_config:{} value {:?}", key, raw))
        }

        Ok(Self {
            latency_us: value(map, other_config::LATENCY)?,
            jitter_us: value(map, other_config::JITTER)?,
            limit_pkts: value(map, other_config::LIMIT)?,
            loss_percent: value(map, other_config::LOSS)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_tag() {
        assert_eq!(PodRef::new("web-0", "default").tag().as_deref(), Some("default/web-0"));
        assert_eq!(PodRef::new("web-0", "").tag(), None);
        assert!(!PodRef::default().is_set());
    }

    #[test]
    fn test_owner_fields() {
        let fields = owner_fields(&PodRef::new("web-0", "default"), "web-0.default");
        let rendered: Vec<String> = fields.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "external_ids:iface-id=web-0.default",
                "external_ids:pod=\"default/web-0\""
            ]
        );
        assert!(owner_fields(&PodRef::default(), "").is_empty());
    }

    #[test]
    fn test_qos_kind() {
        assert_eq!(QosKind::from("linux-htb"), QosKind::Htb);
        assert_eq!(QosKind::from("linux-netem"), QosKind::Netem);
        assert_eq!(QosKind::from("linux-hfsc").to_string(), "linux-hfsc");
    }

    #[test]
    fn test_netem_params_to_config() {
        let config = NetemParams::new(1, 1, 1, 1.0).to_config();
        assert_eq!(config.latency_us, 1000);
        assert_eq!(config.jitter_us, 1000);
        assert_eq!(config.limit_pkts, 1);
        assert_eq!(config.loss_percent, 1.0);
        assert!(!NetemParams::default().is_active());
        assert!(NetemParams::new(0, 0, 0, 0.5).is_active());
    }

    #[test]
    fn test_netem_config_fields() {
        let rendered: Vec<String> = NetemParams::new(10, 2, 1000, 0.5)
            .to_config()
            .fields()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "other_config:latency=10000",
                "other_config:jitter=2000",
                "other_config:limit=1000",
                "other_config:loss=0.5"
            ]
        );
    }

    #[test]
    fn test_netem_config_from_other_config() {
        let map: BTreeMap<String, String> = [
            ("latency", "1000"),
            ("jitter", "1000"),
            ("limit", "1"),
            ("loss", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = NetemConfig::from_other_config(&map).unwrap();
        assert_eq!(config, NetemParams::new(1, 1, 1, 1.0).to_config());

        let mut partial = map.clone();
        partial.remove("loss");
        let err = NetemConfig::from_other_config(&partial).unwrap_err();
        assert!(err.contains("loss"));
    }

    #[test]
    fn test_htb_queue_fields() {
        let rendered: Vec<String> = HtbQueueParams::max_rate(10_000_000)
            .with_burst(1_000_000)
            .fields()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec!["other_config:max-rate=10000000", "other_config:burst=1000000"]
        );
    }
}
