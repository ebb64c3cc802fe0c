//! Configuration file support for the QoS manager
//!
//! Loads and validates configuration from TOML files.
//! Default location: /etc/openvswitch/qosmgr.conf

use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use ovs_vsctl::{OvsError, OvsResult, ProcessRunner, Vsctl};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/openvswitch/qosmgr.conf";

/// Switch-control tool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VsctlConfig {
    /// Path of the ovs-vsctl binary
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Value passed as `--timeout`, 0 disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum number of concurrent ovs-vsctl invocations
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Commands slower than this are logged as warnings
    #[serde(default = "default_slow_command_ms")]
    pub slow_command_ms: u64,
}

/// Integration bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Bridge the pod ports are attached to
    #[serde(default = "default_integration_bridge")]
    pub integration_bridge: String,

    /// `external_ids:vendor` value marking records owned by this manager
    #[serde(default = "default_vendor")]
    pub vendor: String,

    /// Mirror used for traffic mirroring of pod ports
    #[serde(default = "default_mirror_name")]
    pub mirror_name: String,
}

/// Complete QoS manager configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QosMgrConfig {
    #[serde(default)]
    pub vsctl: VsctlConfig,

    #[serde(default)]
    pub switch: SwitchConfig,
}

fn default_binary() -> String {
    ovs_vsctl::OVS_VSCTL_CMD.to_string()
}

fn default_timeout_secs() -> u64 {
    ovs_vsctl::DEFAULT_TIMEOUT_SECS
}

fn default_max_concurrency() -> usize {
    ovs_vsctl::DEFAULT_CONCURRENCY
}

fn default_slow_command_ms() -> u64 {
    500
}

fn default_integration_bridge() -> String {
    "br-int".to_string()
}

fn default_vendor() -> String {
    "ovs-qos".to_string()
}

fn default_mirror_name() -> String {
    "m0".to_string()
}

impl Default for VsctlConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            slow_command_ms: default_slow_command_ms(),
        }
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            integration_bridge: default_integration_bridge(),
            vendor: default_vendor(),
            mirror_name: default_mirror_name(),
        }
    }
}

impl QosMgrConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> OvsResult<Self> {
        let path = path.as_ref();

        let config: Self = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                OvsError::invalid_config(
                    path.display().to_string(),
                    format!("failed to parse config file: {}", e),
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(OvsError::invalid_config(
                    path.display().to_string(),
                    e.to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from default location or defaults
    pub fn load() -> OvsResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> OvsResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| {
            OvsError::invalid_config("config", format!("failed to serialize config: {}", e))
        })?;
        fs::write(path, content)
            .map_err(|e| OvsError::invalid_config(path.display().to_string(), e.to_string()))
    }

    /// Get the slow command threshold as Duration
    pub fn slow_command_threshold(&self) -> Duration {
        Duration::from_millis(self.vsctl.slow_command_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> OvsResult<()> {
        if self.vsctl.binary.trim().is_empty() {
            return Err(OvsError::invalid_config("vsctl.binary", "must not be empty"));
        }
        if self.vsctl.max_concurrency == 0 {
            return Err(OvsError::invalid_config(
                "vsctl.max_concurrency",
                "must be > 0",
            ));
        }
        if self.switch.integration_bridge.trim().is_empty() {
            return Err(OvsError::invalid_config(
                "switch.integration_bridge",
                "must not be empty",
            ));
        }
        if self.switch.mirror_name.trim().is_empty() {
            return Err(OvsError::invalid_config(
                "switch.mirror_name",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Builds the executor described by the `[vsctl]` section.
    pub fn build_vsctl(&self) -> OvsResult<Vsctl> {
        let limit = NonZeroUsize::new(self.vsctl.max_concurrency).ok_or_else(|| {
            OvsError::invalid_config("vsctl.max_concurrency", "must be > 0")
        })?;
        let runner = ProcessRunner::new(&self.vsctl.binary, self.vsctl.timeout_secs);
        Ok(Vsctl::system(runner, limit).with_slow_threshold(self.slow_command_threshold()))
    }
}
