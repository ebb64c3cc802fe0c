//! Process boundary for the switch-control tool.
//!
//! [`CommandRunner`] is the seam between the executor and the outside
//! world: [`ProcessRunner`] spawns `ovs-vsctl`, tests plug in an in-memory
//! switch instead.
//!
//! Arguments are passed to the child directly, without a shell, so values
//! only need the quoting `ovs-vsctl` itself understands (see
//! [`crate::field`]).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{OvsError, OvsResult};

/// Default path of the switch-control tool.
pub const OVS_VSCTL_CMD: &str = "/usr/bin/ovs-vsctl";

/// Default value passed as the tool's own `--timeout` option, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Result of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

impl ExecResult {
    /// Builds a successful result carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Builds a failed result carrying `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs one switch-control command.
///
/// Implementations report spawn failures as [`OvsError::Exec`] and return
/// non-zero exits as an [`ExecResult`]; mapping exit codes to errors is the
/// executor's job.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the tool with `args` and collects its output.
    async fn run(&self, args: &[String]) -> OvsResult<ExecResult>;
}

/// Spawns the real `ovs-vsctl` binary.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: PathBuf,
    timeout_secs: u64,
}

impl ProcessRunner {
    /// Creates a runner for `binary`, passing `--timeout=<timeout_secs>`.
    ///
    /// A zero timeout omits the option and lets the tool wait forever.
    pub fn new(binary: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            timeout_secs,
        }
    }

    /// Returns the configured binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command_line(&self, args: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        if self.timeout_secs > 0 {
            full.push(format!("--timeout={}", self.timeout_secs));
        }
        full.extend(args.iter().cloned());
        full
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(OVS_VSCTL_CMD, DEFAULT_TIMEOUT_SECS)
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, args: &[String]) -> OvsResult<ExecResult> {
        let full = self.command_line(args);

        let output = Command::new(&self.binary)
            .args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| OvsError::Exec {
                command: format!("{} {}", self.binary.display(), full.join(" ")),
                source: e,
            })?;

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
