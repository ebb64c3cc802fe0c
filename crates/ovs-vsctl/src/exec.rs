//! The command executor.
//!
//! [`Vsctl`] is the only path to the switch-control tool. Each call takes
//! one permit from the shared [`CommandLimiter`], runs the command and
//! gives the permit back when the guard goes out of scope, including on
//! errors and panics.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{OvsError, OvsResult};
use crate::limiter::CommandLimiter;
use crate::runner::{CommandRunner, ProcessRunner};

/// Default number of concurrent tool invocations.
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Commands slower than this are logged at warn level.
pub const DEFAULT_SLOW_COMMAND: Duration = Duration::from_millis(500);

/// Rate-limited handle to the switch-control tool. Cheap to clone; clones
/// share the limiter.
#[derive(Clone)]
pub struct Vsctl {
    runner: Arc<dyn CommandRunner>,
    limiter: Arc<CommandLimiter>,
    slow_threshold: Duration,
}

impl Vsctl {
    /// Creates an executor over `runner` allowing `limit` concurrent commands.
    pub fn new(runner: Arc<dyn CommandRunner>, limit: NonZeroUsize) -> Self {
        Self {
            runner,
            limiter: Arc::new(CommandLimiter::new(limit)),
            slow_threshold: DEFAULT_SLOW_COMMAND,
        }
    }

    /// Creates an executor spawning the real tool.
    pub fn system(runner: ProcessRunner, limit: NonZeroUsize) -> Self {
        Self::new(Arc::new(runner), limit)
    }

    /// Sets the duration above which a command is reported as slow.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Returns the shared limiter.
    pub fn limiter(&self) -> &Arc<CommandLimiter> {
        &self.limiter
    }

    /// Changes the concurrency limit for every clone of this executor.
    ///
    /// Permits already granted stay valid. Zero is rejected.
    pub fn update_limiter(&self, limit: usize) -> OvsResult<()> {
        let limit = NonZeroUsize::new(limit).ok_or_else(|| {
            OvsError::invalid_config("max_concurrency", "limit must be a positive integer")
        })?;
        self.limiter.set_limit(limit);
        debug!(limit = limit.get(), "Updated ovs-vsctl concurrency limit");
        Ok(())
    }

    /// Runs one command and returns its trimmed stdout.
    ///
    /// Non-zero exits become [`OvsError::CommandFailed`] with the combined
    /// output; nothing is retried.
    pub async fn exec<I, S>(&self, args: I) -> OvsResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let command = args.join(" ");

        let _permit = self.limiter.acquire().await;
        debug!(
            command = %command,
            in_flight = self.limiter.in_flight(),
            limit = self.limiter.limit(),
            "Executing ovs-vsctl"
        );

        let start = Instant::now();
        let result = self.runner.run(&args).await?;
        let elapsed = start.elapsed();

        if !result.success() {
            warn!(
                command = %command,
                exit_code = result.exit_code,
                elapsed_ms = elapsed.as_millis() as u64,
                "ovs-vsctl command failed"
            );
            return Err(OvsError::CommandFailed {
                command,
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        if elapsed > self.slow_threshold {
            warn!(
                command = %command,
                elapsed_ms = elapsed.as_millis() as u64,
                "ovs-vsctl command took too long"
            );
        }
        Ok(result.stdout)
    }
}

impl fmt::Debug for Vsctl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vsctl")
            .field("limiter", &self.limiter)
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ExecResult;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn test_exec_returns_stdout() {
        let runner = ScriptedRunner::new(vec![ExecResult::ok("br-int")]);
        let vsctl = Vsctl::new(runner.clone(), NonZeroUsize::new(2).unwrap());

        let out = vsctl.exec(["list-br"]).await.unwrap();
        assert_eq!(out, "br-int");
        assert_eq!(runner.calls(), vec![vec!["list-br".to_string()]]);
        assert_eq!(vsctl.limiter().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_exec_failure_releases_permit() {
        let runner = ScriptedRunner::new(vec![ExecResult::failed(1, "no row \"eth9\" in table Port")]);
        let vsctl = Vsctl::new(runner, NonZeroUsize::new(1).unwrap());

        let err = vsctl.exec(["set", "port", "eth9", "tag=10"]).await.unwrap_err();
        match err {
            OvsError::CommandFailed {
                command,
                exit_code,
                output,
            } => {
                assert_eq!(command, "set port eth9 tag=10");
                assert_eq!(exit_code, 1);
                assert!(output.contains("no row"));
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
        assert_eq!(vsctl.limiter().in_flight(), 0);
        assert!(vsctl.limiter().try_acquire().is_some());
    }

    #[test]
    fn test_update_limiter() {
        let vsctl = Vsctl::new(ScriptedRunner::new(vec![]), NonZeroUsize::new(10).unwrap());
        vsctl.update_limiter(3).unwrap();
        assert_eq!(vsctl.limiter().limit(), 3);

        let clone = vsctl.clone();
        clone.update_limiter(7).unwrap();
        assert_eq!(vsctl.limiter().limit(), 7);

        assert!(matches!(
            vsctl.update_limiter(0),
            Err(OvsError::InvalidConfig { .. })
        ));
        assert_eq!(vsctl.limiter().limit(), 7);
    }
}
