//! Scripted runner shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::OvsResult;
use crate::runner::{CommandRunner, ExecResult};

/// Replays canned results in order and records every argument list.
#[derive(Debug, Default)]
pub(crate) struct ScriptedRunner {
    responses: Mutex<VecDeque<ExecResult>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub(crate) fn new(responses: Vec<ExecResult>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, args: &[String]) -> OvsResult<ExecResult> {
        self.calls.lock().push(args.to_vec());
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| ExecResult::failed(1, "unexpected command")))
    }
}
