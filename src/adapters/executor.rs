//! Command Executor Adapters
//!
//! [`HostExecutor`] runs host binaries, optionally entering the mount, UTS,
//! IPC, network and PID namespaces of PID 1 so a containerised agent acts
//! on the host's view of devices. [`RecordingExecutor`] is a scripted
//! double that records every invocation.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::CommandExecutor;
use crate::error::{Error, Result};
use crate::metrics;

/// Binary used to enter the host namespaces
pub const NSENTER: &str = "/usr/bin/nsenter";

const NSENTER_ARGS: [&str; 7] = ["-m", "-u", "-i", "-n", "-p", "-t", "1"];

// =============================================================================
// Host Executor
// =============================================================================

/// Runs commands on the host
#[derive(Debug, Clone, Default)]
pub struct HostExecutor {
    execute_on_host: bool,
}

impl HostExecutor {
    /// Create an executor. With `execute_on_host` every command is wrapped
    /// in `nsenter` targeting PID 1.
    pub fn new(execute_on_host: bool) -> Self {
        Self { execute_on_host }
    }

    fn command(&self, command: &str, args: &[String]) -> Command {
        if self.execute_on_host {
            let mut cmd = Command::new(NSENTER);
            cmd.args(NSENTER_ARGS).arg(command).args(args);
            cmd
        } else {
            let mut cmd = Command::new(command);
            cmd.args(args);
            cmd
        }
    }
}

#[async_trait]
impl CommandExecutor for HostExecutor {
    #[instrument(skip(self, args), fields(args = %args.join(" ")))]
    async fn execute(&self, command: &str, args: &[String]) -> Result<String> {
        let failure = |reason: String| Error::Command {
            command: command.to_string(),
            args: args.to_vec(),
            reason,
        };

        // the child is not killed if this future is dropped; a started
        // command always runs to completion
        let output = self
            .command(command, args)
            .output()
            .await
            .map_err(|e| {
                metrics::record_host_command(command, false);
                failure(e.to_string())
            })?;

        if !output.status.success() {
            metrics::record_host_command(command, false);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(failure(reason));
        }

        metrics::record_host_command(command, true);
        debug!("Command completed");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// =============================================================================
// Recording Executor
// =============================================================================

/// Scripted executor for tests.
///
/// Invocations are keyed by their full command line (`command arg1 arg2`).
/// Unscripted lines succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    responses: Mutex<HashMap<String, std::result::Result<String, String>>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `line` with `output`.
    pub fn respond(&self, line: &str, output: &str) {
        self.responses
            .lock()
            .insert(line.to_string(), Ok(output.to_string()));
    }

    /// Fail `line` with `reason` as stderr.
    pub fn fail(&self, line: &str, reason: &str) {
        self.responses
            .lock()
            .insert(line.to_string(), Err(reason.to_string()));
    }

    /// Command lines executed so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls, keeping the script.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, command: &str, args: &[String]) -> Result<String> {
        let line = std::iter::once(command.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().push(line.clone());

        match self.responses.lock().get(&line) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(reason)) => Err(Error::Command {
                command: command.to_string(),
                args: args.to_vec(),
                reason: reason.clone(),
            }),
            None => Ok(String::new()),
        }
    }
}
