//! A single MCP Composer child process and the records kept about it.
//!
//! - `launcher`: builds the command line and environment, spawns the child
//! - `monitor`: waits for the child to bind its port, diagnoses failures
//! - `output`: captures and drains the child's stdout/stderr
//! - `diagnostics`: error classification and secret redaction

pub mod diagnostics;
mod launcher;
mod monitor;
mod output;

pub use launcher::Launcher;
pub use monitor::{StartupContext, StartupMonitor};
pub use output::{CapturedOutput, Stream};

use crate::auth_config::AuthConfig;
use crate::platform::PlatformStrategy;
use crate::procs::PROCS;
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::time;

/// The URLs a composer proxies: the primary endpoint and the legacy one some
/// clients still need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub legacy_url: String,
}

impl Endpoint {
    /// An endpoint whose legacy URL is `{url}/sse`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_legacy(url, None)
    }

    pub fn with_legacy(url: impl Into<String>, legacy_url: Option<String>) -> Self {
        let url = url.into();
        let legacy_url = legacy_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| format!("{}/sse", url.trim_end_matches('/')));
        Self { url, legacy_url }
    }
}

/// How a stopped child went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIs)]
#[strum(serialize_all = "snake_case")]
pub enum StopOutcome {
    AlreadyExited,
    Graceful,
    Killed,
    Unresponsive,
}

/// A spawned composer child and its captured output.
#[derive(Debug)]
pub struct ComposerProcess {
    child: Child,
    pid: u32,
    output: Option<CapturedOutput>,
    /// Redacted, for logs
    command_line: String,
}

impl ComposerProcess {
    pub(crate) fn new(child: Child, output: CapturedOutput, command_line: String) -> Self {
        let pid = child.id().unwrap_or_default();
        Self {
            child,
            pid,
            output: Some(output),
            command_line,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                debug!("failed to poll composer process {}: {e}", self.pid);
                None
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                debug!("failed to poll composer process {}: {e}", self.pid);
                false
            }
        }
    }

    pub async fn read_available(&mut self, stream: Stream) -> String {
        match self.output.as_mut() {
            Some(output) => output.read_available(stream).await,
            None => String::new(),
        }
    }

    /// `(stdout, stderr)`; empty once the output has been drained or forwarded.
    pub async fn drain_and_close(&mut self, timeout: Duration) -> (String, String) {
        match self.output.take() {
            Some(output) => output.drain_and_close(timeout).await,
            None => Default::default(),
        }
    }

    pub(crate) fn forward_output(&mut self, project_id: &str) {
        if let Some(output) = self.output.take() {
            self.output = output.forward(project_id);
        }
    }

    /// Forceful kill of the child and its descendants, waiting for the child
    /// to be reaped.
    pub async fn kill(&mut self) {
        let descendants = self.descendants();
        if let Err(e) = self.child.kill().await {
            debug!("failed to kill composer process {}: {e}", self.pid);
        }
        self.kill_leftovers(descendants).await;
    }

    fn descendants(&self) -> Vec<u32> {
        PROCS.refresh_processes();
        let descendants = PROCS.all_children(self.pid);
        trace!("composer process {} has descendants {descendants:?}", self.pid);
        descendants
    }

    async fn kill_leftovers(&self, descendants: Vec<u32>) {
        if descendants.is_empty() {
            return;
        }
        PROCS.refresh_pids(&descendants);
        for child_pid in descendants {
            if !PROCS.is_running(child_pid) {
                continue;
            }
            debug!("killing leftover child pid {child_pid} of {}", self.pid);
            if let Err(e) = PROCS.kill_async(child_pid).await {
                warn!("failed to kill child pid {child_pid}: {e}");
            }
        }
    }

    /// Stops the child and everything it spawned.
    ///
    /// Asks nicely, waits `grace`, then kills and waits up to `kill_timeout`.
    /// Descendants are collected up front since they are reparented once the
    /// child dies. Never fails; problems are logged.
    pub async fn shutdown(
        &mut self,
        platform: &dyn PlatformStrategy,
        grace: Duration,
        kill_timeout: Duration,
        drain_timeout: Duration,
    ) -> StopOutcome {
        let pid = self.pid;
        let outcome = if self.exit_status().is_some() {
            StopOutcome::AlreadyExited
        } else {
            let descendants = self.descendants();
            let outcome = self.terminate(platform, grace, kill_timeout).await;
            self.kill_leftovers(descendants).await;
            outcome
        };

        let (stdout, stderr) = self.drain_and_close(drain_timeout).await;
        if !stderr.trim().is_empty() {
            trace!("composer process {pid} final stderr: {}", stderr.trim());
        }
        if !stdout.trim().is_empty() {
            trace!("composer process {pid} final stdout: {}", stdout.trim());
        }
        outcome
    }

    async fn terminate(
        &mut self,
        platform: &dyn PlatformStrategy,
        grace: Duration,
        kill_timeout: Duration,
    ) -> StopOutcome {
        let pid = self.pid;
        if let Err(e) = platform.request_stop(&mut self.child) {
            debug!("failed to signal composer process {pid}: {e}");
        }
        if let Ok(Ok(status)) = time::timeout(grace, self.child.wait()).await {
            debug!("composer process {pid} exited with {status}");
            return StopOutcome::Graceful;
        }

        warn!("composer process {pid} did not exit within {grace:?}, killing");
        if let Err(e) = self.child.start_kill() {
            debug!("failed to kill composer process {pid}: {e}");
        }
        match time::timeout(kill_timeout, self.child.wait()).await {
            Ok(Ok(_)) => StopOutcome::Killed,
            Ok(Err(e)) => {
                warn!("failed to wait for composer process {pid}: {e}");
                StopOutcome::Unresponsive
            }
            Err(_) => {
                warn!("composer process {pid} still running {kill_timeout:?} after kill");
                StopOutcome::Unresponsive
            }
        }
    }
}

/// A running composer as tracked by the supervisor.
#[derive(Debug)]
pub struct ComposerInstance {
    pub process: ComposerProcess,
    pub host: String,
    pub port: u16,
    pub endpoint: Endpoint,
    pub auth: AuthConfig,
    pub started_at: chrono::DateTime<chrono::Local>,
}

impl ComposerInstance {
    pub fn info(&self, project_id: &str) -> ComposerInfo {
        ComposerInfo {
            project_id: project_id.to_string(),
            pid: self.process.pid(),
            host: self.host.clone(),
            port: self.port,
            endpoint: self.endpoint.clone(),
            auth_type: self.auth.to_string(),
            started_at: self.started_at,
        }
    }
}

/// A read-only snapshot of a running composer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposerInfo {
    pub project_id: String,
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub endpoint: Endpoint,
    pub auth_type: String,
    pub started_at: chrono::DateTime<chrono::Local>,
}
