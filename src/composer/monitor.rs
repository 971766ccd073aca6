use super::diagnostics::classify;
use super::{ComposerProcess, Stream};
use crate::error::ComposerError;
use crate::port::is_port_available;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::time;

/// What the monitor needs to know about the launch it is watching.
#[derive(Debug, Clone, Copy)]
pub struct StartupContext<'a> {
    pub project_id: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub server_url: Option<&'a str>,
}

/// Polls a fresh child until it binds its port, dies, or runs out of checks.
#[derive(Debug, Clone, Copy)]
pub struct StartupMonitor {
    pub max_checks: u32,
    pub delay: Duration,
    pub drain_timeout: Duration,
}

impl StartupMonitor {
    /// Upper bound on how long one launch attempt may take to become healthy.
    pub fn budget(&self) -> Duration {
        self.delay * self.max_checks
    }

    pub async fn await_healthy(
        &self,
        process: &mut ComposerProcess,
        ctx: StartupContext<'_>,
    ) -> Result<(), ComposerError> {
        let StartupContext {
            project_id, port, ..
        } = ctx;
        debug!(
            "{project_id}: monitoring MCP Composer startup (pid {}, up to {:?})",
            process.pid(),
            self.budget()
        );

        for check in 1..=self.max_checks {
            time::sleep(self.delay).await;

            if let Some(status) = process.exit_status() {
                return Err(self.died(process, status, ctx).await);
            }

            if !is_port_available(port) {
                debug!(
                    "{project_id}: MCP Composer bound to port {port} (check {check}/{})",
                    self.max_checks
                );
                return Ok(());
            }
            debug!(
                "{project_id}: MCP Composer not yet bound to port {port} (check {check}/{})",
                self.max_checks
            );

            let stdout = process.read_available(Stream::Stdout).await;
            for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
                trace!("{project_id}: MCP Composer stdout: {line}");
            }
            let stderr = process.read_available(Stream::Stderr).await;
            for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if line.to_lowercase().contains("error") {
                    error!("{project_id}: MCP Composer error: {line}");
                } else {
                    trace!("{project_id}: MCP Composer stderr: {line}");
                }
            }
        }

        // it may have died on the last sleep
        if let Some(status) = process.exit_status() {
            return Err(self.died(process, status, ctx).await);
        }
        Err(self.never_bound(process, ctx).await)
    }

    async fn died(
        &self,
        process: &mut ComposerProcess,
        status: ExitStatus,
        ctx: StartupContext<'_>,
    ) -> ComposerError {
        let StartupContext {
            project_id,
            host,
            port,
            server_url,
        } = ctx;
        let (stdout, stderr) = process.drain_and_close(self.drain_timeout).await;
        let message = classify(&stdout, &stderr, server_url);
        error!("{project_id}: MCP Composer startup failed");
        error!("  - Process died with {status}");
        error!("  - Target: {host}:{port}");
        error!("  - Command: {}", process.command_line());
        log_output(&stdout, &stderr);
        error!("  - Error message: {message}");
        ComposerError::startup(Some(project_id), message)
    }

    async fn never_bound(&self, process: &mut ComposerProcess, ctx: StartupContext<'_>) -> ComposerError {
        let StartupContext {
            project_id,
            host,
            port,
            server_url,
        } = ctx;
        error!("{project_id}: MCP Composer startup failed");
        error!(
            "  - Process is running (pid {}) but failed to bind to port {port}",
            process.pid()
        );
        error!(
            "  - Checked {} times over {:?}",
            self.max_checks,
            self.budget()
        );
        error!("  - Target: {host}:{port}");
        error!("  - Command: {}", process.command_line());

        process.kill().await;
        let (stdout, stderr) = process.drain_and_close(self.drain_timeout).await;
        let message = classify(&stdout, &stderr, server_url);
        log_output(&stdout, &stderr);
        error!("  - Error message: {message}");
        ComposerError::startup(Some(project_id), message)
    }
}

fn log_output(stdout: &str, stderr: &str) {
    if !stderr.trim().is_empty() {
        error!("  - Error output: {}", stderr.trim());
    }
    if !stdout.trim().is_empty() {
        error!("  - Standard output: {}", stdout.trim());
    }
}
