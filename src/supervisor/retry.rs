//! Launch attempts and the retry loop around them
//!
//! One attempt is: clear orphans off the port, spawn, wait for the port to be
//! bound. Only startup failures are retried; anything else aborts at once.

use super::{StartOptions, Supervisor};
use crate::auth_config::AuthConfig;
use crate::composer::{ComposerProcess, Endpoint, StartupContext};
use crate::error::ComposerError;
use tokio::time;

#[derive(Debug, Clone, Copy)]
pub(crate) struct LaunchRequest<'a> {
    pub project_id: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub endpoint: &'a Endpoint,
    pub auth: &'a AuthConfig,
}

impl Supervisor {
    pub(crate) async fn launch_with_retries(
        &self,
        req: &LaunchRequest<'_>,
        opts: &StartOptions,
    ) -> Result<ComposerProcess, ComposerError> {
        let project_id = req.project_id;
        let max_attempts = opts.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!("starting MCP Composer for project {project_id} (attempt {attempt}/{max_attempts})");
            match self.attempt(req, opts).await {
                Ok(process) => {
                    if attempt > 1 {
                        info!("MCP Composer for project {project_id} started after {attempt} attempts");
                    }
                    return Ok(process);
                }
                Err(e) if e.is_retryable() => {
                    error!(
                        "MCP Composer startup attempt {attempt}/{max_attempts} failed for project \
                         {project_id}: {e}"
                    );
                    last_error = Some(e);
                    if attempt < max_attempts {
                        let delay = self.settings.retry_delay();
                        debug!("waiting {delay:?} before retry attempt {}", attempt + 1);
                        time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        error!("MCP Composer failed to start for project {project_id} after {max_attempts} attempts");
        Err(last_error.unwrap_or_else(|| ComposerError::startup(Some(project_id), "")))
    }

    async fn attempt(
        &self,
        req: &LaunchRequest<'_>,
        opts: &StartOptions,
    ) -> Result<ComposerProcess, ComposerError> {
        if self.reap_port(req.port).await {
            debug!("cleared orphaned process(es) from port {}", req.port);
        }
        let mut process = self
            .launcher
            .launch(req.project_id, req.host, req.port, req.endpoint, req.auth)?;
        let ctx = StartupContext {
            project_id: req.project_id,
            host: req.host,
            port: req.port,
            server_url: req.auth.server_url(),
        };
        self.monitor(opts).await_healthy(&mut process, ctx).await?;
        Ok(process)
    }
}
