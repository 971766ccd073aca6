//! Project lifecycle - start/stop operations
//!
//! Every operation on a project runs under that project's lock, so a start
//! and a stop for the same project never interleave.

use super::retry::LaunchRequest;
use super::{StartOptions, Supervisor};
use crate::auth_config::{AuthConfig, auth_config_changed};
use crate::composer::{ComposerInfo, ComposerInstance, Endpoint};
use crate::error::ComposerError;
use crate::port::is_port_available;
use tokio::time;

impl Supervisor {
    /// Starts (or keeps) the composer for a project with default options.
    pub async fn start_project(
        &self,
        project_id: &str,
        endpoint: Endpoint,
        auth: Option<AuthConfig>,
    ) -> Result<ComposerInfo, ComposerError> {
        let opts = self.start_options();
        self.start_project_with(project_id, endpoint, auth, opts)
            .await
    }

    /// Ensures exactly one healthy composer runs for `project_id` with `auth`.
    ///
    /// An instance that is alive with an equivalent config is left alone. A
    /// changed config or a dead instance is stopped and relaunched. A start
    /// still in flight for the same project is cancelled and fails with
    /// [`ComposerError::Superseded`]; a child it had spawned is killed.
    pub async fn start_project_with(
        &self,
        project_id: &str,
        endpoint: Endpoint,
        auth: Option<AuthConfig>,
        opts: StartOptions,
    ) -> Result<ComposerInfo, ComposerError> {
        self.ensure_enabled(Some(project_id))?;
        let ticket = self.registry.begin_start(project_id);
        tokio::select! {
            biased;
            result = self.start_now(project_id, endpoint, auth, opts) => result,
            () = ticket.superseded() => {
                debug!("cancelled MCP Composer start for project {project_id}, a newer start arrived");
                Err(ComposerError::superseded(Some(project_id)))
            }
        }
    }

    async fn start_now(
        &self,
        project_id: &str,
        endpoint: Endpoint,
        auth: Option<AuthConfig>,
        opts: StartOptions,
    ) -> Result<ComposerInfo, ComposerError> {
        let Some(auth) = auth else {
            return Err(ComposerError::config(
                Some(project_id),
                "No auth settings provided",
            ));
        };
        auth.validate()
            .map_err(|e| ComposerError::from(e).with_project(project_id))?;
        let (host, port) = auth
            .bind_address()
            .map_err(|e| e.with_project(project_id))?;
        debug!("starting MCP Composer for project {project_id} on {host}:{port}");

        let lock = self.registry.lock_for(project_id);
        let _guard = lock.lock().await;

        if let Some(info) = self.reuse_or_clear(project_id, &auth).await {
            return Ok(info);
        }

        if let Err(e) = self.ensure_port_available(project_id, port).await {
            self.registry.set_last_error(project_id, e.message());
            return Err(e);
        }

        let req = LaunchRequest {
            project_id,
            host: &host,
            port,
            endpoint: &endpoint,
            auth: &auth,
        };
        let mut process = match self.launch_with_retries(&req, &opts).await {
            Ok(process) => process,
            Err(e) => {
                self.registry.set_last_error(project_id, e.message());
                return Err(e);
            }
        };

        process.forward_output(project_id);
        let instance = ComposerInstance {
            process,
            host,
            port,
            endpoint,
            auth,
            started_at: chrono::Local::now(),
        };
        let info = instance.info(project_id);
        self.registry.put(project_id, instance);
        self.registry.clear_last_error(project_id);
        info!(
            "MCP Composer started for project {project_id} on port {port} (pid {})",
            info.pid
        );
        Ok(info)
    }

    /// Returns the running instance if it can be kept; otherwise stops it,
    /// frees its port, and returns `None`.
    async fn reuse_or_clear(&self, project_id: &str, auth: &AuthConfig) -> Option<ComposerInfo> {
        let state = self.registry.inspect(project_id)?;
        if state.alive {
            if !auth_config_changed(Some(&state.auth), Some(auth)) {
                debug!("MCP Composer already running for project {project_id} with current config");
                return Some(state.info);
            }
            info!("config changed for project {project_id}, restarting MCP Composer");
        } else {
            info!("MCP Composer process for project {project_id} died, restarting");
        }
        self.stop_locked(project_id).await;
        self.reap_port(state.info.port).await;
        None
    }

    /// Fails with a port error if something else holds `port`.
    ///
    /// The one thing cleaned up here is a dead instance of another project
    /// that still has the port on record.
    async fn ensure_port_available(&self, project_id: &str, port: u16) -> Result<(), ComposerError> {
        if is_port_available(port) {
            trace!("port {port} is available");
            return Ok(());
        }

        match self.registry.project_on_port(port) {
            Some(other) if other != project_id => {
                if self.registry.is_alive(&other) == Some(true) || !self.clear_dead(&other).await {
                    error!(
                        "port {port} requested by project {project_id} is in use by project \
                         {other}, not killing an active MCP Composer"
                    );
                    return Err(ComposerError::port(
                        Some(project_id),
                        port,
                        format!(
                            "Port {port} is already in use by another project. Please choose a \
                             different port (e.g., {}) or disable OAuth on the other project first.",
                            port.saturating_add(1)
                        ),
                    ));
                }
                self.reap_port(port).await;
            }
            Some(_) => {
                debug!("port {port} is held by a stale process of project {project_id}");
                self.reap_port(port).await;
            }
            None => {
                error!(
                    "port {port} is in use by an unknown process, not killing an external application"
                );
                return Err(ComposerError::port(
                    Some(project_id),
                    port,
                    format!(
                        "Port {port} is already in use by another application. Please choose a \
                         different port (e.g., {}) or free up the port manually.",
                        port.saturating_add(1)
                    ),
                ));
            }
        }

        if is_port_available(port) {
            Ok(())
        } else {
            Err(ComposerError::port(
                Some(project_id),
                port,
                format!("Port {port} is still in use after killing the previous process"),
            ))
        }
    }

    /// Removes another project's dead instance, if its lock is free right now.
    async fn clear_dead(&self, other: &str) -> bool {
        let lock = self.registry.lock_for(other);
        let Ok(_guard) = lock.try_lock() else {
            debug!("project {other} is busy, leaving its port alone");
            return false;
        };
        if self.registry.is_alive(other) == Some(true) {
            return false;
        }
        debug!("project {other} still tracks a port but its process died, taking over");
        self.stop_locked(other).await;
        true
    }

    /// Stops the composer for a project. A no-op if none is running.
    pub async fn stop_project(&self, project_id: &str) -> Result<(), ComposerError> {
        self.ensure_enabled(Some(project_id))?;
        let lock = self.registry.lock_for(project_id);
        let _guard = lock.lock().await;
        self.stop_locked(project_id).await;
        Ok(())
    }

    /// Stops every running composer.
    pub async fn stop_all(&self) -> Result<(), ComposerError> {
        self.ensure_enabled(None)?;
        for project_id in self.registry.project_ids() {
            self.stop_project(&project_id).await?;
        }
        Ok(())
    }

    /// Caller must hold the project's lock. Never fails.
    pub(crate) async fn stop_locked(&self, project_id: &str) {
        let Some(mut instance) = self.registry.remove(project_id) else {
            trace!("no MCP Composer running for project {project_id}");
            return;
        };
        let pid = instance.process.pid();
        info!("stopping MCP Composer for project {project_id} (pid {pid})");
        let outcome = instance
            .process
            .shutdown(
                self.platform.as_ref(),
                self.settings.stop_timeout(),
                self.settings.kill_timeout(),
                self.settings.drain_timeout(),
            )
            .await;
        debug!("MCP Composer for project {project_id} stopped: {outcome}");
    }

    /// Kills untracked processes on `port`, bounded by the reap timeout.
    pub(crate) async fn reap_port(&self, port: u16) -> bool {
        let tracked = self.registry.tracked_pids();
        let killed = self
            .platform
            .reap_on_port(port, &tracked, self.settings.reap_timeout())
            .await;
        if killed {
            // give the OS a moment to release the socket
            time::sleep(self.settings.retry_delay().min(std::time::Duration::from_secs(1))).await;
        }
        killed
    }

    pub fn port_for(&self, project_id: &str) -> Result<Option<u16>, ComposerError> {
        self.ensure_enabled(Some(project_id))?;
        Ok(self.registry.port_for(project_id))
    }

    pub fn info(&self, project_id: &str) -> Result<Option<ComposerInfo>, ComposerError> {
        self.ensure_enabled(Some(project_id))?;
        Ok(self.registry.info(project_id))
    }

    /// The last user-facing error for a project, cleared by a successful start.
    pub fn last_error(&self, project_id: &str) -> Result<Option<String>, ComposerError> {
        self.ensure_enabled(Some(project_id))?;
        Ok(self.registry.last_error(project_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_config::OAuthConfig;
    use crate::settings::Settings;

    fn disabled() -> Supervisor {
        Supervisor::new(Settings {
            enabled: false,
            ..Default::default()
        })
    }

    fn apikey(port: u16) -> Option<AuthConfig> {
        Some(AuthConfig::ApiKey {
            api_key: Some("k".into()),
            host: Some("127.0.0.1".into()),
            port: Some(port.to_string()),
        })
    }

    #[tokio::test]
    async fn test_disabled_rejects_everything() {
        let sup = disabled();
        let err = sup
            .start_project("p1", Endpoint::new("http://x"), apikey(2000))
            .await
            .unwrap_err();
        assert!(matches!(err, ComposerError::Disabled { .. }));
        assert_eq!(err.project_id(), Some("p1"));
        assert!(sup.stop_project("p1").await.is_err());
        assert!(sup.stop_all().await.is_err());
        assert!(sup.port_for("p1").is_err());
        assert!(sup.last_error("p1").is_err());
        // shutdown is not gated
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_config() {
        let sup = Supervisor::new(Settings::default());
        let err = sup
            .start_project("p1", Endpoint::new("http://x"), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No auth settings provided");
        assert!(matches!(err, ComposerError::Config { .. }));
    }

    #[tokio::test]
    async fn test_incomplete_oauth_names_every_field() {
        let sup = Supervisor::new(Settings::default());
        let auth = AuthConfig::OAuth(OAuthConfig {
            oauth_host: Some("localhost".into()),
            oauth_port: Some("9000".into()),
            oauth_client_id: Some("".into()),
            ..Default::default()
        });
        let err = sup
            .start_project("proj1", Endpoint::new("http://x"), Some(auth))
            .await
            .unwrap_err();
        assert!(matches!(err, ComposerError::Config { .. }));
        assert_eq!(err.project_id(), Some("proj1"));
        let message = err.to_string();
        assert!(message.contains("Empty required fields: oauth_client_id"), "{message}");
        for field in [
            "oauth_server_url",
            "oauth_auth_url",
            "oauth_token_url",
            "oauth_client_secret",
        ] {
            assert!(message.contains(field), "{field} missing from {message}");
        }
        assert_eq!(sup.port_for("proj1").unwrap(), None);
    }

    #[tokio::test]
    async fn test_stop_absent_project_is_noop() {
        let sup = Supervisor::new(Settings::default());
        sup.stop_project("nobody").await.unwrap();
        sup.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_port_holder_is_a_port_error() {
        let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let sup = Supervisor::new(Settings {
            command: vec!["/nonexistent/composerd-never-launched".into()],
            ..Default::default()
        });
        let err = sup
            .start_project("p1", Endpoint::new("http://x"), apikey(port))
            .await
            .unwrap_err();
        assert!(matches!(err, ComposerError::Port { .. }), "{err:?}");
        assert!(err.to_string().contains(&format!("e.g., {}", port + 1)));
        assert_eq!(sup.last_error("p1").unwrap(), Some(err.to_string()));
    }
}
