//! Supervisor module - one MCP Composer child per project
//!
//! This module is split into focused submodules:
//! - `registry`: instance tracking, per-project locks, start tickets, last errors
//! - `lifecycle`: project start/stop operations and port checks
//! - `retry`: launch attempts and the retry loop around them

mod lifecycle;
mod registry;
mod retry;

use crate::composer::{Launcher, StartupMonitor};
use crate::error::ComposerError;
use crate::platform::{self, PlatformStrategy};
use crate::settings::Settings;
use registry::InstanceRegistry;
use std::process::exit;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool};
use std::time::Duration;
#[cfg(unix)]
use tokio::signal::unix::SignalKind;
use tokio::signal;

/// Per-call knobs for [`Supervisor::start_project_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Launch attempts; zero still makes one attempt
    pub max_retries: u32,
    pub startup_checks: u32,
    pub startup_delay: Duration,
}

impl StartOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            startup_checks: settings.startup_checks,
            startup_delay: settings.startup_delay(),
        }
    }
}

pub struct Supervisor {
    pub(crate) settings: Settings,
    pub(crate) platform: Arc<dyn PlatformStrategy>,
    pub(crate) launcher: Launcher,
    pub(crate) registry: InstanceRegistry,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("enabled", &self.settings.enabled)
            .field("platform", &self.platform.name())
            .field("projects", &self.registry.project_ids())
            .finish()
    }
}

impl Supervisor {
    /// A supervisor using the native platform strategy.
    pub fn new(settings: Settings) -> Self {
        let platform = platform::native(&settings.package);
        Self::with_platform(settings, platform)
    }

    pub fn with_platform(settings: Settings, platform: Arc<dyn PlatformStrategy>) -> Self {
        let launcher = Launcher::from_settings(&settings, platform.output_mode());
        Self {
            settings,
            platform,
            launcher,
            registry: InstanceRegistry::new(),
        }
    }

    pub fn start_options(&self) -> StartOptions {
        StartOptions::from_settings(&self.settings)
    }

    pub(crate) fn monitor(&self, opts: &StartOptions) -> StartupMonitor {
        StartupMonitor {
            max_checks: opts.startup_checks,
            delay: opts.startup_delay,
            drain_timeout: self.settings.drain_timeout(),
        }
    }

    /// Fails fast while the feature is switched off.
    pub(crate) fn ensure_enabled(&self, project_id: Option<&str>) -> Result<(), ComposerError> {
        if self.settings.enabled {
            Ok(())
        } else {
            Err(ComposerError::disabled(project_id))
        }
    }

    pub async fn start(&self) {
        if self.settings.enabled {
            info!(
                "MCP Composer supervisor started ({} platform, {} output, package {})",
                self.platform.name(),
                self.platform.output_mode(),
                self.settings.package_spec()
            );
        } else {
            info!("MCP Composer is disabled, supervisor will reject all requests");
        }
    }

    /// Stops every instance. Runs even while disabled so nothing outlives us.
    pub async fn shutdown(&self) {
        debug!("shutting down MCP Composer supervisor");
        for project_id in self.registry.project_ids() {
            let lock = self.registry.lock_for(&project_id);
            let _guard = lock.lock().await;
            self.stop_locked(&project_id).await;
        }
        debug!("MCP Composer supervisor shutdown complete");
    }

    /// Stops everything and exits on the first termination signal; a second
    /// signal exits immediately.
    #[cfg(unix)]
    pub fn handle_signals(self: &Arc<Self>) {
        let signals = [
            SignalKind::terminate(),
            SignalKind::interrupt(),
            SignalKind::quit(),
            SignalKind::hangup(),
        ];
        static RECEIVED_SIGNAL: AtomicBool = AtomicBool::new(false);
        for kind in signals {
            let stream = match signal::unix::signal(kind) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Failed to register signal handler for {kind:?}: {e}");
                    continue;
                }
            };
            let supervisor = self.clone();
            tokio::spawn(async move {
                let mut stream = stream;
                loop {
                    stream.recv().await;
                    if RECEIVED_SIGNAL.swap(true, atomic::Ordering::SeqCst) {
                        exit(1);
                    } else {
                        supervisor.handle_signal().await;
                    }
                }
            });
        }
    }

    #[cfg(windows)]
    pub fn handle_signals(self: &Arc<Self>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            static RECEIVED_SIGNAL: AtomicBool = AtomicBool::new(false);
            loop {
                if let Err(e) = signal::ctrl_c().await {
                    error!("Failed to wait for ctrl-c: {}", e);
                    return;
                }
                if RECEIVED_SIGNAL.swap(true, atomic::Ordering::SeqCst) {
                    exit(1);
                } else {
                    supervisor.handle_signal().await;
                }
            }
        });
    }

    async fn handle_signal(&self) {
        info!("received signal, stopping");
        self.shutdown().await;
        exit(0)
    }
}
