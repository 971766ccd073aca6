use crate::Result;
use crate::composer::ComposerInfo;
use crate::error::ComposerError;
use crate::projects_toml::{ProjectConfig, ProjectsToml};
use crate::settings::Settings;
use crate::supervisor::{StartOptions, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time;

/// Runs an MCP Composer for every project in the manifest, in the foreground
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Runs an MCP Composer for every project in the manifest, in the foreground

Each project is started concurrently, then checked again on every
interval: a composer that died is relaunched, a healthy one is left alone.
Ctrl-C (or SIGTERM) stops every composer before exiting.

Examples:
  composerd run                       Use ./composer.toml
  composerd run -f projects.toml      Use another manifest
  composerd run docs search           Only these projects
  composerd run --interval 30s        Check health every 30 seconds"
)]
pub struct Run {
    /// Projects to run (default: all in the manifest)
    projects: Vec<String>,
    /// Path to the project manifest
    #[clap(short, long, env = "COMPOSERD_MANIFEST")]
    file: Option<PathBuf>,
    /// Override launch attempts per project
    #[clap(long)]
    max_retries: Option<u32>,
    /// How often to check that every composer is still running
    #[clap(long, default_value = "10s", value_parser = humantime::parse_duration)]
    interval: std::time::Duration,
}

impl Run {
    pub async fn run(&self) -> Result<()> {
        miette::ensure!(!self.interval.is_zero(), "--interval must be greater than zero");
        let path = self.file.clone().unwrap_or_else(ProjectsToml::default_path);
        let manifest = ProjectsToml::read(&path)?;
        for id in &self.projects {
            miette::ensure!(
                manifest.projects.contains_key(id),
                "project {id} is not defined in {}",
                path.display()
            );
        }
        let projects: Vec<(String, ProjectConfig)> = manifest
            .projects
            .into_iter()
            .filter(|(id, _)| self.projects.is_empty() || self.projects.contains(id))
            .collect();

        let settings = Settings::load()?;
        if !settings.enabled {
            return Err(ComposerError::disabled(None).into());
        }
        let supervisor = Arc::new(Supervisor::new(settings));
        let mut opts = supervisor.start_options();
        if let Some(max_retries) = self.max_retries {
            opts.max_retries = max_retries;
        }
        supervisor.start().await;
        supervisor.handle_signals();

        let started = start_all(&supervisor, &projects, opts).await;
        for info in &started {
            println!(
                "{} {} on {}:{} (pid {})",
                console::style("started").green(),
                info.project_id,
                info.host,
                info.port,
                info.pid
            );
        }
        if started.is_empty() {
            supervisor.shutdown().await;
            miette::bail!("no MCP Composer could be started");
        }

        info!(
            "supervising {} of {} project(s), checking every {}",
            started.len(),
            projects.len(),
            humantime::format_duration(self.interval)
        );
        let mut interval = time::interval(self.interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            trace!("checking MCP Composer instances");
            start_all(&supervisor, &projects, opts).await;
        }
    }
}

/// Starts (or keeps) every project concurrently and returns the ones running.
async fn start_all(
    supervisor: &Arc<Supervisor>,
    projects: &[(String, ProjectConfig)],
    opts: StartOptions,
) -> Vec<ComposerInfo> {
    let mut set = JoinSet::new();
    for (id, project) in projects {
        let supervisor = supervisor.clone();
        let id = id.clone();
        let project = project.clone();
        set.spawn(async move {
            let result = supervisor
                .start_project_with(&id, project.endpoint(), project.auth, opts)
                .await;
            (id, result)
        });
    }

    let mut started = vec![];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, Ok(info))) => started.push(info),
            Ok((id, Err(e))) => error!("{id}: {e}"),
            Err(e) => error!("start task failed: {e}"),
        }
    }
    started.sort_by(|a, b| a.project_id.cmp(&b.project_id));
    started
}
