use crate::Result;
use crate::error::ComposerError;
use crate::projects_toml::{ProjectConfig, ProjectsToml};
use std::path::PathBuf;

/// Validates the manifest and each project's auth settings without launching anything
#[derive(Debug, clap::Args)]
pub struct Check {
    /// Path to the project manifest
    #[clap(short, long, env = "COMPOSERD_MANIFEST")]
    file: Option<PathBuf>,
}

impl Check {
    pub async fn run(&self) -> Result<()> {
        let path = self.file.clone().unwrap_or_else(ProjectsToml::default_path);
        let manifest = ProjectsToml::read(&path)?;
        let mut failed = 0;
        for (id, project) in &manifest.projects {
            match check_project(id, project) {
                Ok((host, port)) => {
                    println!("{} {id} ({host}:{port})", console::style("ok").green())
                }
                Err(e) => {
                    failed += 1;
                    println!("{} {id}: {e}", console::style("error").red());
                }
            }
        }
        miette::ensure!(
            failed == 0,
            "{failed} of {} project(s) have invalid settings",
            manifest.projects.len()
        );
        Ok(())
    }
}

fn check_project(id: &str, project: &ProjectConfig) -> Result<(String, u16), ComposerError> {
    let auth = project
        .auth
        .as_ref()
        .ok_or_else(|| ComposerError::config(Some(id), "No auth settings provided"))?;
    auth.validate()
        .map_err(|e| ComposerError::from(e).with_project(id))?;
    auth.bind_address().map_err(|e| e.with_project(id))
}
