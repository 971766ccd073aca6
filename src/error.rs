//! Diagnostic error types for the composer supervisor.
//!
//! `ComposerError` is what callers of the supervisor see. Every variant carries
//! the project it concerns so the API layer can correlate failures, and a
//! message that is safe to show to users (never raw process output).

// False positive: fields are used in #[error] format strings and miette derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

pub const GENERIC_STARTUP_ERROR_MSG: &str =
    "MCP Composer startup failed. Check OAuth configuration and check logs for more information.";

/// Errors returned by the supervisor's public operations.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ComposerError {
    #[error("MCP Composer is disabled in settings")]
    #[diagnostic(
        code(composerd::disabled),
        help("set `enabled = true` in the composerd config or COMPOSERD_ENABLED=1")
    )]
    Disabled { project_id: Option<String> },

    #[error("{message}")]
    #[diagnostic(code(composerd::config))]
    Config {
        project_id: Option<String>,
        message: String,
    },

    #[error("{message}")]
    #[diagnostic(
        code(composerd::port),
        help("free the port or configure a different one for this project")
    )]
    Port {
        project_id: Option<String>,
        port: u16,
        message: String,
    },

    #[error("{message}")]
    #[diagnostic(code(composerd::startup), help("check the composerd logs for process output"))]
    Startup {
        project_id: Option<String>,
        message: String,
    },

    #[error("MCP Composer start was cancelled by a newer start request for the same project")]
    #[diagnostic(code(composerd::superseded))]
    Superseded { project_id: Option<String> },
}

impl ComposerError {
    pub fn disabled(project_id: Option<&str>) -> Self {
        Self::Disabled {
            project_id: project_id.map(str::to_string),
        }
    }

    pub fn config(project_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Config {
            project_id: project_id.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn port(project_id: Option<&str>, port: u16, message: impl Into<String>) -> Self {
        Self::Port {
            project_id: project_id.map(str::to_string),
            port,
            message: message.into(),
        }
    }

    pub fn superseded(project_id: Option<&str>) -> Self {
        Self::Superseded {
            project_id: project_id.map(str::to_string),
        }
    }

    /// A startup failure; an empty message becomes the generic startup message.
    pub fn startup(project_id: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            GENERIC_STARTUP_ERROR_MSG.to_string()
        } else {
            message
        };
        Self::Startup {
            project_id: project_id.map(str::to_string),
            message,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::Disabled { project_id }
            | Self::Superseded { project_id }
            | Self::Config { project_id, .. }
            | Self::Port { project_id, .. }
            | Self::Startup { project_id, .. } => project_id.as_deref(),
        }
    }

    /// Fills in the project id on errors raised below the project level.
    pub fn with_project(mut self, id: &str) -> Self {
        match &mut self {
            Self::Disabled { project_id }
            | Self::Superseded { project_id }
            | Self::Config { project_id, .. }
            | Self::Port { project_id, .. }
            | Self::Startup { project_id, .. } => {
                if project_id.is_none() {
                    *project_id = Some(id.to_string());
                }
            }
        }
        self
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Only startup failures are worth another launch attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Startup { .. })
    }
}

/// Every problem found in an OAuth configuration, collected in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Diagnostic)]
#[error("Invalid OAuth configuration: {}", describe_fields(missing, empty))]
#[diagnostic(
    code(composerd::config::oauth),
    help("fill in every required oauth_* field for this project")
)]
pub struct OAuthValidationError {
    pub missing: Vec<&'static str>,
    pub empty: Vec<&'static str>,
}

impl OAuthValidationError {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.empty.is_empty()
    }
}

fn describe_fields(missing: &[&str], empty: &[&str]) -> String {
    let mut parts = vec![];
    if !missing.is_empty() {
        parts.push(format!("Missing required fields: {}", missing.join(", ")));
    }
    if !empty.is_empty() {
        parts.push(format!("Empty required fields: {}", empty.join(", ")));
    }
    parts.join("; ")
}

impl From<OAuthValidationError> for ComposerError {
    fn from(err: OAuthValidationError) -> Self {
        ComposerError::config(None, err.to_string())
    }
}

/// Errors reading the project manifest used by `composerd run`.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("failed to read manifest: {}", path.display())]
    #[diagnostic(code(composerd::manifest::read_error))]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {}", path.display())]
    #[diagnostic(
        code(composerd::manifest::parse_error),
        help("check TOML syntax at https://toml.io")
    )]
    ParseError {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("manifest {} does not define any projects", path.display())]
    #[diagnostic(
        code(composerd::manifest::empty),
        help("add a [projects.<id>] section with an endpoint and an [projects.<id>.auth] table")
    )]
    NoProjects { path: std::path::PathBuf },
}
