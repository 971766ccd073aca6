//! The `composer.toml` manifest read by `composerd run`.
//!
//! ```toml
//! [projects.docs]
//! endpoint = "http://localhost:7860/api/v1/mcp/project/docs"
//!
//! [projects.docs.auth]
//! auth_type = "oauth"
//! oauth_host = "localhost"
//! oauth_port = 9000
//! ```

use crate::auth_config::AuthConfig;
use crate::composer::Endpoint;
use crate::env;
use crate::error::ManifestError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE_NAME: &str = "composer.toml";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProjectsToml {
    #[serde(default)]
    pub projects: IndexMap<String, ProjectConfig>,
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

impl ProjectConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::with_legacy(&self.endpoint, self.legacy_endpoint.clone())
    }
}

impl ProjectsToml {
    pub fn default_path() -> PathBuf {
        env::CWD.join(DEFAULT_FILE_NAME)
    }

    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &raw)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, ManifestError> {
        let mut manifest: Self = toml::from_str(raw).map_err(|source| ManifestError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        if manifest.projects.is_empty() {
            return Err(ManifestError::NoProjects {
                path: path.to_path_buf(),
            });
        }
        manifest.path = Some(path.to_path_buf());
        trace!(
            "read {} project(s) from {}",
            manifest.projects.len(),
            path.display()
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let raw = r#"
[projects.docs]
endpoint = "http://localhost:7860/api/v1/mcp/project/docs"

[projects.docs.auth]
auth_type = "apikey"
api_key = "k"
host = "localhost"
port = 2000

[projects.search]
endpoint = "http://localhost:7860/search"
legacy_endpoint = "http://localhost:7860/search/legacy"
"#;
        let manifest = ProjectsToml::parse(Path::new("composer.toml"), raw).unwrap();
        assert_eq!(
            manifest.projects.keys().collect::<Vec<_>>(),
            vec!["docs", "search"]
        );

        let docs = &manifest.projects["docs"];
        assert_eq!(
            docs.endpoint().legacy_url,
            "http://localhost:7860/api/v1/mcp/project/docs/sse"
        );
        let Some(AuthConfig::ApiKey { port, .. }) = &docs.auth else {
            panic!("expected api key auth");
        };
        assert_eq!(port.as_deref(), Some("2000"));

        let search = &manifest.projects["search"];
        assert_eq!(search.auth, None);
        assert_eq!(
            search.endpoint().legacy_url,
            "http://localhost:7860/search/legacy"
        );
    }

    #[test]
    fn test_empty_manifest_is_an_error() {
        let err = ProjectsToml::parse(Path::new("composer.toml"), "").unwrap_err();
        assert!(matches!(err, ManifestError::NoProjects { .. }));
    }

    #[test]
    fn test_bad_auth_type_is_a_parse_error() {
        let raw = r#"
[projects.docs]
endpoint = "http://x"
auth = { auth_type = "kerberos" }
"#;
        let err = ProjectsToml::parse(Path::new("composer.toml"), raw).unwrap_err();
        assert!(matches!(err, ManifestError::ParseError { .. }));
    }
}
