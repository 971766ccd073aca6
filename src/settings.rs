//! User-configurable settings for composerd.
//!
//! Settings are read, in order of precedence, from:
//! 1. Environment variables (`COMPOSERD_ENABLED`, `COMPOSERD_VERSION`)
//! 2. The config file (`COMPOSERD_CONFIG`, default `~/.config/composerd/config.toml`)
//! 3. Built-in defaults
//!
//! Example config.toml:
//! ```toml
//! enabled = true
//! version = "==0.2.1"
//! max_retries = 3
//! startup_checks = 40
//! startup_delay = "2s"
//! ```

use crate::{Result, env};
use miette::IntoDiagnostic;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gate for every supervisor operation
    pub enabled: bool,
    /// Program (and leading arguments) used to run the composer package
    pub command: Vec<String>,
    /// Package to run; also the marker used to recognise orphaned children
    pub package: String,
    /// Version specifier appended to the package, e.g. "==0.2.1"
    pub version: String,
    pub max_retries: u32,
    pub startup_checks: u32,
    pub startup_delay: String,
    pub retry_delay: String,
    pub stop_timeout: String,
    pub kill_timeout: String,
    pub drain_timeout: String,
    pub reap_timeout: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["uvx".to_string()],
            package: "mcp-composer".to_string(),
            version: String::new(),
            max_retries: 3,
            startup_checks: 40,
            startup_delay: "2s".to_string(),
            retry_delay: "2s".to_string(),
            stop_timeout: "2s".to_string(),
            kill_timeout: "2s".to_string(),
            drain_timeout: "2s".to_string(),
            reap_timeout: "5s".to_string(),
        }
    }
}

impl Settings {
    /// Loads the config file (if any) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = Self::read(&*env::COMPOSERD_CONFIG)?;
        if let Some(enabled) = *env::COMPOSERD_ENABLED {
            settings.enabled = enabled;
        }
        if let Some(version) = env::COMPOSERD_VERSION.as_ref() {
            settings.version = version.clone();
        }
        Ok(settings)
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            trace!("no settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = xx::file::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).into_diagnostic()
    }

    pub fn parse_duration(s: &str) -> Option<Duration> {
        humantime::parse_duration(s.trim()).ok()
    }

    fn duration_or(&self, value: &str, key: &str, default: Duration) -> Duration {
        Self::parse_duration(value).unwrap_or_else(|| {
            warn!("invalid duration for {key}: {value:?}, using {default:?}");
            default
        })
    }

    pub fn startup_delay(&self) -> Duration {
        self.duration_or(&self.startup_delay, "startup_delay", Duration::from_secs(2))
    }

    pub fn retry_delay(&self) -> Duration {
        self.duration_or(&self.retry_delay, "retry_delay", Duration::from_secs(2))
    }

    pub fn stop_timeout(&self) -> Duration {
        self.duration_or(&self.stop_timeout, "stop_timeout", Duration::from_secs(2))
    }

    pub fn kill_timeout(&self) -> Duration {
        self.duration_or(&self.kill_timeout, "kill_timeout", Duration::from_secs(2))
    }

    pub fn drain_timeout(&self) -> Duration {
        self.duration_or(&self.drain_timeout, "drain_timeout", Duration::from_secs(2))
    }

    pub fn reap_timeout(&self) -> Duration {
        self.duration_or(&self.reap_timeout, "reap_timeout", Duration::from_secs(5))
    }

    /// The package argument handed to the launcher, e.g. `mcp-composer==0.2.1`.
    pub fn package_spec(&self) -> String {
        format!("{}{}", self.package, self.version.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert!(settings.enabled);
        assert_eq!(settings.command, vec!["uvx"]);
        assert_eq!(settings.package, "mcp-composer");
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.startup_checks, 40);
        assert_eq!(settings.startup_delay(), Duration::from_secs(2));
        assert_eq!(settings.retry_delay(), Duration::from_secs(2));
        assert_eq!(settings.stop_timeout(), Duration::from_secs(2));
        assert_eq!(settings.drain_timeout(), Duration::from_secs(2));
        assert_eq!(settings.reap_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_startup_budget_is_80_seconds() {
        let settings = Settings::default();
        assert_eq!(
            settings.startup_delay() * settings.startup_checks,
            Duration::from_secs(80)
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(Settings::parse_duration("1s"), Some(Duration::from_secs(1)));
        assert_eq!(
            Settings::parse_duration("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            Settings::parse_duration("1m"),
            Some(Duration::from_secs(60))
        );
        assert_eq!(Settings::parse_duration("invalid"), None);
    }

    #[test]
    fn test_load_from_toml_string() {
        let toml_content = r#"
enabled = false
command = ["uv", "tool", "run"]
version = "==0.2.1"
max_retries = 5
startup_delay = "500ms"
"#;
        let settings = Settings::parse(toml_content).unwrap();
        assert!(!settings.enabled);
        assert_eq!(settings.command, vec!["uv", "tool", "run"]);
        assert_eq!(settings.package_spec(), "mcp-composer==0.2.1");
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.startup_delay(), Duration::from_millis(500));
        // untouched keys keep their defaults
        assert_eq!(settings.startup_checks, 40);
        assert_eq!(settings.reap_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_duration_falls_back() {
        let settings = Settings {
            stop_timeout: "soon".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.stop_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_read_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::read(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
