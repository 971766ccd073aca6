//! Per-project authentication configuration handed to the composer child.
//!
//! The config is a tagged union on `auth_type`. Only `oauth` configs carry
//! anything the child needs in its environment; `none` and `apikey` configs
//! just say where the child should listen.

use crate::error::{ComposerError, OAuthValidationError};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "auth_type", rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthConfig {
    None {
        #[serde(default)]
        host: Option<String>,
        #[serde(default, deserialize_with = "string_or_number")]
        port: Option<String>,
    },
    #[serde(rename = "apikey")]
    #[strum(serialize = "apikey")]
    ApiKey {
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        host: Option<String>,
        #[serde(default, deserialize_with = "string_or_number")]
        port: Option<String>,
    },
    #[serde(rename = "oauth")]
    #[strum(serialize = "oauth")]
    OAuth(OAuthConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub oauth_host: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub oauth_port: Option<String>,
    pub oauth_server_url: Option<String>,
    pub oauth_callback_path: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub oauth_auth_url: Option<String>,
    pub oauth_token_url: Option<String>,
    pub oauth_mcp_scope: Option<String>,
    pub oauth_provider_scope: Option<String>,
}

impl OAuthConfig {
    /// Fields that must be present and non-blank before a launch.
    fn required_fields(&self) -> [(&'static str, &Option<String>); 7] {
        [
            ("oauth_host", &self.oauth_host),
            ("oauth_port", &self.oauth_port),
            ("oauth_server_url", &self.oauth_server_url),
            ("oauth_auth_url", &self.oauth_auth_url),
            ("oauth_token_url", &self.oauth_token_url),
            ("oauth_client_id", &self.oauth_client_id),
            ("oauth_client_secret", &self.oauth_client_secret),
        ]
    }

    /// Every field, paired with the environment variable the child reads it from.
    fn env_fields(&self) -> [(&'static str, &Option<String>); 10] {
        [
            ("OAUTH_HOST", &self.oauth_host),
            ("OAUTH_PORT", &self.oauth_port),
            ("OAUTH_SERVER_URL", &self.oauth_server_url),
            ("OAUTH_CALLBACK_PATH", &self.oauth_callback_path),
            ("OAUTH_CLIENT_ID", &self.oauth_client_id),
            ("OAUTH_CLIENT_SECRET", &self.oauth_client_secret),
            ("OAUTH_AUTH_URL", &self.oauth_auth_url),
            ("OAUTH_TOKEN_URL", &self.oauth_token_url),
            ("OAUTH_MCP_SCOPE", &self.oauth_mcp_scope),
            ("OAUTH_PROVIDER_SCOPE", &self.oauth_provider_scope),
        ]
    }

    pub fn validate(&self) -> Result<(), OAuthValidationError> {
        let mut err = OAuthValidationError::default();
        for (name, value) in self.required_fields() {
            match value {
                None => err.missing.push(name),
                Some(v) if v.trim().is_empty() => err.empty.push(name),
                Some(_) => {}
            }
        }
        if err.is_empty() { Ok(()) } else { Err(err) }
    }
}

impl AuthConfig {
    pub fn is_oauth(&self) -> bool {
        matches!(self, AuthConfig::OAuth(_))
    }

    /// Checks the config is complete enough to launch. Non-OAuth configs always pass.
    pub fn validate(&self) -> Result<(), OAuthValidationError> {
        match self {
            AuthConfig::OAuth(oauth) => oauth.validate(),
            _ => Ok(()),
        }
    }

    /// Environment for the child. Blank values are never emitted.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let AuthConfig::OAuth(oauth) = self else {
            return vec![];
        };
        let mut env: Vec<(&'static str, String)> = oauth
            .env_fields()
            .into_iter()
            .filter_map(|(key, value)| non_blank(value).map(|v| (key, v.to_string())))
            .collect();
        env.push(("ENABLE_OAUTH", "True".to_string()));
        env
    }

    /// The public server URL, used to phrase classified startup errors.
    pub fn server_url(&self) -> Option<&str> {
        match self {
            AuthConfig::OAuth(oauth) => non_blank(&oauth.oauth_server_url),
            _ => None,
        }
    }

    /// Resolves the host and port the child should bind.
    pub fn bind_address(&self) -> Result<(String, u16), ComposerError> {
        let (label, host, port) = match self {
            AuthConfig::OAuth(oauth) => ("OAuth", &oauth.oauth_host, &oauth.oauth_port),
            AuthConfig::ApiKey { host, port, .. } => ("API key", host, port),
            AuthConfig::None { host, port } => ("composer", host, port),
        };
        let Some(port) = non_blank(port) else {
            return Err(ComposerError::config(None, format!("No {label} port provided")));
        };
        let port: u16 = port.trim().parse().map_err(|_| {
            ComposerError::config(None, format!("Invalid {label} port: {port}"))
        })?;
        let Some(host) = non_blank(host) else {
            return Err(ComposerError::config(None, format!("No {label} host provided")));
        };
        Ok((host.trim().to_string(), port))
    }

    /// Values that decide whether a running instance must be relaunched.
    fn restart_fields(&self) -> Vec<(&'static str, &Option<String>)> {
        match self {
            AuthConfig::OAuth(oauth) => vec![
                ("oauth_host", &oauth.oauth_host),
                ("oauth_port", &oauth.oauth_port),
                ("oauth_server_url", &oauth.oauth_server_url),
                ("oauth_callback_path", &oauth.oauth_callback_path),
                ("oauth_client_id", &oauth.oauth_client_id),
                ("oauth_client_secret", &oauth.oauth_client_secret),
                ("oauth_auth_url", &oauth.oauth_auth_url),
                ("oauth_token_url", &oauth.oauth_token_url),
                ("oauth_mcp_scope", &oauth.oauth_mcp_scope),
                ("oauth_provider_scope", &oauth.oauth_provider_scope),
            ],
            AuthConfig::ApiKey {
                api_key,
                host,
                port,
            } => vec![("api_key", api_key), ("host", host), ("port", port)],
            AuthConfig::None { host, port } => vec![("host", host), ("port", port)],
        }
    }
}

/// Whether `new` differs from `old` in a way that requires a relaunch.
///
/// Absent and empty values compare equal.
pub fn auth_config_changed(old: Option<&AuthConfig>, new: Option<&AuthConfig>) -> bool {
    let (old, new) = match (old, new) {
        (None, None) => return false,
        (Some(old), Some(new)) => (old, new),
        _ => return true,
    };
    if std::mem::discriminant(old) != std::mem::discriminant(new) {
        return true;
    }
    old.restart_fields()
        .into_iter()
        .zip(new.restart_fields())
        .any(|((name, a), (_, b))| {
            let changed = normalized(a) != normalized(b);
            if changed {
                trace!("auth config field {name} changed");
            }
            changed
        })
}

fn normalized(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Ports show up as both `9000` and `"9000"` in configs.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
    }))
}
