//! Turns raw child output into user-facing startup errors, and keeps secrets
//! out of anything we log about the child's command line.

use crate::error::GENERIC_STARTUP_ERROR_MSG;
use once_cell::sync::Lazy;
use regex::Regex;

pub const REDACTED: &str = "***REDACTED***";

const SECRET_MARKERS: [&str; 3] = ["secret", "key", "token"];

/// Known failure signatures, checked in order. `{url}` is replaced with the
/// OAuth server URL.
static ERROR_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"address already in use", "Address {url} is already in use."),
        (
            r"permission denied",
            "Permission denied starting MCP Composer on address {url}.",
        ),
        (
            r"connection refused",
            "Connection refused on address {url}. The address may be blocked or unavailable.",
        ),
        (
            r"bind.*failed",
            "Failed to bind to address {url}. The address may be in use or unavailable.",
        ),
        (r"timeout", "MCP Composer startup timed out. Please try again."),
        (
            r"invalid.*configuration",
            "Invalid MCP Composer configuration. Please check your settings.",
        ),
        (
            r"oauth.*error",
            "OAuth configuration error. Please check your OAuth settings.",
        ),
        (
            r"authentication.*failed",
            "Authentication failed. Please check your credentials.",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, message)| match Regex::new(&format!("(?i){pattern}")) {
        Ok(re) => Some((re, message)),
        Err(e) => {
            error!("invalid error pattern '{pattern}': {e}");
            None
        }
    })
    .collect()
});

/// Maps captured output to a friendly message, falling back to the generic one.
pub fn classify(stdout: &str, stderr: &str, server_url: Option<&str>) -> String {
    let combined = format!("{stderr}\n{stdout}");
    let combined = combined.trim();
    let url = server_url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or("OAuth server URL");
    ERROR_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(combined))
        .map(|(_, message)| message.replace("{url}", url))
        .unwrap_or_else(|| GENERIC_STARTUP_ERROR_MSG.to_string())
}

pub fn is_secret_name(name: &str) -> bool {
    let name = name.to_lowercase();
    SECRET_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Replaces secret values in a command line with [`REDACTED`].
///
/// Handles `--env NAME VALUE` triples as well as `--some-secret VALUE` and
/// `--some-secret=VALUE` flags.
pub fn redact_command(args: &[String]) -> Vec<String> {
    let mut safe = Vec::with_capacity(args.len());
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg == "--env" && i + 2 < args.len() {
            let name = &args[i + 1];
            let value = if is_secret_name(name) {
                REDACTED.to_string()
            } else {
                args[i + 2].clone()
            };
            safe.extend([arg.clone(), name.clone(), value]);
            i += 3;
            continue;
        }
        if let Some(flag) = arg.strip_prefix("--") {
            if let Some((name, _)) = flag.split_once('=')
                && is_secret_name(name)
            {
                safe.push(format!("--{name}={REDACTED}"));
                i += 1;
                continue;
            }
            if is_secret_name(flag) && i + 1 < args.len() && !args[i + 1].starts_with("--") {
                safe.extend([arg.clone(), REDACTED.to_string()]);
                i += 2;
                continue;
            }
        }
        safe.push(arg.clone());
        i += 1;
    }
    safe
}

/// `NAME=value` for logging, with secret values hidden.
pub fn describe_env(env: &[(&str, String)]) -> String {
    env.iter()
        .map(|(name, _)| {
            if is_secret_name(name) {
                format!("{name}={REDACTED}")
            } else {
                name.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
