use super::diagnostics::{classify, describe_env, redact_command};
use super::{CapturedOutput, ComposerProcess, Endpoint};
use crate::auth_config::AuthConfig;
use crate::error::ComposerError;
use crate::platform::OutputMode;
use crate::settings::Settings;
use std::process::Stdio;
use tokio::process::Command;

/// Builds and spawns composer children.
#[derive(Debug, Clone)]
pub struct Launcher {
    /// Program plus leading args, e.g. `["uvx"]`
    command: Vec<String>,
    /// Package with version specifier, e.g. `mcp-composer==0.2.1`
    package: String,
    output_mode: OutputMode,
}

impl Launcher {
    pub fn new(command: Vec<String>, package: impl Into<String>, output_mode: OutputMode) -> Self {
        Self {
            command,
            package: package.into(),
            output_mode,
        }
    }

    pub fn from_settings(settings: &Settings, output_mode: OutputMode) -> Self {
        Self::new(settings.command.clone(), settings.package_spec(), output_mode)
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// The full argument vector, program first.
    pub fn argv(&self, host: &str, port: u16, endpoint: &Endpoint, auth: &AuthConfig) -> Vec<String> {
        let port = port.to_string();
        let mut argv = self.command.clone();
        argv.push(self.package.clone());
        argv.extend(
            [
                "--port",
                port.as_str(),
                "--host",
                host,
                "--mode",
                "http",
                "--endpoint",
                endpoint.url.as_str(),
                "--sse-url",
                endpoint.legacy_url.as_str(),
                "--disable-composer-tools",
            ]
            .map(String::from),
        );
        if auth.is_oauth() {
            argv.extend(["--auth_type", "oauth"].map(String::from));
        }
        argv
    }

    /// Spawns one child. Its output is captured according to the output mode.
    pub fn launch(
        &self,
        project_id: &str,
        host: &str,
        port: u16,
        endpoint: &Endpoint,
        auth: &AuthConfig,
    ) -> Result<ComposerProcess, ComposerError> {
        let argv = self.argv(host, port, endpoint, auth);
        let Some((program, args)) = argv.split_first() else {
            return Err(ComposerError::config(
                Some(project_id),
                "No MCP Composer launch command configured",
            ));
        };
        let safe_command = shell_words::join(redact_command(&argv));
        let env = auth.env_vars();
        debug!("{project_id}: starting MCP Composer with command: {safe_command}");
        if !env.is_empty() {
            debug!("{project_id}: composer environment: {}", describe_env(&env));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let spawn_error = |e: std::io::Error| {
            error!("{project_id}: failed to spawn MCP Composer: {e}");
            error!("  - Command: {safe_command}");
            ComposerError::startup(
                Some(project_id),
                classify("", &e.to_string(), auth.server_url()),
            )
        };
        let mut output = CapturedOutput::prepare(self.output_mode, &mut cmd).map_err(spawn_error)?;
        let mut child = cmd.spawn().map_err(spawn_error)?;
        output.attach(&mut child);

        let process = ComposerProcess::new(child, output, safe_command);
        debug!(
            "{project_id}: MCP Composer process started with pid {} ({} output)",
            process.pid(),
            self.output_mode
        );
        Ok(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_config::OAuthConfig;

    fn oauth() -> AuthConfig {
        AuthConfig::OAuth(OAuthConfig {
            oauth_host: Some("localhost".into()),
            oauth_port: Some("9000".into()),
            oauth_client_secret: Some("hunter2".into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_argv_shape() {
        let launcher = Launcher::new(vec!["uvx".into()], "mcp-composer==0.2.1", OutputMode::Pipes);
        let endpoint = Endpoint::new("http://localhost:7860/api/v1/mcp/project/p1");
        let apikey = AuthConfig::ApiKey {
            api_key: Some("k".into()),
            host: None,
            port: None,
        };
        assert_eq!(
            launcher.argv("localhost", 2000, &endpoint, &apikey),
            vec![
                "uvx",
                "mcp-composer==0.2.1",
                "--port",
                "2000",
                "--host",
                "localhost",
                "--mode",
                "http",
                "--endpoint",
                "http://localhost:7860/api/v1/mcp/project/p1",
                "--sse-url",
                "http://localhost:7860/api/v1/mcp/project/p1/sse",
                "--disable-composer-tools",
            ]
        );

        let argv = launcher.argv("localhost", 9000, &endpoint, &oauth());
        assert_eq!(argv[argv.len() - 2..], ["--auth_type", "oauth"]);
        assert!(!argv.iter().any(|a| a.contains("hunter2")));
    }

    #[test]
    fn test_from_settings() {
        let settings = Settings {
            command: vec!["uv".into(), "tool".into(), "run".into()],
            version: "==1.0".into(),
            ..Default::default()
        };
        let launcher = Launcher::from_settings(&settings, OutputMode::TempFiles);
        let argv = launcher.argv("h", 1, &Endpoint::new("u"), &oauth());
        assert_eq!(argv[..4], ["uv", "tool", "run", "mcp-composer==1.0"]);
        assert!(launcher.output_mode().is_temp_files());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_startup_error() {
        let launcher = Launcher::new(
            vec!["/nonexistent/composerd-test-launcher".into()],
            "mcp-composer",
            OutputMode::Pipes,
        );
        let err = launcher
            .launch("p1", "localhost", 2000, &Endpoint::new("u"), &oauth())
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.project_id(), Some("p1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_reaches_child() {
        // "$0" is the package argument; the script ignores the rest
        let launcher = Launcher::new(
            vec![
                "sh".into(),
                "-c".into(),
                "echo \"$OAUTH_HOST $OAUTH_PORT $ENABLE_OAUTH ${OAUTH_MCP_SCOPE-unset}\"".into(),
            ],
            "mcp-composer",
            OutputMode::Pipes,
        );
        let mut process = launcher
            .launch("p1", "localhost", 9000, &Endpoint::new("u"), &oauth())
            .unwrap();
        assert!(process.command_line().contains("--port 9000"));
        let (stdout, _) = process
            .drain_and_close(std::time::Duration::from_secs(2))
            .await;
        assert_eq!(stdout.trim(), "localhost 9000 True unset");
    }
}
