#![allow(dead_code)]

use composerd::auth_config::AuthConfig;
use composerd::platform::{PlatformStrategy, PosixStrategy};
use composerd::port::is_port_available;
use composerd::settings::Settings;
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

/// Get the path to a test script file
pub fn get_script_path(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("scripts")
        .join(file)
}

/// A port nothing is listening on right now
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Settings that launch `fake_composer.py` and poll quickly
pub fn fake_settings() -> Settings {
    Settings {
        command: vec!["python3".to_string()],
        package: get_script_path("fake_composer.py")
            .to_string_lossy()
            .to_string(),
        startup_checks: 50,
        startup_delay: "100ms".to_string(),
        retry_delay: "100ms".to_string(),
        stop_timeout: "2s".to_string(),
        kill_timeout: "2s".to_string(),
        drain_timeout: "500ms".to_string(),
        reap_timeout: "2s".to_string(),
        ..Default::default()
    }
}

/// Settings whose composer always exits with an error
pub fn failing_settings() -> Settings {
    Settings {
        command: vec!["sh".to_string()],
        package: get_script_path("failing_composer.sh")
            .to_string_lossy()
            .to_string(),
        max_retries: 2,
        ..fake_settings()
    }
}

/// Settings that run `fake_composer.py` as a grandchild behind a shell
pub fn wrapped_settings() -> Settings {
    Settings {
        command: vec![
            "sh".to_string(),
            get_script_path("wrapped_composer.sh")
                .to_string_lossy()
                .to_string(),
        ],
        ..fake_settings()
    }
}

pub fn apikey(key: &str, port: u16) -> Option<AuthConfig> {
    Some(AuthConfig::ApiKey {
        api_key: Some(key.to_string()),
        host: Some("127.0.0.1".to_string()),
        port: Some(port.to_string()),
    })
}

/// Whether `pid` still exists (zombies included)
pub fn pid_exists(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn kill_9(pid: u32) {
    std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
}

/// Pids listening on `port`
pub async fn listeners_on(port: u16) -> Vec<u32> {
    PosixStrategy.find_on_port(port).await.unwrap()
}

/// Polls until `port` is free, for up to two seconds
pub async fn wait_until_free(port: u16) -> bool {
    for _ in 0..20 {
        if is_port_available(port) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
