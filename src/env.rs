use once_cell::sync::Lazy;
pub use std::env::*;
use std::path::PathBuf;

pub static CWD: Lazy<PathBuf> = Lazy::new(|| current_dir().unwrap_or_else(|_| PathBuf::from(".")));

pub static HOME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::home_dir().unwrap_or_else(|| {
        eprintln!("Warning: Could not determine home directory");
        PathBuf::from("/tmp")
    })
});
pub static COMPOSERD_CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    var_path("COMPOSERD_CONFIG_DIR").unwrap_or(HOME_DIR.join(".config").join("composerd"))
});
pub static COMPOSERD_CONFIG: Lazy<PathBuf> = Lazy::new(|| {
    var_path("COMPOSERD_CONFIG").unwrap_or(COMPOSERD_CONFIG_DIR.join("config.toml"))
});
pub static COMPOSERD_LOG: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("COMPOSERD_LOG").unwrap_or(log::LevelFilter::Info));
pub static COMPOSERD_LOG_FILE_LEVEL: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("COMPOSERD_LOG_FILE_LEVEL").unwrap_or(*COMPOSERD_LOG));
pub static COMPOSERD_LOG_FILE: Lazy<Option<PathBuf>> = Lazy::new(|| var_path("COMPOSERD_LOG_FILE"));

// Overrides for the settings file, applied after it is read
pub static COMPOSERD_ENABLED: Lazy<Option<bool>> = Lazy::new(|| var_bool("COMPOSERD_ENABLED"));
pub static COMPOSERD_VERSION: Lazy<Option<String>> = Lazy::new(|| var("COMPOSERD_VERSION").ok());

fn var_path(name: &str) -> Option<PathBuf> {
    var(name).map(PathBuf::from).ok()
}

fn var_log_level(name: &str) -> Option<log::LevelFilter> {
    var(name).ok().and_then(|level| level.parse().ok())
}

fn var_bool(name: &str) -> Option<bool> {
    var(name)
        .ok()
        .map(|val| val.to_lowercase())
        .and_then(|val| match val.as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
}
