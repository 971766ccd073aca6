#[macro_use]
extern crate log;

pub mod auth_config;
pub mod cli;
pub mod composer;
pub mod env;
pub mod error;
pub mod logger;
pub mod platform;
pub mod port;
pub mod procs;
pub mod projects_toml;
pub mod settings;
pub mod supervisor;

pub use miette::Result;
