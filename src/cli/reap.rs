use crate::Result;
use crate::platform;
use crate::settings::Settings;
use std::collections::HashSet;

/// Kills orphaned MCP Composer processes still listening on a port
///
/// Use this after a crash left a composer behind. On Windows only processes
/// whose command line names the composer package are touched.
#[derive(Debug, clap::Args)]
pub struct Reap {
    port: u16,
}

impl Reap {
    pub async fn run(&self) -> Result<()> {
        let settings = Settings::load()?;
        let platform = platform::native(&settings.package);
        let killed = platform
            .reap_on_port(self.port, &HashSet::new(), settings.reap_timeout())
            .await;
        if killed {
            println!("killed orphaned process(es) on port {}", self.port);
        } else {
            println!("nothing to reap on port {}", self.port);
        }
        Ok(())
    }
}
