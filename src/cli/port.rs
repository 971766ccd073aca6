use crate::Result;
use crate::platform;
use crate::port::is_port_available;
use crate::procs::PROCS;
use crate::settings::Settings;

/// Shows whether a port is free, and which processes listen on it if not
#[derive(Debug, clap::Args)]
pub struct Port {
    port: u16,
}

impl Port {
    pub async fn run(&self) -> Result<()> {
        let port = self.port;
        if is_port_available(port) {
            println!("port {port} is {}", console::style("free").green());
            return Ok(());
        }
        println!("port {port} is {}", console::style("in use").red());

        let settings = Settings::load()?;
        let platform = platform::native(&settings.package);
        match platform.find_on_port(port).await {
            Ok(pids) if pids.is_empty() => println!("  no listening process found"),
            Ok(pids) => {
                PROCS.refresh_pids(&pids);
                for pid in pids {
                    let cmd = PROCS
                        .command_line(pid)
                        .unwrap_or_else(|| "<unknown>".into());
                    println!("  {pid}  {cmd}");
                }
            }
            Err(e) => warn!("could not list processes on port {port}: {e}"),
        }
        Ok(())
    }
}
