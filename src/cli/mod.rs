use crate::Result;
use clap::Parser;

mod check;
mod port;
mod reap;
mod run;

#[derive(Debug, clap::Parser)]
#[clap(name = "composerd", version, about = env!("CARGO_PKG_DESCRIPTION"))]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    Check(check::Check),
    Port(port::Port),
    Reap(reap::Reap),
    Run(run::Run),
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Check(check) => check.run().await,
        Command::Port(port) => port.run().await,
        Command::Reap(reap) => reap.run().await,
        Command::Run(run) => run.run().await,
    }
}
