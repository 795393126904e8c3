/*!

This is the command line interface for starting the containers and clusters used by integration
tests outside of a test run.

!*/

mod container;
mod kind;
mod mission_control;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use testkit::Settings;

/// Start and stop test infrastructure: containers, kind clusters and Mission Control checks.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Run or remove containers.
    Container(container::Container),
    /// Manage kind clusters.
    Kind(kind::Kind),
    /// Talk to a Mission Control instance.
    MissionControl(mission_control::MissionControl),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let settings =
        Settings::from_env().context("Unable to read testkit settings from the environment")?;
    match args.command {
        Command::Container(container) => container.run(&settings).await,
        Command::Kind(kind) => kind.run(&settings).await,
        Command::MissionControl(mission_control) => mission_control.run().await,
    }
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate and the library.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .filter(Some("testkit"), level)
                .init();
        }
    }
}
