//! RoboFocus INDI driver
//!
//! Started by an INDI server, which talks to it over stdin/stdout:
//!
//! ```bash
//! indiserver indi_robofocus
//! ```
//!
//! Logs go to stderr. `RUST_LOG` overrides the level picked by `-v`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use lodestar_drivers::RoboFocus;
use lodestar_indi::{drop_privileges, run_stdio, Dispatcher, DriverOptions, IndiContext};

#[derive(Parser)]
#[command(name = "indi_robofocus")]
#[command(about = "INDI driver for the RoboFocus focuser", long_about = None)]
struct Cli {
    /// More log output; repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of ~/.indi/RoboFocus_config.xml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port the controller is attached to
    #[arg(long)]
    port: Option<String>,

    /// Talk to a simulated controller instead of a serial port
    #[arg(long)]
    simulation: bool,
}

fn init_logging(options: &DriverOptions) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.log_level()));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = DriverOptions {
        verbosity: cli.verbose,
        config_file: cli.config,
        ..Default::default()
    };
    init_logging(&options);

    if let Err(e) = drop_privileges() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let ctx = IndiContext::stdout();
    let mut driver = RoboFocus::new(&options, cli.port, cli.simulation)?;
    let dispatcher = Dispatcher::new().verbose(options.verbose());

    if let Err(e) = runtime.block_on(run_stdio(&ctx, &mut driver, &dispatcher)) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}
