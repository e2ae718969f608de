#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use clap::{Parser, ValueEnum};
use miette::Result;
use std::path::PathBuf;
use weft_core::{Config, Mode};

#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(author, version, about = "A module-graph bundler with a live-reload dev server", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Config file (default: weft.config.json or .weft.json in the working directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build the bundle into the output directory
    Build {
        /// Build mode (overrides the config file)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Output directory (overrides the config file)
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },

    /// Build, watch for changes and serve the output with live reload
    Dev {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Build mode (overrides the config file)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Output directory (overrides the config file)
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Development,
    Production,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Development => Mode::Development,
            ModeArg::Production => Mode::Production,
        }
    }
}

/// Apply command line overrides on top of the loaded config.
fn apply_overrides(mut config: Config, mode: Option<ModeArg>, out_dir: Option<PathBuf>) -> Config {
    if let Some(mode) = mode {
        config = config.with_mode(mode.into());
    }
    if let Some(dir) = out_dir {
        config = config.with_out_dir(dir);
    }
    config
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let cwd = cli
        .cwd
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Build { mode, out_dir } => {
            let span = tracing::info_span!("build", cmd = "build", cwd = %cwd.display());
            let _guard = span.enter();
            commands::build::run(&cwd, cli.config.as_deref(), |c| apply_overrides(c, mode, out_dir), cli.json)
        }
        Commands::Dev {
            port,
            mode,
            out_dir,
        } => {
            let config = commands::load_config(&cwd, cli.config.as_deref())?;
            let mut config = apply_overrides(config, mode, out_dir);
            if let Some(port) = port {
                config.dev_server.port = port;
            }
            let runtime = tokio::runtime::Runtime::new().map_err(|e| miette::miette!("{e}"))?;
            runtime.block_on(commands::dev::run(config))
        }
    }
}
