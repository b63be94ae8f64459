//! buildcentral CLI - cross-architecture build orchestrator

use camino::Utf8PathBuf;
use clap::Parser;
use miette::Result;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use buildcentral::commands;

/// buildcentral - build packages of a multi-architecture project
#[derive(Debug, Parser)]
#[command(name = "buildcentral")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Project root directory (guessed from the current directory by default)
    #[arg(long, global = true)]
    project_root: Option<Utf8PathBuf>,

    /// Directory holding build_central.cfg
    #[arg(long, global = true)]
    config_dir: Option<Utf8PathBuf>,

    #[command(flatten)]
    build: commands::build::BuildArgs,
}

fn main() -> Result<()> {
    // Initialize tracing with indicatif layer for progress bar support
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Create indicatif layer for progress bars
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .with(filter)
        .init();

    let cli = Cli::parse();

    let location = commands::build::Location {
        project_root: cli.project_root,
        config_dir: cli.config_dir,
    };
    commands::build::run(location, cli.build)
}
