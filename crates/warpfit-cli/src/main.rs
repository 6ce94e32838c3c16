use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "warpfit",
    about = "WarpGrid node fit evaluator",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to warpfit.toml (default: built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a set of allocations fits on a node and score it.
    ///
    /// The node is a JSON object; allocations are a JSON array.
    Fit {
        /// Node JSON file
        #[arg(short, long)]
        node: PathBuf,
        /// Allocations JSON file
        #[arg(short, long)]
        allocs: PathBuf,
        /// Also check device oversubscription
        #[arg(long)]
        check_devices: bool,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Parse a port spec such as "22,8000-8100"
    Ports {
        spec: String,
    },
    /// Pick host ports for a network ask on a node
    Assign {
        /// Node JSON file
        #[arg(short, long)]
        node: PathBuf,
        /// Existing allocations JSON file
        #[arg(short, long)]
        allocs: Option<PathBuf>,
        /// Network ask JSON file
        #[arg(long)]
        ask: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Compute when a failed allocation may be rescheduled
    Reschedule {
        /// Allocation JSON file (with reschedule_policy)
        #[arg(short, long)]
        alloc: PathBuf,
        /// Current time as unix seconds (default: now)
        #[arg(long)]
        now: Option<u64>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warpfit=info".parse()?)
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Fit { node, allocs, check_devices, format } => {
            commands::fit::fit(&config, &node, &allocs, check_devices, &format)
        }
        Commands::Ports { spec } => commands::ports::ports(&spec),
        Commands::Assign { node, allocs, ask, format } => {
            commands::assign::assign(&config, &node, allocs.as_deref(), &ask, &format)
        }
        Commands::Reschedule { alloc, now, format } => {
            commands::reschedule::reschedule(&alloc, now, &format)
        }
    }
}
