mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabpilot")]
#[command(about = "Execute browser action plans against local tabs and a remote tool bridge", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file (JSON or YAML)
    Run {
        /// Path to the plan file
        plan: PathBuf,

        /// Bridge WebSocket endpoint (overrides config)
        #[arg(long)]
        bridge: Option<String>,

        /// Attach to a running browser's CDP port instead of launching one
        #[arg(long)]
        attach: Option<u16>,

        /// Launch the browser with a visible window
        #[arg(long)]
        headed: bool,
    },

    /// List open tabs of a running browser
    Tabs {
        /// CDP port of the browser to attach to
        #[arg(long, default_value_t = 9222)]
        attach: u16,
    },

    /// Run environment diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            plan,
            bridge,
            attach,
            headed,
        } => {
            commands::run::run(plan, bridge, attach, headed).await?;
        }
        Commands::Tabs { attach } => {
            commands::tabs::run(attach).await?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
    }

    Ok(())
}
