//! Agent Warden - AI Agent Governance Engine
//!
//! Scores AI agents (Vertex, Copilot, custom pipelines) on risk signals
//! and gates their actions behind policy checks and human approvals.

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod cli;

/// Agent Warden - AI Agent Governance Engine
#[derive(Parser)]
#[command(name = "agent-warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the governance engine HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8400")]
        port: u16,

        /// SQLite database path
        #[arg(long, default_value = "agent-warden.db")]
        db: String,

        /// Seed configuration file applied on first boot
        #[arg(long, default_value = "config/seed.yaml")]
        seed: String,
    },

    /// Show status of a running server
    Status {
        /// Port the server listens on
        #[arg(short, long, default_value = "8400")]
        port: u16,
    },

    /// Rescore every agent and print the drift report
    Recompute {
        /// SQLite database path
        #[arg(long, default_value = "agent-warden.db")]
        db: String,
    },

    /// List governed agents with their current band and score
    Agents {
        /// SQLite database path
        #[arg(long, default_value = "agent-warden.db")]
        db: String,
    },

    /// Run one decision check for an agent and action
    Check {
        /// Agent to evaluate
        agent_id: String,
        /// Action the agent wants to perform
        action: String,

        /// SQLite database path
        #[arg(long, default_value = "agent-warden.db")]
        db: String,

        /// Requester recorded on any opened approval
        #[arg(long, default_value = "cli")]
        requested_by: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve { port, db, seed } => {
            info!("🛡️ Starting Agent Warden governance engine...");
            cli::serve::run(port, &db, &seed).await?;
        }
        Commands::Status { port } => {
            cli::status::run(port).await?;
        }
        Commands::Recompute { db } => {
            cli::recompute::run(&db).await?;
        }
        Commands::Agents { db } => {
            cli::agents::run(&db).await?;
        }
        Commands::Check {
            agent_id,
            action,
            db,
            requested_by,
        } => {
            cli::check::run(&agent_id, &action, &db, &requested_by).await?;
        }
    }

    Ok(())
}
