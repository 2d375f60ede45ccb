use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use retrai::config::{DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL};

mod cmd;

#[derive(Parser)]
#[command(name = "retrai")]
#[command(version, about = "Self-solving agent loop: plan, act, evaluate until a goal is verified")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write JSON diagnostics to a daily-rotated file in this directory
    #[arg(long, global = true, env = "RETRAI_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent loop until the goal is achieved or iterations run out
    Run {
        /// Goal name (detected from project files when omitted)
        goal: Option<String>,

        /// Project directory
        #[arg(short = 'C', long, default_value = ".")]
        cwd: PathBuf,

        /// Model identifier
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,

        /// Maximum number of evaluate cycles
        #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: u32,

        /// Pause for approve/abort after every unsuccessful iteration
        #[arg(long)]
        hitl: bool,

        /// Append every run event to this JSONL file
        #[arg(long)]
        event_log: Option<PathBuf>,
    },
    /// Serve the REST API and per-run WebSocket event streams
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Persist suspension checkpoints in this directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Append every run event to this JSONL file
        #[arg(long)]
        event_log: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a separately served frontend)
        #[arg(long)]
        dev: bool,
    },
    /// List available goals
    Goals {
        /// Print only the goal detected for the project directory
        #[arg(long)]
        detect: bool,

        #[arg(short = 'C', long, default_value = ".")]
        cwd: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    if let Some(dir) = &cli.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    }
    let guard = retrai::logging::init(cli.verbose, cli.log_dir.as_deref());

    let achieved = match cli.command {
        Commands::Run {
            goal,
            cwd,
            model,
            max_iterations,
            hitl,
            event_log,
        } => {
            cmd::cmd_run(cmd::RunOptions {
                goal,
                cwd,
                model,
                max_iterations,
                hitl,
                event_log,
            })
            .await?
        }
        Commands::Serve {
            host,
            port,
            checkpoint_dir,
            event_log,
            dev,
        } => {
            cmd::cmd_serve(cmd::ServeOptions {
                host,
                port,
                checkpoint_dir,
                event_log,
                dev,
            })
            .await?;
            true
        }
        Commands::Goals { detect, cwd } => {
            cmd::cmd_goals(&cwd, detect)?;
            true
        }
    };

    drop(guard);
    if !achieved {
        std::process::exit(1);
    }
    Ok(())
}
