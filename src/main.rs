use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fieldsync::queue::QueueName;

mod cmd;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(version, about = "Durable offline action queue")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Queue database path. Overrides fieldsync.toml and FIELDSYNC_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .fieldsync directory, default config and queue store
    Init,
    /// Persist a mutation in a queue
    Enqueue {
        /// Target queue: timesheets, expenses, location
        queue: QueueName,
        /// Record identifier (defaults to a generated UUID)
        #[arg(long)]
        id: Option<String>,
        /// JSON object payload (reads stdin when omitted)
        #[arg(long)]
        payload: Option<String>,
    },
    /// List queued records in insertion order
    List {
        queue: QueueName,
        #[arg(long)]
        json: bool,
    },
    /// Remove one record; absent ids are not an error
    Remove { queue: QueueName, id: String },
    /// Deliver queued records to the remote API
    Flush {
        /// Queue to flush (all queues when omitted)
        queue: Option<QueueName>,
        #[arg(long)]
        json: bool,
    },
    /// Delete every record in a queue
    Purge {
        queue: QueueName,
        #[arg(long)]
        force: bool,
    },
    /// Show pending counts per queue
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print the sync trigger tags the host must register
    Tags,
    /// Run the HTTP trigger server
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default fieldsync.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    fieldsync::logging::init(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config =
        fieldsync::config::FieldsyncConfig::with_cli_args(project_dir, cli.db_path.clone())?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config).await?,
        Commands::Enqueue { queue, id, payload } => {
            cmd::cmd_enqueue(&config, *queue, id.clone(), payload.clone()).await?
        }
        Commands::List { queue, json } => cmd::cmd_list(&config, *queue, *json).await?,
        Commands::Remove { queue, id } => cmd::cmd_remove(&config, *queue, id).await?,
        Commands::Flush { queue, json } => cmd::cmd_flush(&config, *queue, *json).await?,
        Commands::Purge { queue, force } => cmd::cmd_purge(&config, *queue, *force).await?,
        Commands::Status { json } => cmd::cmd_status(&config, *json).await?,
        Commands::Tags => cmd::cmd_tags(),
        Commands::Serve { bind } => cmd::cmd_serve(&config, bind.as_deref()).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
