//! Memvault CLI, the command-line interface for the memory coordinator.
//!
//! Every command boots an in-process vault from config, runs, and exits;
//! `memvault watch` stays up running the background reconciler.

mod cli;
mod cmd;

use clap::Parser;
use cli::{Cli, Commands};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_tracing();
    let config = args.config.as_deref();

    match args.command {
        Commands::Init { force } => cmd::cmd_init(force),
        Commands::Add {
            user,
            text,
            relates_to,
            supersedes,
        } => cmd::cmd_add(config, &user, &text, &relates_to, supersedes.as_deref()).await,
        Commands::Get { memory_id, json } => cmd::cmd_get(config, &memory_id, json).await,
        Commands::Edit { memory_id, text } => cmd::cmd_edit(config, &memory_id, &text).await,
        Commands::Search {
            user,
            query,
            limit,
            json,
        } => cmd::cmd_search(config, &user, &query, limit, json).await,
        Commands::Forget { memory_id } => cmd::cmd_forget(config, &memory_id).await,
        Commands::Reconcile => cmd::cmd_reconcile(config).await,
        Commands::Watch => cmd::cmd_watch(config).await,
        Commands::Status { json } => cmd::cmd_status(config, json).await,
    }
}
