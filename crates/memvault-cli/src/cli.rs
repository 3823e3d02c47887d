//! Clap CLI definitions for Memvault.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Memvault: keep one memory consistent across three stores.
#[derive(Parser)]
#[command(
    name = "memvault",
    version,
    about = "Memvault, a multi-store memory coordinator",
    long_about = "Memvault keeps a logical memory consistent across a relational \
                  metadata store, a vector index, and a relationship graph.\n\
                  Writes are durable the moment metadata accepts them; derived \
                  stores catch up in the background."
)]
pub struct Cli {
    /// Path to config file (default: ~/.memvault/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write the default config file under ~/.memvault/.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Store a new memory.
    Add {
        /// Owning user id.
        #[arg(long, short)]
        user: String,
        /// The memory text.
        text: String,
        /// Link this memory to an existing one (repeatable).
        #[arg(long = "relates-to")]
        relates_to: Vec<String>,
        /// Mark this memory as superseding an existing one.
        #[arg(long)]
        supersedes: Option<String>,
    },
    /// Fetch one memory by id.
    Get {
        /// Memory id (UUID).
        memory_id: String,
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
    },
    /// Replace a memory's text (bumps its version).
    Edit {
        /// Memory id (UUID).
        memory_id: String,
        /// Replacement text.
        text: String,
    },
    /// Similarity search over one user's memories.
    Search {
        /// Owning user id.
        #[arg(long, short)]
        user: String,
        /// Query text.
        query: String,
        /// Maximum number of results.
        #[arg(long, short = 'k', default_value_t = 5)]
        limit: usize,
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
    },
    /// Delete a memory everywhere.
    Forget {
        /// Memory id (UUID).
        memory_id: String,
    },
    /// Run one reconciliation pass (repairs + drift scan) and report.
    Reconcile,
    /// Start the long-running reconciler until interrupted.
    Watch,
    /// Show per-status record counts.
    Status {
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
    },
}
