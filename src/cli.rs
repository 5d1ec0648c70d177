use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::core::Engine;

#[derive(Parser)]
#[command(name = "codefinder")]
#[command(about = "Project-aware code index and tool-calling assistant")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Workspace root (defaults to project.root from the config)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config and state directory
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Build or refresh the index and pattern graph
    Index {
        /// Rebuild from scratch instead of reconciling
        #[arg(long)]
        full: bool,
    },

    /// Apply known file changes to the index
    Update {
        /// Files that were created or modified
        #[arg(long, num_args = 1..)]
        changed: Vec<PathBuf>,

        /// Files that were removed
        #[arg(long, num_args = 1..)]
        deleted: Vec<PathBuf>,
    },

    /// Print the project context for a file and/or request
    Context {
        /// Workspace-relative path of the file being edited
        #[arg(long)]
        active: Option<String>,

        /// Free-text request used to pick matching files
        #[arg(long)]
        query: Option<String>,
    },

    /// Rank indexed files against a query
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List the tools offered to the model
    Tools,

    /// Ask the assistant a question about the workspace
    Ask {
        question: String,

        /// Workspace-relative path of the file being edited
        #[arg(long)]
        active: Option<String>,

        /// Write proposed edits to disk
        #[arg(long)]
        apply: bool,
    },

    /// Keep the index current as files change
    Watch,
}

impl Cli {
    pub async fn execute(self, engine: Engine, cancel: CancellationToken) -> Result<()> {
        match self.command {
            Commands::Init { force } => engine.init(force).await,
            Commands::Index { full } => engine.index(full).await,
            Commands::Update { changed, deleted } => {
                if changed.is_empty() && deleted.is_empty() {
                    anyhow::bail!("Nothing to update: pass --changed and/or --deleted");
                }
                engine.update(changed, deleted).await
            }
            Commands::Context { active, query } => engine.context(active, query).await,
            Commands::Search { query, limit } => engine.search(&query, limit).await,
            Commands::Tools => engine.tools(),
            Commands::Ask { question, active, apply } => {
                engine.ask(&question, active, apply, cancel).await
            }
            Commands::Watch => engine.watch(cancel).await,
        }
    }
}
