use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sweeper")]
#[command(about = "Watches a volume's change journal and proposes cleanups", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Monitor the change journal until Ctrl-C
    Watch {
        /// Volume to watch, overrides the configured one (e.g. "D" or "D:")
        #[arg(long)]
        volume: Option<String>,
    },
    /// Analyze folders now and review the proposed cleanup
    Analyze {
        #[arg(required = true)]
        folders: Vec<String>,
        /// Reason recorded with the session
        #[arg(long, default_value = "manual")]
        reason: String,
        /// Approve without prompting
        #[arg(long)]
        yes: bool,
    },
    /// Delete files or directories directly
    Clean {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// List stored cleanup reports
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Also export the listed reports to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}
