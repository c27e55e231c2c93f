//! QuiverDB CLI
//!
//! Command-line tools for QuiverDB journals and namespaces.
//!
//! # Commands
//!
//! - `dump-wal` - Print the records of an update journal
//! - `inspect` - Summarize an update journal
//! - `bench` - Run a copy-on-write commit workload
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// QuiverDB command-line tools.
#[derive(Parser)]
#[command(name = "quiver")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the records of an update journal
    DumpWal {
        /// Path to the journal file
        #[arg(short, long)]
        path: PathBuf,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only print records of this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Summarize an update journal
    Inspect {
        /// Path to the journal file
        #[arg(short, long)]
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a copy-on-write commit workload
    Bench {
        /// Items per transaction
        #[arg(short, long, default_value = "10000")]
        items: usize,

        /// Number of transactions
        #[arg(short, long, default_value = "4")]
        transactions: usize,

        /// Concurrent reader threads
        #[arg(short, long, default_value = "2")]
        readers: usize,

        /// Write updates to a journal at this path
        #[arg(short, long)]
        journal: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::DumpWal {
            path,
            limit,
            namespace,
            format,
        } => {
            commands::dump_wal::run(&path, limit, namespace.as_deref(), format.parse()?)?;
        }
        Commands::Inspect { path, format } => {
            commands::inspect::run(&path, format.parse()?)?;
        }
        Commands::Bench {
            items,
            transactions,
            readers,
            journal,
        } => {
            let options = commands::bench::BenchOptions {
                items,
                transactions,
                readers,
                journal,
            };
            commands::bench::run(&options)?;
        }
        Commands::Version => {
            println!("QuiverDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("QuiverDB Core v{}", quiver_core::VERSION);
        }
    }

    Ok(())
}
