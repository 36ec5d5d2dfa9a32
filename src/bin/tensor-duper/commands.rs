use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tensor-duper")]
#[command(about = "Finds duplicate tensor weight files", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to Config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan, group and verify tensor files, resuming from the checkpoint
    Process {
        /// Directory to scan
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Directory holding the checkpoint tables
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        /// Number of scan workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Print summary counts from the checkpoint tables
    Status,
    /// Write confirmed duplicates to a CSV file
    ExportDuplicates {
        /// Output CSV path
        output: PathBuf,
    },
    /// Print configuration values
    PrintConfig,
    /// Delete all checkpoint tables
    ResetCheckpoint,
}

impl Commands {
    /// Kebab-case name, as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Process { .. } => "process",
            Commands::Status => "status",
            Commands::ExportDuplicates { .. } => "export-duplicates",
            Commands::PrintConfig => "print-config",
            Commands::ResetCheckpoint => "reset-checkpoint",
        }
    }
}
