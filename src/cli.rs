use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Load directories of CSV files into MySQL tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import every CSV file in a directory into its destination table
    Import(ImportArgs),
    /// Resolve the configuration of one file and test its database connection
    Check(FileArgs),
    /// Print the CREATE TABLE statement a file's import would issue
    Plan(FileArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Directory containing the CSV files (defaults to the current directory)
    #[arg(default_value = ".")]
    pub dir: PathBuf,
    /// Global configuration file (defaults to csv2table.toml/.yaml/.yml in DIR)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FileArgs {
    /// CSV file to inspect
    pub file: PathBuf,
    /// Global configuration file (defaults to csv2table.toml/.yaml/.yml next to FILE)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
