//! Command-line interface (clap).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gatewarden")]
#[command(about = "Defensive reverse proxy - per-endpoint request filtering and IP reputation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy in front of the origin
    Start {
        /// Path to the project file
        #[arg(long, default_value = "public/current_project.json")]
        project_file: PathBuf,
        /// Directory served under /public/ for the local operator
        #[arg(long, default_value = "public")]
        public_dir: PathBuf,
    },
    /// Show the status of a running proxy
    Status,
    /// Tell a running proxy to re-read its project file
    Reload,
}
