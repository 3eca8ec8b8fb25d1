//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

/// Local emulator for the cloud function runtime API: builds a compiled
/// handler, keeps it warm across invocations, and rebuilds on change.
#[derive(Debug, Clone, Parser)]
#[command(name = "lambda-local", version, about)]
pub struct ServerArgs {
    /// Port for the runtime API server
    #[arg(long, default_value_t = super::DEFAULT_PORT)]
    pub port: u16,

    /// Directory containing the handler source tree
    #[arg(long, default_value = ".")]
    pub code_dir: PathBuf,

    /// Handler path within the code directory
    #[arg(long)]
    pub handler_path: String,

    /// Handler entry name
    #[arg(long, default_value = "main")]
    pub handler_name: String,

    /// Function id (defaults to a key derived from the handler path)
    #[arg(long, default_value = "")]
    pub function_id: String,

    /// Directory for build artifacts (defaults to
    /// <code-dir>/.lambda-local/bin)
    #[arg(long)]
    pub bin_dir: Option<PathBuf>,

    /// Disable the source watcher (no rebuild-on-change)
    #[arg(long)]
    pub no_watch: bool,

    /// Log filter, e.g. "info" or "lambda_local=debug"
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}
