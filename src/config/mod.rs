//! Configuration for the local runtime emulator
//!
//! Two small config surfaces exist:
//! - [`ServerConfig`] — the runtime API server (port + served function)
//! - [`RunnerConfig`] — where a function's source lives and where its
//!   build artifact goes
//!
//! CLI argument definitions live in [`args`] and merge into these
//! structs with CLI values winning over defaults.

pub mod args;

pub use args::ServerArgs;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default runtime API port.
pub const DEFAULT_PORT: u16 = 5001;

/// Default artifact directory, relative to the code directory.
pub const DEFAULT_BIN_DIR: &str = ".lambda-local/bin";

/// Invocation deadline granted to every dispatch: 15 minutes, the
/// platform maximum.
pub const DEFAULT_DEADLINE_MS: u64 = 900_000;

/// Identity of the function a server instance serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Stable function id; keys the pool and warm maps.
    pub id: String,
    /// Handler string as configured (used in build-failure messages).
    pub handler: String,
}

/// Runtime API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the runtime API binds on (loopback only).
    pub port: u16,
    /// The function this server instance serves.
    pub function: FunctionSpec,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            function: FunctionSpec::default(),
        }
    }
}

/// Source and artifact locations for one function's build toolchain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Unique key scoping the artifact path; avoids collisions when
    /// multiple functions share a workspace.
    pub function_key: String,
    /// Directory containing the handler source tree; builds run here
    /// and the watcher scans it.
    pub code_dir: PathBuf,
    /// Handler entry name.
    pub handler_name: String,
    /// Handler path within the code directory.
    pub handler_path: String,
    /// Directory receiving build artifacts.
    pub bin_dir: PathBuf,
}

impl RunnerConfig {
    /// Builds the runner config from CLI arguments, deriving the
    /// function key from the handler when no explicit id is given.
    pub fn from_args(args: &ServerArgs) -> Self {
        let function_key = if args.function_id.is_empty() {
            args.handler_path.replace(['/', '\\'], "-")
        } else {
            args.function_id.clone()
        };
        let bin_dir = args
            .bin_dir
            .clone()
            .unwrap_or_else(|| args.code_dir.join(DEFAULT_BIN_DIR));
        Self {
            function_key,
            code_dir: args.code_dir.clone(),
            handler_name: args.handler_name.clone(),
            handler_path: args.handler_path.clone(),
            bin_dir,
        }
    }
}

impl ServerConfig {
    /// Builds the server config from CLI arguments.
    pub fn from_args(args: &ServerArgs) -> Self {
        let runner = RunnerConfig::from_args(args);
        Self {
            port: args.port,
            function: FunctionSpec {
                id: runner.function_key.clone(),
                handler: format!("{}.{}", args.handler_path, args.handler_name),
            },
        }
    }
}
