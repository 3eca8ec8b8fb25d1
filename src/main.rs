//! lambda-local — local cloud-function runtime emulator
//!
//! Serves the runtime API for one compiled handler, keeping workers warm
//! across invocations and rebuilding the artifact when source changes.

use clap::Parser;
use lambda_local::config::{RunnerConfig, ServerArgs, ServerConfig};
use lambda_local::runner::Runner;
use lambda_local::Result;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServerArgs::parse();

    let filter = EnvFilter::try_new(&args.log_filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ServerArgs) -> Result<()> {
    let server_config = ServerConfig::from_args(&args);
    let runner_config = RunnerConfig::from_args(&args);
    info!(
        function = %server_config.function.id,
        port = server_config.port,
        code_dir = %runner_config.code_dir.display(),
        "starting local runtime"
    );

    let runner = Runner::new(&server_config, runner_config).with_env(std::env::vars().collect());
    let server = runner.spawn_server();

    let watcher = if args.no_watch {
        None
    } else {
        Some(runner.spawn_watcher())
    };

    tokio::select! {
        result = server => {
            // The server task only returns on bind/serve failure.
            result.map_err(|e| lambda_local::LocalRuntimeError::Server(e.to_string()))??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    if let Some((shutdown_tx, task)) = watcher {
        let _ = shutdown_tx.send(true);
        let _ = task.await;
    }
    runner.shutdown();
    Ok(())
}
