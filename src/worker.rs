//! Worker process supervision
//!
//! Spawns one OS process per worker instance, streams its stdout/stderr
//! into the tracing log sink, and reaps it on exit. The pool owns the
//! only handle to a live worker; the supervisor task here reacts to
//! either the process exiting on its own or the pool asking for a kill
//! (drain), and in both cases performs the single "exited" transition.

use crate::error::{LocalRuntimeError, Result};
use crate::pool::{RuntimeState, WorkerHandle};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Fully resolved command for one worker process: program, arguments,
/// and the already-merged environment.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Spawns a worker process and registers it in the function's pool.
///
/// stdout lines surface at info level and stderr at warn level, both
/// tagged with the function id so interleaved worker output stays
/// attributable. The returned future completes as soon as the process
/// is running; supervision continues in a background task.
pub fn spawn_worker(
    state: Arc<RuntimeState>,
    function: &str,
    poller_id: &str,
    cmd: WorkerCommand,
) -> Result<()> {
    debug!(function, poller_id, command = %cmd.command, "spawning worker");
    let mut child = Command::new(&cmd.command)
        .args(&cmd.args)
        .envs(&cmd.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| LocalRuntimeError::Spawn {
            function: function.to_string(),
            source,
        })?;

    if let Some(stdout) = child.stdout.take() {
        forward_output(stdout, function.to_string(), false);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_output(stderr, function.to_string(), true);
    }

    let (kill_tx, kill_rx) = oneshot::channel();
    state.insert_process(function, poller_id, WorkerHandle::new(kill_tx));

    let function = function.to_string();
    let poller_id = poller_id.to_string();
    tokio::spawn(async move {
        supervise(state, function, poller_id, child, kill_rx).await;
    });
    Ok(())
}

/// Waits for the process to exit or for the pool to request a kill,
/// then removes the worker from its pool exactly once.
async fn supervise(
    state: Arc<RuntimeState>,
    function: String,
    poller_id: String,
    mut child: tokio::process::Child,
    kill_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => {
                info!(function = %function, poller_id = %poller_id, %status, "worker exited");
            }
            Err(e) => {
                error!(function = %function, error = %e, "failed to reap worker");
            }
        },
        _ = kill_rx => {
            debug!(function = %function, poller_id = %poller_id, "killing worker on drain");
            if let Err(e) = child.kill().await {
                warn!(function = %function, error = %e, "failed to kill worker");
            }
        }
    }
    state.worker_exited(&function, &poller_id);
}

fn forward_output<R>(stream: R, function: String, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                warn!(target: "worker", function = %function, "{line}");
            } else {
                info!(target: "worker", function = %function, "{line}");
            }
        }
    });
}
