//! Invocation dispatch
//!
//! `trigger` is the producer side of the emulator: given a function
//! descriptor and a payload it guarantees a build artifact exists, hands
//! the payload to an idle poller or spawns a fresh worker, and resolves
//! once the worker posts a response or error through the runtime API.
//!
//! There is no cap on concurrent workers per function: every race
//! between an invocation and an idle poller may spawn one more process,
//! mirroring horizontal scale-out in the real runtime.

use crate::error::{LocalRuntimeError, Result};
use crate::invocation::{InvocationResponse, Payload};
use crate::pool::{DispatchOutcome, RuntimeState};
use crate::worker::{spawn_worker, WorkerCommand};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Command, arguments, and environment needed to run one worker of a
/// built function.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Capability seam between the dispatcher and a handler build toolchain.
/// One implementation exists per supported toolchain (see
/// [`crate::build::GoToolchain`]).
#[async_trait]
pub trait HandlerToolchain: Send + Sync {
    /// Produces (or refreshes) the build artifact. A build failure is
    /// `Err(LocalRuntimeError::Build { .. })` with the toolchain output
    /// as detail.
    async fn build(&self) -> Result<()>;

    /// Resolves the run specification for a worker of the built
    /// artifact under the given runtime identifier.
    fn resolve(&self, runtime: &str) -> RunSpec;
}

/// Everything the dispatcher needs to know about one function.
#[derive(Clone)]
pub struct FunctionDescriptor {
    /// Stable function id; keys the pool and the warm map.
    pub id: String,
    /// Handler string as configured, used in build-failure messages.
    pub handler: String,
    /// Runtime identifier forwarded to `resolve`.
    pub runtime: String,
    /// Build/resolve capability for this function.
    pub toolchain: Arc<dyn HandlerToolchain>,
}

/// One named environment layer. Layers merge lowest precedence first;
/// a later layer wins on key collision.
#[derive(Debug, Clone)]
pub struct EnvLayer {
    pub name: &'static str,
    pub vars: HashMap<String, String>,
}

/// Merges environment layers in the given order, later layers winning.
pub fn merge_env_layers(layers: Vec<EnvLayer>) -> HashMap<String, String> {
    let mut merged = HashMap::new();
    for layer in layers {
        debug!(layer = layer.name, vars = layer.vars.len(), "applying env layer");
        merged.extend(layer.vars);
    }
    merged
}

/// Synthesized environment every worker receives, always winning over
/// caller- and toolchain-supplied variables.
fn runtime_env_layer(state: &RuntimeState, poller_id: &str, function_id: &str) -> EnvLayer {
    let api = format!("127.0.0.1:{}/{}/{}", state.port(), poller_id, function_id);
    EnvLayer {
        name: "runtime",
        vars: HashMap::from([
            ("AWS_LAMBDA_RUNTIME_API".to_string(), api),
            ("IS_LOCAL".to_string(), "true".to_string()),
        ]),
    }
}

/// Dispatches one invocation and awaits its result.
///
/// Cold functions are built first; a failed build resolves immediately
/// to a structured `build_failure` response without spawning anything,
/// and the function stays cold so the next dispatch retries. There is no
/// invocation timeout: a worker that exits without responding leaves the
/// returned future pending (callers impose their own deadline policy).
pub async fn trigger(
    state: &Arc<RuntimeState>,
    function: &FunctionDescriptor,
    payload: Payload,
    caller_env: &HashMap<String, String>,
) -> Result<InvocationResponse> {
    debug!(function = %function.id, "triggering invocation");
    if !state.is_warm(&function.id) {
        debug!(function = %function.id, "cold function, building");
        match function.toolchain.build().await {
            Ok(()) => state.mark_warm(&function.id),
            Err(LocalRuntimeError::Build { detail, .. }) => {
                warn!(function = %function.id, %detail, "build failed");
                return Ok(InvocationResponse::build_failure(&function.handler));
            }
            Err(other) => return Err(other),
        }
    }

    let request_id = payload.context.aws_request_id.clone();
    let rx = state.register_request(&function.id, &request_id);

    if state.dispatch_payload(&function.id, payload) == DispatchOutcome::Queued {
        // No poller was idle: bring up one more worker to consume the
        // queued payload.
        let poller_id = Uuid::new_v4().to_string();
        let spec = function.toolchain.resolve(&function.runtime);
        let env = merge_env_layers(vec![
            EnvLayer {
                name: "caller",
                vars: caller_env.clone(),
            },
            EnvLayer {
                name: "run-spec",
                vars: spec.env,
            },
            runtime_env_layer(state, &poller_id, &function.id),
        ]);
        let cmd = WorkerCommand {
            command: spec.command,
            args: spec.args,
            env,
        };
        if let Err(e) = spawn_worker(state.clone(), &function.id, &poller_id, cmd) {
            state.forget_request(&function.id, &request_id);
            return Err(e);
        }
    }

    rx.await
        .map_err(|_| LocalRuntimeError::Server("invocation resolver dropped".to_string()))
}
