//! Handler runner
//!
//! Wires the pieces together for one function: a [`RuntimeState`] served
//! over the runtime API, a [`GoToolchain`] building the handler, and a
//! [`SourceWatcher`] keeping the artifact fresh. `run` is the embedding
//! surface: given an event and a request context (produced upstream by
//! the event factory), it dispatches one invocation and returns the
//! worker's result.

use crate::build::GoToolchain;
use crate::config::{RunnerConfig, ServerConfig, DEFAULT_DEADLINE_MS};
use crate::dispatch::{trigger, FunctionDescriptor};
use crate::error::Result;
use crate::invocation::{InvocationResponse, Payload, RequestContext};
use crate::pool::RuntimeState;
use crate::server::{start_runtime_api_server, RuntimeApiState};
use crate::watch::SourceWatcher;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runs one function behind a runtime API server instance.
pub struct Runner {
    state: Arc<RuntimeState>,
    function: FunctionDescriptor,
    code_dir: PathBuf,
    env: HashMap<String, String>,
}

impl Runner {
    /// Builds a runner for the configured function with the Go
    /// toolchain.
    pub fn new(server: &ServerConfig, runner: RunnerConfig) -> Self {
        let state = Arc::new(RuntimeState::new(server.port));
        let code_dir = runner.code_dir.clone();
        let function = FunctionDescriptor {
            id: server.function.id.clone(),
            handler: server.function.handler.clone(),
            runtime: "go".to_string(),
            toolchain: Arc::new(GoToolchain::new(runner)),
        };
        Self {
            state,
            function,
            code_dir,
            env: HashMap::new(),
        }
    }

    /// Caller-supplied environment passed to every worker (lowest
    /// precedence layer).
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Shared pool state, exposed for embedding and tests.
    pub fn state(&self) -> Arc<RuntimeState> {
        self.state.clone()
    }

    /// Starts the runtime API server on the loopback interface.
    pub fn spawn_server(&self) -> JoinHandle<Result<()>> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.state.port());
        let api_state = RuntimeApiState::new(self.state.clone());
        tokio::spawn(start_runtime_api_server(addr, api_state))
    }

    /// Starts the rebuild-on-change watcher; flip the returned sender to
    /// `true` to stop it.
    pub fn spawn_watcher(&self) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = SourceWatcher::new(
            self.function.clone(),
            self.code_dir.clone(),
            self.state.clone(),
            shutdown_rx,
        );
        (shutdown_tx, tokio::spawn(watcher.run()))
    }

    /// Dispatches one invocation and awaits the worker's result. Event
    /// and context pass through opaquely; the deadline is now plus the
    /// platform maximum.
    pub async fn run(&self, event: serde_json::Value, context: RequestContext) -> Result<InvocationResponse> {
        let payload = Payload {
            event,
            context,
            deadline_epoch_ms: now_epoch_ms() + DEFAULT_DEADLINE_MS,
        };
        trigger(&self.state, &self.function, payload, &self.env).await
    }

    /// Terminates every live worker for the function.
    pub fn shutdown(&self) {
        self.state.mark_cold(&self.function.id);
        self.state.drain(&self.function.id);
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
