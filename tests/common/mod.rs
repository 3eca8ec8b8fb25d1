//! Shared fixtures for runtime API integration tests

#![allow(dead_code)]

use lambda_local::dispatch::{FunctionDescriptor, HandlerToolchain, RunSpec};
use lambda_local::error::Result;
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Finds an available TCP port by binding to port 0 and releasing it.
/// There is a small window where another process could claim it.
pub fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind to port 0");
    listener
        .local_addr()
        .expect("failed to get local address")
        .port()
}

/// Toolchain stub that counts builds and resolves to a fixed command.
pub struct CountingToolchain {
    builds: AtomicUsize,
    spec: RunSpec,
}

impl CountingToolchain {
    pub fn new(spec: RunSpec) -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicUsize::new(0),
            spec,
        })
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HandlerToolchain for CountingToolchain {
    async fn build(&self) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resolve(&self, _runtime: &str) -> RunSpec {
        self.spec.clone()
    }
}

/// A run spec whose worker just sleeps; the tests play the runtime API
/// client themselves.
pub fn sleeping_run_spec() -> RunSpec {
    RunSpec {
        command: "sleep".to_string(),
        args: vec!["600".to_string()],
        env: HashMap::new(),
    }
}

/// Descriptor for a test function backed by the given toolchain.
pub fn test_function(id: &str, toolchain: Arc<CountingToolchain>) -> FunctionDescriptor {
    FunctionDescriptor {
        id: id.to_string(),
        handler: format!("{id}.main"),
        runtime: "go".to_string(),
        toolchain,
    }
}
