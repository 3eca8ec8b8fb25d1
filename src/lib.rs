#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # lambda-local
//!
//! A local emulator of the cloud function runtime invocation protocol:
//! run compiled handler binaries on a developer machine with warm-process
//! reuse and automatic rebuild-on-change.
//!
//! ## How it fits together
//!
//! - [`server`] — the runtime API surface workers long-poll against,
//!   plus a permissive egress proxy for local development
//! - [`pool`] — per-function bookkeeping bridging invocation producers
//!   and long-polling workers
//! - [`dispatch`] — the trigger path: ensure a build, match a payload to
//!   an idle worker or spawn one, await the result
//! - [`worker`] — OS process supervision (spawn, log streaming, reaping)
//! - [`build`] — the Go toolchain producing handler artifacts
//! - [`watch`] — debounce source changes into cold/drain/rebuild cycles
//! - [`runner`] — wiring for one function behind one server instance
//!
//! ## Quick start
//!
//! ```bash
//! # Serve functions/hello, rebuilding whenever its source changes
//! $ lambda-local --code-dir ./app --handler-path functions/hello
//! ```
//!
//! ## Library usage
//!
//! ```no_run
//! use lambda_local::config::{RunnerConfig, ServerConfig};
//! use lambda_local::invocation::RequestContext;
//! use lambda_local::runner::Runner;
//!
//! # async fn example(server: ServerConfig, config: RunnerConfig) -> lambda_local::Result<()> {
//! let runner = Runner::new(&server, config);
//! let _server = runner.spawn_server();
//! let response = runner
//!     .run(serde_json::json!({"a": 1}), RequestContext::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Known gaps
//!
//! - No invocation timeout: a worker that exits without responding
//!   leaves its trigger pending; callers own deadline policy.
//! - No cap on concurrent workers per function (mirrors horizontal
//!   scale-out).
//! - Nothing persists across restarts.

pub mod build;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod invocation;
pub mod pool;
pub mod runner;
pub mod server;
pub mod watch;
pub mod worker;

pub use config::{RunnerConfig, ServerConfig};
pub use dispatch::{trigger, FunctionDescriptor, HandlerToolchain, RunSpec};
pub use error::{LocalRuntimeError, Result};
pub use invocation::{InvocationResponse, Payload, RequestContext};
pub use pool::RuntimeState;
pub use runner::Runner;
