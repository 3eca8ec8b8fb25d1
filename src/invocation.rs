//! Invocation payloads and results
//!
//! Wire-level shapes exchanged between the dispatcher, the runtime API
//! server, and worker processes. Event and context construction happens
//! upstream (the event factory collaborator); the emulator treats both as
//! opaque JSON apart from the handful of context fields the protocol
//! headers need.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request context accompanying every invocation.
///
/// Only the fields the runtime API reads are typed; identity and client
/// context are passed through verbatim as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Correlation id for this invocation; keys the `requests` map.
    pub aws_request_id: String,
    /// ARN reported to the worker via response header.
    #[serde(default)]
    pub invoked_function_arn: String,
    /// Cognito identity blob, opaque to the emulator.
    #[serde(default)]
    pub identity: Value,
    /// Client context blob, opaque to the emulator.
    #[serde(default)]
    pub client_context: Value,
    /// Remaining context fields pass through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One undelivered invocation: the event body plus the context and
/// deadline the worker learns through response headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub event: Value,
    pub context: RequestContext,
    /// Absolute deadline in milliseconds since the Unix epoch.
    #[serde(rename = "deadline")]
    pub deadline_epoch_ms: u64,
}

/// Structured error reported by a worker (or synthesized for a failed
/// build). Field names match the runtime API error document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationError {
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub stack_trace: Vec<String>,
}

/// Outcome of a single invocation, as seen by the caller of `trigger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InvocationResponse {
    /// Worker posted a result body.
    Success { data: Value },
    /// Worker posted an error document, or the build failed.
    Failure { error: InvocationError },
}

impl InvocationResponse {
    /// Synthesized failure for a toolchain that exited non-zero.
    /// No worker is spawned and the function stays cold.
    pub fn build_failure(handler: &str) -> Self {
        Self::Failure {
            error: InvocationError {
                error_type: "build_failure".to_string(),
                error_message: format!("The function {handler} failed to build"),
                stack_trace: Vec::new(),
            },
        }
    }

    /// True for the `success` variant.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
