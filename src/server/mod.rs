//! Runtime API server
//!
//! HTTP surface of the invocation protocol. Every route is scoped by a
//! poller id and a function id so one server instance can serve any
//! number of worker processes:
//! - `POST /:proc/:fun/2018-06-01/runtime/init/error` — init-error ack
//! - `GET  /:proc/:fun/2018-06-01/runtime/invocation/next` — long-poll
//! - `POST /:proc/:fun/2018-06-01/runtime/invocation/:id/response`
//! - `POST /:proc/:fun/2018-06-01/runtime/invocation/:id/error`
//! - `ANY  /proxy/*target` — egress proxy (see [`proxy`])
//!
//! Handlers are thin: all pool semantics live in [`crate::pool`].

pub mod proxy;

use crate::error::{LocalRuntimeError, Result};
use crate::invocation::{InvocationError, InvocationResponse};
use crate::pool::RuntimeState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Protocol version segment baked into every runtime API path.
pub const API_VERSION: &str = "2018-06-01";

/// Shared state for all runtime API handlers.
#[derive(Clone)]
pub struct RuntimeApiState {
    pub runtime: Arc<RuntimeState>,
    /// Client reused by the egress proxy for upstream requests.
    pub http: reqwest::Client,
}

impl RuntimeApiState {
    pub fn new(runtime: Arc<RuntimeState>) -> Self {
        Self {
            runtime,
            http: reqwest::Client::new(),
        }
    }
}

/// Builds the runtime API router.
pub fn create_runtime_api_router(state: RuntimeApiState) -> Router {
    Router::new()
        .route(
            &format!("/:proc/:fun/{API_VERSION}/runtime/init/error"),
            post(init_error),
        )
        .route(
            &format!("/:proc/:fun/{API_VERSION}/runtime/invocation/next"),
            get(next_invocation),
        )
        .route(
            &format!("/:proc/:fun/{API_VERSION}/runtime/invocation/:request_id/response"),
            post(invocation_response),
        )
        .route(
            &format!("/:proc/:fun/{API_VERSION}/runtime/invocation/:request_id/error"),
            post(invocation_error),
        )
        .route("/proxy/*target", any(proxy::egress_proxy))
        .with_state(state)
}

/// Binds and serves the runtime API until the process exits.
pub async fn start_runtime_api_server(addr: SocketAddr, state: RuntimeApiState) -> Result<()> {
    let app = create_runtime_api_router(state);
    info!(%addr, "starting runtime API server");
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            LocalRuntimeError::Server(format!(
                "port {} is already in use; pass --port to pick another",
                addr.port()
            ))
        } else {
            LocalRuntimeError::Server(format!("failed to bind {addr}: {e}"))
        }
    })?;
    axum::serve(listener, app)
        .await
        .map_err(|e| LocalRuntimeError::Server(e.to_string()))
}

/// Init-error acknowledgment: the emulator records nothing, workers just
/// need the 200.
async fn init_error(Path((_proc, fun)): Path<(String, String)>) -> Json<&'static str> {
    debug!(function = %fun, "worker reported init error");
    Json("ok")
}

/// Long-polls for the next invocation of the function. Suspends with no
/// timeout until the dispatcher matches a payload to this poller.
async fn next_invocation(
    State(state): State<RuntimeApiState>,
    Path((proc, fun)): Path<(String, String)>,
) -> Response {
    debug!(function = %fun, poller = %proc, "worker waiting for invocation");
    let Some(payload) = state.runtime.next_invocation(&proc, &fun).await else {
        // The parked resolver was dropped: the owning process exited
        // while this poll was in flight (drain).
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    debug!(
        function = %fun,
        request_id = %payload.context.aws_request_id,
        "delivering invocation payload"
    );

    let mut headers = HeaderMap::new();
    insert_header(
        &mut headers,
        "lambda-runtime-aws-request-id",
        &payload.context.aws_request_id,
    );
    insert_header(
        &mut headers,
        "lambda-runtime-deadline-ms",
        &payload.deadline_epoch_ms.to_string(),
    );
    insert_header(
        &mut headers,
        "lambda-runtime-invoked-function-arn",
        &payload.context.invoked_function_arn,
    );
    insert_header(
        &mut headers,
        "lambda-runtime-client-context",
        &payload.context.client_context.to_string(),
    );
    insert_header(
        &mut headers,
        "lambda-runtime-cognito-identity",
        &payload.context.identity.to_string(),
    );
    (StatusCode::OK, headers, Json(payload.event)).into_response()
}

/// Records a success result for the request id. Unknown ids are dropped
/// silently; the worker still gets its 202.
async fn invocation_response(
    State(state): State<RuntimeApiState>,
    Path((_proc, fun, request_id)): Path<(String, String, String)>,
    body: Bytes,
) -> StatusCode {
    debug!(function = %fun, %request_id, "received response");
    state.runtime.respond(
        &fun,
        &request_id,
        InvocationResponse::Success {
            data: parse_lenient(&body),
        },
    );
    StatusCode::ACCEPTED
}

/// Error document a worker posts on invocation failure.
#[derive(Debug, Default, Deserialize)]
struct ErrorDocument {
    #[serde(rename = "errorType", default)]
    error_type: String,
    #[serde(rename = "errorMessage", default)]
    error_message: String,
    #[serde(rename = "trace", default)]
    trace: Vec<String>,
}

/// Records a failure result for the request id; forwarded verbatim to
/// the triggering caller.
async fn invocation_error(
    State(state): State<RuntimeApiState>,
    Path((_proc, fun, request_id)): Path<(String, String, String)>,
    body: Bytes,
) -> StatusCode {
    debug!(function = %fun, %request_id, "received error");
    let doc: ErrorDocument = serde_json::from_slice(&body).unwrap_or_default();
    state.runtime.respond(
        &fun,
        &request_id,
        InvocationResponse::Failure {
            error: InvocationError {
                error_type: doc.error_type,
                error_message: doc.error_message,
                stack_trace: doc.trace,
            },
        },
    );
    StatusCode::ACCEPTED
}

/// Workers are not guaranteed to send a content-type, so bodies parse
/// leniently: invalid JSON becomes a JSON string, empty becomes null.
fn parse_lenient(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
