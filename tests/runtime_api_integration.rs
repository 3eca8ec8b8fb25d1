//! End-to-end runtime API tests
//!
//! Starts a real server on a loopback port and plays the worker side of
//! the protocol over HTTP: long-poll for the next invocation, then post
//! a response or error, and assert the trigger future resolves with it.

mod common;

use common::{find_available_port, sleeping_run_spec, test_function, CountingToolchain};
use lambda_local::dispatch::trigger;
use lambda_local::invocation::{InvocationResponse, Payload, RequestContext};
use lambda_local::pool::RuntimeState;
use lambda_local::server::{start_runtime_api_server, RuntimeApiState, API_VERSION};
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

struct TestRuntime {
    state: Arc<RuntimeState>,
    base: String,
    client: reqwest::Client,
}

impl TestRuntime {
    async fn start() -> Self {
        let port = find_available_port();
        let state = Arc::new(RuntimeState::new(port));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        tokio::spawn(start_runtime_api_server(
            addr,
            RuntimeApiState::new(state.clone()),
        ));

        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{port}");
        // Wait for the listener to come up.
        for _ in 0..100 {
            if client
                .post(format!("{base}/p0/none/{API_VERSION}/runtime/init/error"))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Self { state, base, client }
    }

    fn invocation_url(&self, poller: &str, function: &str, tail: &str) -> String {
        format!(
            "{}/{poller}/{function}/{API_VERSION}/runtime/{tail}",
            self.base
        )
    }
}

fn payload(request_id: &str, event: serde_json::Value) -> Payload {
    Payload {
        event,
        context: RequestContext {
            aws_request_id: request_id.to_string(),
            invoked_function_arn: "arn:aws:lambda:local:0:function:fn-1".to_string(),
            ..Default::default()
        },
        deadline_epoch_ms: 1_700_000_000_000,
    }
}

#[tokio::test]
async fn trigger_round_trips_through_the_wire_protocol() {
    let rt = TestRuntime::start().await;
    let toolchain = CountingToolchain::new(sleeping_run_spec());
    let function = test_function("fn-1", toolchain.clone());

    let run = {
        let state = rt.state.clone();
        let function = function.clone();
        tokio::spawn(async move {
            trigger(&state, &function, payload("r1", json!({"a": 1})), &HashMap::new()).await
        })
    };

    // Worker side: long-poll next, read the correlation headers.
    let next = rt
        .client
        .get(rt.invocation_url("w1", "fn-1", "invocation/next"))
        .send()
        .await
        .unwrap();
    assert_eq!(next.status(), 200);
    let request_id = next
        .headers()
        .get("lambda-runtime-aws-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(request_id, "r1");
    assert_eq!(
        next.headers()
            .get("lambda-runtime-invoked-function-arn")
            .unwrap(),
        "arn:aws:lambda:local:0:function:fn-1"
    );
    let event: serde_json::Value = next.json().await.unwrap();
    assert_eq!(event, json!({"a": 1}));

    // Post the result; the trigger future must resolve with it.
    let resp = rt
        .client
        .post(rt.invocation_url("w1", "fn-1", &format!("invocation/{request_id}/response")))
        .json(&json!({"b": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    match run.await.unwrap().unwrap() {
        InvocationResponse::Success { data } => assert_eq!(data, json!({"b": 2})),
        InvocationResponse::Failure { .. } => panic!("expected success"),
    }
    assert_eq!(toolchain.build_count(), 1);
    rt.state.drain("fn-1");
}

#[tokio::test]
async fn worker_error_document_reaches_the_caller() {
    let rt = TestRuntime::start().await;
    let toolchain = CountingToolchain::new(sleeping_run_spec());
    let function = test_function("fn-err", toolchain);

    let run = {
        let state = rt.state.clone();
        let function = function.clone();
        tokio::spawn(async move {
            trigger(&state, &function, payload("r9", json!({})), &HashMap::new()).await
        })
    };

    let next = rt
        .client
        .get(rt.invocation_url("w1", "fn-err", "invocation/next"))
        .send()
        .await
        .unwrap();
    assert_eq!(next.status(), 200);

    let resp = rt
        .client
        .post(rt.invocation_url("w1", "fn-err", "invocation/r9/error"))
        .json(&json!({
            "errorType": "runtime.Exit",
            "errorMessage": "handler panicked",
            "trace": ["main.go:42"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    match run.await.unwrap().unwrap() {
        InvocationResponse::Failure { error } => {
            assert_eq!(error.error_type, "runtime.Exit");
            assert_eq!(error.error_message, "handler panicked");
            assert_eq!(error.stack_trace, vec!["main.go:42".to_string()]);
        }
        InvocationResponse::Success { .. } => panic!("expected failure"),
    }
    rt.state.drain("fn-err");
}

#[tokio::test]
async fn stale_response_after_resolution_is_dropped_silently() {
    let rt = TestRuntime::start().await;
    let toolchain = CountingToolchain::new(sleeping_run_spec());
    let function = test_function("fn-2", toolchain);

    let run = {
        let state = rt.state.clone();
        let function = function.clone();
        tokio::spawn(async move {
            trigger(&state, &function, payload("r2", json!({})), &HashMap::new()).await
        })
    };

    let next = rt
        .client
        .get(rt.invocation_url("w1", "fn-2", "invocation/next"))
        .send()
        .await
        .unwrap();
    assert_eq!(next.status(), 200);

    let first = rt
        .client
        .post(rt.invocation_url("w1", "fn-2", "invocation/r2/response"))
        .json(&json!({"ok": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 202);
    assert!(run.await.unwrap().unwrap().is_success());

    // A duplicate delivery for the consumed id still gets its 202.
    let second = rt
        .client
        .post(rt.invocation_url("w1", "fn-2", "invocation/r2/response"))
        .json(&json!({"ok": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 202);
    rt.state.drain("fn-2");
}

#[tokio::test]
async fn init_error_is_acknowledged() {
    let rt = TestRuntime::start().await;
    let resp = rt
        .client
        .post(rt.invocation_url("w1", "fn-3", "init/error"))
        .json(&json!({"errorType": "init.Failed", "errorMessage": "bad env"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "\"ok\"");
}

#[tokio::test]
async fn warm_triggers_spawn_one_process_each() {
    let rt = TestRuntime::start().await;
    let toolchain = CountingToolchain::new(sleeping_run_spec());
    let function = test_function("fn-4", toolchain);
    rt.state.mark_warm("fn-4");

    for (i, request_id) in ["ra", "rb"].iter().enumerate() {
        let run = {
            let state = rt.state.clone();
            let function = function.clone();
            let payload = payload(request_id, json!({}));
            tokio::spawn(async move { trigger(&state, &function, payload, &HashMap::new()).await })
        };

        // Each dispatch found no idle poller and spawned a fresh worker.
        while rt.state.process_count("fn-4") < i + 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let next = rt
            .client
            .get(rt.invocation_url("w-test", "fn-4", "invocation/next"))
            .send()
            .await
            .unwrap();
        assert_eq!(next.status(), 200);
        let resp = rt
            .client
            .post(rt.invocation_url(
                "w-test",
                "fn-4",
                &format!("invocation/{request_id}/response"),
            ))
            .json(&json!({"i": i}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
        assert!(run.await.unwrap().unwrap().is_success());
    }

    assert_eq!(rt.state.process_count("fn-4"), 2);
    rt.state.drain("fn-4");
    for _ in 0..100 {
        if rt.state.process_count("fn-4") == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(rt.state.process_count("fn-4"), 0);
}
