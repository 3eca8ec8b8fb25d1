//! Egress proxy
//!
//! Lets browser-facing handler output reach external services without
//! tripping CORS during local development: the path suffix after
//! `/proxy/` is the target URL, the original method/headers/body are
//! forwarded upstream, and the response is relayed back with permissive
//! cross-origin headers injected. `OPTIONS` preflights are answered
//! directly and never forwarded.
//!
//! This is a development convenience, not a hardened proxy; it performs
//! no authentication or target filtering.

use super::RuntimeApiState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::HOST;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

const ALLOWED_METHODS: &str = "GET, PUT, PATCH, POST, DELETE";

/// Headers that belong to the connection, not the relayed message.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Wildcard handler for `/proxy/*target`.
pub async fn egress_proxy(
    State(state): State<RuntimeApiState>,
    Path(target): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cors = cors_headers(&headers);
    if method == Method::OPTIONS {
        // Preflight: answer locally, forward nothing.
        return (StatusCode::OK, cors).into_response();
    }

    let mut target_url = repair_scheme(target);
    if let Some(query) = uri.query() {
        target_url.push('?');
        target_url.push_str(query);
    }
    let url = match reqwest::Url::parse(&target_url) {
        Ok(url) => url,
        Err(e) => {
            warn!(target = %target_url, error = %e, "proxy target is not a valid URL");
            return (StatusCode::BAD_REQUEST, cors, format!("invalid proxy target: {e}"))
                .into_response();
        }
    };
    debug!(%method, target = %url, "forwarding egress request");

    let mut forwarded = headers.clone();
    forwarded.remove(HOST);
    for name in HOP_BY_HOP {
        forwarded.remove(*name);
    }

    let mut request = state.http.request(method.clone(), url).headers(forwarded);
    if !matches!(method, Method::GET | Method::DELETE | Method::HEAD) {
        request = request.body(body.to_vec());
    }

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(error = %e, "egress request failed");
            return (StatusCode::BAD_GATEWAY, cors, format!("proxy request failed: {e}"))
                .into_response();
        }
    };

    let status = upstream.status();
    let mut relayed = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            relayed.insert(name.clone(), value.clone());
        }
    }
    // CORS injection wins over anything upstream set.
    for (name, value) in &cors {
        relayed.insert(name.clone(), value.clone());
    }

    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to read upstream body");
            return (StatusCode::BAD_GATEWAY, cors, format!("proxy read failed: {e}"))
                .into_response();
        }
    };
    (status, relayed, body).into_response()
}

/// Permissive cross-origin headers; requested headers echo back.
fn cors_headers(request_headers: &HeaderMap) -> HeaderMap {
    let mut cors = HeaderMap::new();
    cors.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    cors.insert(
        "access-control-allow-methods",
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    if let Some(requested) = request_headers.get("access-control-request-headers") {
        cors.insert("access-control-allow-headers", requested.clone());
    }
    cors
}

/// Routers and intermediaries collapse `//` in paths, so the captured
/// target often arrives as `https:/host/...`. Restore the authority
/// separator.
fn repair_scheme(target: String) -> String {
    for scheme in ["https", "http"] {
        let collapsed = format!("{scheme}:/");
        let full = format!("{scheme}://");
        if target.starts_with(&collapsed) && !target.starts_with(&full) {
            return target.replacen(&collapsed, &full, 1);
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::RuntimeState;
    use crate::server::create_runtime_api_router;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_app() -> axum::Router {
        create_runtime_api_router(RuntimeApiState::new(Arc::new(RuntimeState::new(5001))))
    }

    #[test]
    fn repair_scheme_restores_collapsed_separator() {
        assert_eq!(
            repair_scheme("https:/example.com/a".to_string()),
            "https://example.com/a"
        );
        assert_eq!(
            repair_scheme("https://example.com/a".to_string()),
            "https://example.com/a"
        );
        assert_eq!(repair_scheme("ftp:/x".to_string()), "ftp:/x");
    }

    #[tokio::test]
    async fn options_preflight_short_circuits_with_cors() {
        let resp = test_app()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/proxy/https://example.com/v1/data")
                    .header("access-control-request-headers", "x-api-key, content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], ALLOWED_METHODS);
        assert_eq!(
            headers["access-control-allow-headers"],
            "x-api-key, content-type"
        );
    }

    #[tokio::test]
    async fn invalid_target_is_a_bad_request() {
        let resp = test_app()
            .oneshot(
                Request::get("/proxy/not-a-url")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        // CORS headers are present even on errors.
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_bad_gateway() {
        // Port 9 (discard) is unassigned locally; the connection refuses.
        let resp = test_app()
            .oneshot(
                Request::get("/proxy/http://127.0.0.1:9/data")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
