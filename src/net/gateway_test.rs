use super::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{HeaderMap as AxumHeaders, Method as AxumMethod, StatusCode as AxumStatus};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::json;

// =============================================================================
// TEST SERVER
// =============================================================================

#[derive(Clone, Default)]
struct Script {
    hits: Arc<Mutex<Vec<Instant>>>,
    responses: Arc<Mutex<VecDeque<(u16, Value)>>>,
    stall: Duration,
}

impl Script {
    fn new(responses: Vec<(u16, Value)>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    fn hits(&self) -> Vec<Instant> {
        self.hits.lock().expect("hits lock").clone()
    }
}

async fn scripted(State(script): State<Script>) -> (AxumStatus, Json<Value>) {
    script.hits.lock().expect("hits lock").push(Instant::now());
    if !script.stall.is_zero() {
        tokio::time::sleep(script.stall).await;
    }
    let (status, body) = script
        .responses
        .lock()
        .expect("responses lock")
        .pop_front()
        .unwrap_or((200, json!({})));
    (
        AxumStatus::from_u16(status).expect("valid status"),
        Json(body),
    )
}

async fn echo(
    method: AxumMethod,
    headers: AxumHeaders,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Json<Value> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body))
    };
    Json(json!({
        "method": method.as_str(),
        "contentType": content_type,
        "query": query,
        "body": body,
    }))
}

async fn not_json() -> &'static str {
    "<html>oops</html>"
}

async fn missing_page(State(script): State<Script>) -> (AxumStatus, &'static str) {
    script.hits.lock().expect("hits lock").push(Instant::now());
    (AxumStatus::NOT_FOUND, "<html>Not Found</html>")
}

async fn spawn_server(script: Script) -> String {
    let app = Router::new()
        .route("/scripted", any(scripted))
        .route("/echo", any(echo))
        .route("/html", any(not_json))
        .route("/missing", any(missing_page))
        .with_state(script);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });
    format!("http://{addr}")
}

fn gateway(base_url: String, attempts: u32, unit_ms: u64) -> Gateway {
    Gateway::new(GatewayConfig {
        base_url,
        timeout: Duration::from_secs(5),
        retry_attempts: attempts,
        retry_delay: Duration::from_millis(unit_ms),
    })
    .expect("gateway")
}

// =============================================================================
// PURE HELPERS
// =============================================================================

#[test]
fn retry_delay_grows_linearly() {
    let unit = Duration::from_millis(1000);
    assert_eq!(retry_delay(unit, 1), Duration::from_millis(1000));
    assert_eq!(retry_delay(unit, 2), Duration::from_millis(2000));
    assert_eq!(retry_delay(unit, 3), Duration::from_millis(3000));
}

#[test]
fn join_url_handles_slashes() {
    assert_eq!(join_url("http://h/dev/", "/sala/1"), "http://h/dev/sala/1");
    assert_eq!(join_url("http://h/dev", "sala/1"), "http://h/dev/sala/1");
}

#[test]
fn classify_client_fault_uses_message_field() {
    let err = classify_response(StatusCode::BAD_REQUEST, br#"{"message":"nombre requerido"}"#)
        .expect_err("400 is an error");
    assert_eq!(err.to_string(), "nombre requerido");
    assert_eq!(err.status(), Some(400));
    assert!(err.is_client_fault());
    assert!(!err.is_retryable());
    assert_eq!(err.payload(), Some(&json!({"message": "nombre requerido"})));
}

#[test]
fn classify_falls_back_to_mensaje_then_status_text() {
    let err = classify_response(StatusCode::NOT_FOUND, br#"{"mensaje":"Sala no encontrada"}"#)
        .expect_err("404 is an error");
    assert_eq!(err.to_string(), "Sala no encontrada");

    let err = classify_response(StatusCode::SERVICE_UNAVAILABLE, b"upstream down").expect_err("503");
    assert_eq!(err.to_string(), "Error 503");
    assert!(err.payload().is_none());
    assert!(err.is_retryable());
}

#[test]
fn classify_success_with_empty_body_yields_empty_object() {
    let value = classify_response(StatusCode::NO_CONTENT, b"").expect("empty body ok");
    assert_eq!(value, json!({}));
}

#[test]
fn classify_success_with_garbage_body_is_retryable() {
    let err = classify_response(StatusCode::OK, b"<html>").expect_err("not json");
    assert!(matches!(err, ApiError::InvalidBody { status: 200, .. }));
    assert!(err.is_retryable());
}

#[test]
fn classify_client_error_with_garbage_body_is_retryable() {
    let err = classify_response(StatusCode::NOT_FOUND, b"<html>Not Found</html>").expect_err("404");
    assert!(matches!(err, ApiError::InvalidBody { status: 404, .. }));
    assert_eq!(err.status(), Some(404));
    assert!(!err.is_client_fault());
    assert!(err.is_retryable());
}

#[test]
fn classify_client_error_with_empty_body_is_client_fault() {
    let err = classify_response(StatusCode::FORBIDDEN, b"").expect_err("403");
    assert_eq!(err.to_string(), "Error 403");
    assert!(err.is_client_fault());
    assert!(!err.is_retryable());
}

#[test]
fn timeout_is_retryable_and_has_no_status() {
    let err = ApiError::Timeout(Duration::from_millis(10));
    assert!(err.is_retryable());
    assert_eq!(err.status(), None);
}

#[test]
fn call_builder_collects_query_and_body() {
    let call = Call::post("/sala/crear").query("limit", 20).json(json!({"userId": "u-1"}));
    assert_eq!(call.method(), &Method::POST);
    assert_eq!(call.path(), "/sala/crear");
    assert_eq!(call.body(), Some(&json!({"userId": "u-1"})));
    assert_eq!(call.query, vec![("limit".to_owned(), "20".to_owned())]);
}

// =============================================================================
// AGAINST A LIVE SERVER
// =============================================================================

#[tokio::test]
async fn sends_json_content_type_query_and_body() {
    let base = spawn_server(Script::default()).await;
    let gw = gateway(base, 1, 1);
    let call = Call::put("/echo").query("limit", 5).json(json!({"nombre": "Ana"}));
    let echoed = gw.send_value(&call).await.expect("echo");
    assert_eq!(echoed["method"], "PUT");
    assert_eq!(echoed["contentType"], "application/json");
    assert_eq!(echoed["query"], json!({"limit": "5"}));
    assert_eq!(echoed["body"], json!({"nombre": "Ana"}));
}

#[tokio::test]
async fn get_without_body_still_carries_content_type() {
    let base = spawn_server(Script::default()).await;
    let gw = gateway(base, 1, 1);
    let echoed = gw.send_value(&Call::get("/echo")).await.expect("echo");
    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["contentType"], "application/json");
    assert_eq!(echoed["body"], Value::Null);
}

#[tokio::test]
async fn client_fault_is_not_retried() {
    let script = Script::new(vec![(400, json!({"message": "bad input"}))]);
    let base = spawn_server(script.clone()).await;
    let gw = gateway(base, 3, 5);

    let err = gw.send_value(&Call::post("/scripted")).await.expect_err("400");
    assert!(err.is_client_fault());
    assert_eq!(err.to_string(), "bad input");
    assert_eq!(script.hits().len(), 1);
}

#[tokio::test]
async fn client_error_without_json_body_is_retried() {
    let script = Script::default();
    let base = spawn_server(script.clone()).await;
    let gw = gateway(base, 3, 1);

    let err = gw.send_value(&Call::get("/missing")).await.expect_err("404");
    assert!(matches!(err, ApiError::InvalidBody { status: 404, .. }));
    assert_eq!(script.hits().len(), 3);
}

#[tokio::test]
async fn transient_faults_retry_until_success_with_linear_backoff() {
    let script = Script::new(vec![
        (503, json!({"message": "busy"})),
        (503, json!({"message": "busy"})),
        (200, json!({"ok": true})),
    ]);
    let base = spawn_server(script.clone()).await;
    let gw = gateway(base, 3, 40);

    let value = gw.send_value(&Call::get("/scripted")).await.expect("third attempt succeeds");
    assert_eq!(value, json!({"ok": true}));

    let hits = script.hits();
    assert_eq!(hits.len(), 3);
    let first_gap = hits[1] - hits[0];
    let second_gap = hits[2] - hits[1];
    assert!(first_gap >= Duration::from_millis(40), "first gap {first_gap:?}");
    assert!(second_gap >= Duration::from_millis(80), "second gap {second_gap:?}");
}

#[tokio::test]
async fn transient_faults_stop_at_configured_attempts() {
    let script = Script::new(vec![
        (500, json!({"message": "boom"})),
        (502, json!({})),
        (500, json!({"message": "boom again"})),
        (200, json!({"ok": true})),
    ]);
    let base = spawn_server(script.clone()).await;
    let gw = gateway(base, 3, 1);

    let err = gw.send_value(&Call::get("/scripted")).await.expect_err("exhausted");
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.to_string(), "boom again");
    assert_eq!(script.hits().len(), 3);
}

#[tokio::test]
async fn success_on_first_attempt_makes_one_call() {
    let script = Script::new(vec![(200, json!({"ok": true}))]);
    let base = spawn_server(script.clone()).await;
    let gw = gateway(base, 3, 1);
    gw.send_value(&Call::get("/scripted")).await.expect("ok");
    assert_eq!(script.hits().len(), 1);
}

#[tokio::test]
async fn each_attempt_times_out_independently() {
    let script = Script {
        stall: Duration::from_millis(400),
        ..Script::new(Vec::new())
    };
    let base = spawn_server(script.clone()).await;
    let gw = Gateway::new(GatewayConfig {
        base_url: base,
        timeout: Duration::from_millis(50),
        retry_attempts: 2,
        retry_delay: Duration::from_millis(1),
    })
    .expect("gateway");

    let err = gw.send_value(&Call::get("/scripted")).await.expect_err("timeout");
    assert!(matches!(err, ApiError::Timeout(_)));
    assert_eq!(script.hits().len(), 2);
}

#[tokio::test]
async fn typed_send_reports_shape_mismatch_without_retry() {
    #[derive(Debug, serde::Deserialize)]
    struct Needs {
        #[allow(dead_code)]
        required: String,
    }

    let script = Script::new(vec![(200, json!({"other": 1})), (200, json!({"required": "x"}))]);
    let base = spawn_server(script.clone()).await;
    let gw = gateway(base, 3, 1);

    let err = gw.send::<Needs>(&Call::get("/scripted")).await.expect_err("shape");
    assert!(matches!(err, ApiError::Shape(_)));
    assert_eq!(script.hits().len(), 1);
}

#[tokio::test]
async fn non_json_success_body_is_retried() {
    let base = spawn_server(Script::default()).await;
    let gw = gateway(base, 2, 1);
    let err = gw.send_value(&Call::get("/html")).await.expect_err("invalid body");
    assert!(matches!(err, ApiError::InvalidBody { .. }));
}

#[tokio::test]
async fn unreachable_server_surfaces_http_error_after_retries() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let gw = gateway(format!("http://{addr}"), 2, 1);
    let err = gw.send_value(&Call::get("/anything")).await.expect_err("refused");
    assert!(matches!(err, ApiError::Http(_)));
    assert!(err.is_retryable());
}
