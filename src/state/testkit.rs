//! Scripted backend and JSON fixtures shared by the state controller tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::Json;
use serde_json::{Value, json};

use crate::config::GatewayConfig;
use crate::net::api::GameApi;
use crate::net::gateway::Gateway;

#[derive(Clone, Debug, PartialEq)]
pub struct Seen {
    pub route: String,
    pub query: Option<String>,
    pub body: Value,
}

/// Answers `"METHOD /path"` routes with queued or fixed replies; unknown routes
/// get `404 {"message": "not scripted"}`.
#[derive(Clone, Default)]
pub struct MockBackend {
    seen: Arc<Mutex<Vec<Seen>>>,
    replies: Arc<Mutex<HashMap<String, (u16, Value)>>>,
}

impl MockBackend {
    pub fn reply(&self, route: &str, body: Value) {
        self.respond(route, 200, body);
    }

    pub fn respond(&self, route: &str, status: u16, body: Value) {
        self.replies
            .lock()
            .expect("replies lock")
            .insert(route.to_owned(), (status, body));
    }

    pub fn routes(&self) -> Vec<String> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .map(|s| s.route.clone())
            .collect()
    }

    pub fn last(&self, route: &str) -> Seen {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .rev()
            .find(|s| s.route == route)
            .cloned()
            .unwrap_or_else(|| panic!("no request to {route}"))
    }
}

async fn handle(
    State(backend): State<MockBackend>,
    method: Method,
    uri: Uri,
    body: String,
) -> (StatusCode, Json<Value>) {
    let route = format!("{} {}", method.as_str(), uri.path());
    let body = serde_json::from_str(&body).unwrap_or(Value::Null);
    backend.seen.lock().expect("seen lock").push(Seen {
        route: route.clone(),
        query: uri.query().map(ToOwned::to_owned),
        body,
    });
    let (status, reply) = backend
        .replies
        .lock()
        .expect("replies lock")
        .get(&route)
        .cloned()
        .unwrap_or((404, json!({"message": "not scripted"})));
    (
        StatusCode::from_u16(status).expect("valid status"),
        Json(reply),
    )
}

pub async fn spawn() -> (GameApi, MockBackend) {
    let backend = MockBackend::default();
    let app = Router::new().fallback(handle).with_state(backend.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock backend failed");
    });
    let gateway = Gateway::new(GatewayConfig {
        base_url: format!("http://{addr}"),
        timeout: Duration::from_secs(5),
        retry_attempts: 1,
        retry_delay: Duration::from_millis(1),
    })
    .expect("gateway");
    (GameApi::new(gateway), backend)
}

// =============================================================================
// FIXTURES
// =============================================================================

pub fn user_json(id: &str, name: &str) -> Value {
    json!({"userId": id, "nombre": name, "avatarUrl": "", "createdAt": "", "updatedAt": ""})
}

fn config_json() -> Value {
    json!({
        "numeroPreguntas": 10,
        "tiempoRespuesta": 150,
        "tiempoAdivinanza": 150,
        "puntosAdivinanzaCorrecta": 10,
        "topic": "cultura-general"
    })
}

pub fn room_json(id: &str, host: &str, players: &[&str], status: &str) -> Value {
    let players: Vec<Value> = players.iter().map(|p| user_json(p, p)).collect();
    json!({
        "roomId": id,
        "hostId": host,
        "jugadores": players,
        "maxJugadores": 4,
        "estado": status,
        "configuracion": config_json()
    })
}

pub fn question_json(id: &str) -> Value {
    json!({"questionId": id, "texto": "¿Capital de Perú?", "opciones": ["Lima", "Cusco"], "topic": "geografia"})
}

pub fn session_json(id: &str, phase: &str, status: &str, round: u32) -> Value {
    json!({
        "sessionId": id,
        "roomId": "r-1",
        "estado": status,
        "rondaActual": round,
        "fase": phase,
        "jugadores": [],
        "configuracion": config_json()
    })
}

pub fn ranking_json(entries: &[(&str, i64)]) -> Value {
    let rows: Vec<Value> = entries
        .iter()
        .enumerate()
        .map(|(i, (id, score))| {
            json!({"userId": id, "nombre": id, "avatarUrl": "", "puntuacion": score, "posicion": i + 1})
        })
        .collect();
    Value::Array(rows)
}
