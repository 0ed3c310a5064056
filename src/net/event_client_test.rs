use super::*;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

// =============================================================================
// HELPERS
// =============================================================================

struct ServerConn {
    uri: String,
    ws: WebSocketStream<TcpStream>,
}

struct TestServer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<ServerConn>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ws server");
        let addr = listener.local_addr().expect("local addr");
        let (tx, conns) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let uri = Arc::new(Mutex::new(String::new()));
                let uri_slot = Arc::clone(&uri);
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *uri_slot.lock().expect("uri lock") = req.uri().to_string();
                    Ok(resp)
                };
                if let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await {
                    let uri = uri.lock().expect("uri lock").clone();
                    if tx.send(ServerConn { uri, ws }).is_err() {
                        break;
                    }
                }
            }
        });
        Self {
            addr,
            conns,
            accept_task,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/dev", self.addr)
    }

    async fn accept(&mut self) -> ServerConn {
        timeout(Duration::from_secs(3), self.conns.recv())
            .await
            .expect("timed out waiting for client connection")
            .expect("server channel closed")
    }

    /// Stop listening so further connection attempts are refused.
    async fn stop_listening(&mut self) {
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
    }
}

impl ServerConn {
    async fn push(&mut self, text: &str) {
        self.ws
            .send(Message::text(text.to_owned()))
            .await
            .expect("server push");
    }

    async fn next_text(&mut self) -> String {
        loop {
            let msg = timeout(Duration::from_secs(3), self.ws.next())
                .await
                .expect("timed out waiting for client message")
                .expect("client stream ended")
                .expect("client message error");
            if let Message::Text(text) = msg {
                return text.as_str().to_owned();
            }
        }
    }

    /// Wait until the client closes (close frame or EOF).
    async fn closed(&mut self) -> bool {
        let wait = async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        };
        timeout(Duration::from_secs(3), wait).await.is_ok()
    }
}

fn config(ws_url: String, max_attempts: u32, delay_ms: u64) -> EventClientConfig {
    EventClientConfig {
        ws_url,
        max_reconnect_attempts: max_attempts,
        reconnect_delay: Duration::from_millis(delay_ms),
    }
}

fn offline_client() -> EventClient {
    EventClient::new(config("ws://127.0.0.1:9/dev".to_owned(), 0, 1), "r-1", "u-1")
}

/// Route every payload for `events` into one channel tagged by event name.
fn record(client: &EventClient, events: &[&str]) -> mpsc::UnboundedReceiver<(String, Value)> {
    let (tx, rx) = mpsc::unbounded_channel();
    for event in events {
        let tx = tx.clone();
        let name = (*event).to_owned();
        client.on(event, move |data| {
            let _ = tx.send((name.clone(), data.clone()));
        });
    }
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// =============================================================================
// REGISTRY AND DISPATCH
// =============================================================================

#[test]
fn reconnect_delay_grows_linearly() {
    let unit = Duration::from_millis(2000);
    let delays: Vec<_> = (1..=5).map(|n| reconnect_delay(unit, n)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(2000),
            Duration::from_millis(4000),
            Duration::from_millis(6000),
            Duration::from_millis(8000),
            Duration::from_millis(10_000),
        ]
    );
}

#[test]
fn handlers_run_in_registration_order() {
    let client = offline_client();
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        client.on("roundStarted", move |_| order.lock().expect("order").push(tag));
    }
    client.shared.emit("roundStarted", &Value::Null);
    assert_eq!(*order.lock().expect("order"), vec!["first", "second", "third"]);
}

#[test]
fn dispatch_delivers_only_matching_event_payloads() {
    let client = offline_client();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.on("roundStarted", move |data| sink.lock().expect("seen").push(data.clone()));

    client
        .shared
        .dispatch_text(r#"{"event":"roundStarted","data":{"ronda":2}}"#);
    client.shared.dispatch_text(r#"{"event":"chat","data":{"msg":"hi"}}"#);

    assert_eq!(*seen.lock().expect("seen"), vec![json!({"ronda": 2})]);
}

#[test]
fn unsubscribe_removes_exactly_one_registration() {
    let client = offline_client();
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = Arc::clone(&calls);
        move |_: &Value| {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    };
    let first = client.on("playerJoined", handler.clone());
    let second = client.on("playerJoined", handler);
    assert_eq!(client.handler_count("playerJoined"), 2);

    assert!(client.off(&first));
    assert!(!client.off(&first), "second removal of the same handle is a no-op");
    client.shared.emit("playerJoined", &Value::Null);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(client.off(&second));
    client.shared.emit("playerJoined", &Value::Null);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.handler_count("playerJoined"), 0);
}

#[test]
fn panicking_handler_does_not_block_others() {
    let client = offline_client();
    let calls = Arc::new(AtomicUsize::new(0));
    client.on("gameFinished", |_| panic!("handler bug"));
    let counter = Arc::clone(&calls);
    client.on("gameFinished", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.shared.dispatch_text(r#"{"event":"gameFinished","data":{}}"#);
    client.shared.dispatch_text(r#"{"event":"gameFinished","data":{}}"#);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn malformed_messages_are_dropped() {
    let client = offline_client();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    client.on("roundStarted", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.shared.dispatch_text("roundStarted");
    client.shared.dispatch_text(r#"{"action":"roundStarted","data":{}}"#);
    client.shared.dispatch_bytes(&[0xff, 0x00]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    client
        .shared
        .dispatch_bytes(br#"{"event":"roundStarted","data":{"ronda":1}}"#);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn target_url_encodes_room_and_user() {
    let client = EventClient::new(
        config("wss://ws.example.test/dev".to_owned(), 5, 1),
        "sala 1",
        "ana&beto",
    );
    assert_eq!(
        client.shared.target_url(),
        "wss://ws.example.test/dev?roomId=sala%201&userId=ana%26beto"
    );

    let with_query = EventClient::new(config("ws://h/dev?stage=x".to_owned(), 5, 1), "r", "u");
    assert_eq!(with_query.shared.target_url(), "ws://h/dev?stage=x&roomId=r&userId=u");
}

#[test]
fn send_while_disconnected_is_rejected() {
    let client = offline_client();
    let err = client
        .send("answer", &json!({"respuesta": "Lima"}))
        .expect_err("not connected");
    assert!(matches!(err, EventClientError::NotConnected));
}

// =============================================================================
// LIVE CONNECTION
// =============================================================================

#[tokio::test]
async fn connect_emits_connected_and_passes_ids_in_query() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 5, 10), "r-42", "u-7");
    let mut events = record(&client, &[CONNECTED]);

    client.connect().await.expect("connect");
    let conn = server.accept().await;

    assert_eq!(conn.uri, "/dev?roomId=r-42&userId=u-7");
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.is_connected());
    let (name, data) = next_event(&mut events).await;
    assert_eq!(name, CONNECTED);
    assert_eq!(data, json!({"roomId": "r-42", "userId": "u-7"}));
}

#[tokio::test]
async fn inbound_events_reach_handlers_in_arrival_order() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 5, 10), "r-1", "u-1");
    let mut events = record(&client, &["roundStarted"]);

    client.connect().await.expect("connect");
    let mut conn = server.accept().await;
    conn.push(r#"{"event":"roundStarted","data":{"ronda":1}}"#).await;
    conn.push(r#"{"event":"chat","data":{"msg":"hi"}}"#).await;
    conn.push("{ not json").await;
    conn.push(r#"{"event":"roundStarted","data":{"ronda":2}}"#).await;

    assert_eq!(next_event(&mut events).await.1, json!({"ronda": 1}));
    assert_eq!(next_event(&mut events).await.1, json!({"ronda": 2}));
    assert!(
        timeout(Duration::from_millis(100), events.recv()).await.is_err(),
        "no other payloads expected"
    );
    assert!(client.is_connected());
}

#[tokio::test]
async fn send_wraps_payload_in_action_envelope() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 5, 10), "r-1", "u-1");
    client.connect().await.expect("connect");
    let mut conn = server.accept().await;

    client
        .send("sendMessage", &json!({"mensaje": "hola"}))
        .expect("send");
    let text = conn.next_text().await;
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value, json!({"action": "sendMessage", "data": {"mensaje": "hola"}}));
}

#[tokio::test]
async fn unexpected_close_reconnects_and_resets_attempts() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 3, 20), "r-1", "u-1");
    let mut events = record(&client, &[CONNECTED, DISCONNECTED, RECONNECT_FAILED]);

    client.connect().await.expect("connect");
    assert_eq!(next_event(&mut events).await.0, CONNECTED);
    let first = server.accept().await;
    drop(first);

    assert_eq!(next_event(&mut events).await.0, DISCONNECTED);
    let mut second = server.accept().await;
    assert_eq!(next_event(&mut events).await.0, CONNECTED);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.reconnect_attempts(), 0);

    // Handlers survive an automatic reconnect.
    second.push(r#"{"event":"disconnected","data":{"server":true}}"#).await;
    let (name, data) = next_event(&mut events).await;
    assert_eq!(name, DISCONNECTED);
    assert_eq!(data, json!({"server": true}));
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 2, 10), "r-1", "u-1");
    let mut events = record(&client, &[CONNECTED, DISCONNECTED, ERROR, RECONNECT_FAILED]);

    client.connect().await.expect("connect");
    let conn = server.accept().await;
    server.stop_listening().await;
    drop(conn);

    let names: Vec<String> = {
        let mut names = Vec::new();
        for _ in 0..5 {
            names.push(next_event(&mut events).await.0);
        }
        names
    };
    assert_eq!(
        names,
        vec![CONNECTED, DISCONNECTED, ERROR, ERROR, RECONNECT_FAILED]
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.reconnect_attempts(), 2);
    assert!(
        timeout(Duration::from_millis(100), events.recv()).await.is_err(),
        "reconnectFailed is reported once and retries stop"
    );
}

#[tokio::test]
async fn explicit_disconnect_does_not_reconnect_and_clears_handlers() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 5, 10), "r-1", "u-1");
    let mut events = record(&client, &[DISCONNECTED, RECONNECT_FAILED]);

    client.connect().await.expect("connect");
    let mut conn = server.accept().await;

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.handler_count(DISCONNECTED), 0);
    assert!(conn.closed().await, "server should observe the close");

    assert!(
        timeout(Duration::from_millis(150), server.conns.recv()).await.is_err(),
        "no reconnect after an explicit disconnect"
    );
    assert!(events.try_recv().is_err());
    assert!(matches!(
        client.send("ping", &Value::Null),
        Err(EventClientError::NotConnected)
    ));
}

#[tokio::test]
async fn failed_initial_connect_returns_error_and_stays_disconnected() {
    let mut server = TestServer::spawn().await;
    let url = server.url();
    server.stop_listening().await;

    let client = EventClient::new(config(url, 5, 10), "r-1", "u-1");
    let mut events = record(&client, &[ERROR, DISCONNECTED]);
    let err = client.connect().await.expect_err("refused");
    assert!(matches!(err, EventClientError::Connect(_)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(next_event(&mut events).await.0, ERROR);
    assert!(
        timeout(Duration::from_millis(100), events.recv()).await.is_err(),
        "initial connect failures are not retried"
    );
}

#[tokio::test]
async fn connect_again_replaces_previous_connection() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 5, 10), "r-1", "u-1");
    let mut events = record(&client, &[CONNECTED, DISCONNECTED]);

    client.connect().await.expect("first connect");
    let mut first = server.accept().await;
    client.connect().await.expect("second connect");
    let mut second = server.accept().await;

    assert!(first.closed().await, "previous connection is torn down");
    assert_eq!(next_event(&mut events).await.0, CONNECTED);
    assert_eq!(next_event(&mut events).await.0, CONNECTED);
    assert!(
        timeout(Duration::from_millis(100), events.recv()).await.is_err(),
        "replacing a connection is not an unexpected close"
    );

    second.push(r#"{"event":"connected","data":{"via":"server"}}"#).await;
    assert_eq!(next_event(&mut events).await.1, json!({"via": "server"}));
}

#[tokio::test]
async fn state_changes_are_observable() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 5, 10), "r-1", "u-1");
    let mut states = client.state_changes();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

    client.connect().await.expect("connect");
    let _conn = server.accept().await;
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    client.disconnect();
    timeout(Duration::from_secs(1), states.changed())
        .await
        .expect("state change")
        .expect("sender alive");
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn dropping_client_closes_connection() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 5, 10), "r-1", "u-1");
    client.connect().await.expect("connect");
    let mut conn = server.accept().await;

    drop(client);
    assert!(conn.closed().await);
    assert!(timeout(Duration::from_millis(150), server.conns.recv()).await.is_err());
}

#[tokio::test]
async fn retired_connection_task_cannot_change_state_after_disconnect() {
    let client = EventClient::new(config("ws://127.0.0.1:9/dev".to_owned(), 3, 1), "r-1", "u-1");
    let shared = Arc::clone(&client.shared);

    // A connection task for this generation has just seen the server close,
    // while the client still reports `Connected`.
    let generation = shared.generation.load(Ordering::SeqCst);
    shared.set_state(ConnectionState::Connected);
    let mut events = record(&client, &[DISCONNECTED, ERROR]);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Every transition the task would make next is refused.
    assert!(!shared.set_state_if(generation, ConnectionState::Reconnecting));
    assert!(reconnect(&shared, generation).await.is_none());
    assert!(shared.attach(generation).is_none());

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.reconnect_attempts(), 0);
    assert!(shared.outbound().is_none());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn superseded_generation_cannot_clobber_new_connection() {
    let mut server = TestServer::spawn().await;
    let client = EventClient::new(config(server.url(), 3, 1), "r-1", "u-1");
    let shared = Arc::clone(&client.shared);
    let stale = shared.generation.load(Ordering::SeqCst);

    client.connect().await.expect("connect");
    let _conn = server.accept().await;

    assert!(!shared.set_state_if(stale, ConnectionState::Reconnecting));
    assert!(client.is_connected());
    assert!(shared.outbound().is_some());
    client.send("ping", &Value::Null).expect("live connection still sends");
}
