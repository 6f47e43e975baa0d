//! End-to-end tests over real sockets: admission, fan-out, receipts, health.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use permit_core::{ThreadId, UserId};
use permit_realtime::{HubHandle, JwtValidator, RealtimeServer, ServerConfig, ShutdownCoordinator};
use permit_store::{Database, ReceiptRepo, ThreadRepo};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const SECRET: &[u8] = b"integration-secret";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    hub: HubHandle,
    threads: ThreadRepo,
    shutdown: Arc<ShutdownCoordinator>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

async fn start() -> TestServer {
    let db = Database::in_memory().unwrap();
    let server = RealtimeServer::new(
        ServerConfig::default(),
        Arc::new(JwtValidator::hs256(SECRET, None)),
        Arc::new(ReceiptRepo::new(db.clone())),
    );
    let hub = server.hub().clone();
    let shutdown = Arc::clone(server.shutdown());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _ = tokio::spawn(server.serve(listener));
    TestServer {
        addr,
        hub,
        threads: ThreadRepo::new(db),
        shutdown,
    }
}

fn token_for(user: UserId) -> String {
    let claims = json!({
        "sub": user.to_string(),
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

async fn try_connect(
    addr: SocketAddr,
    cookie: Option<&str>,
    thread: Option<&str>,
) -> Result<Socket, WsError> {
    let url = match thread {
        Some(t) => format!("ws://{addr}/ws?threadId={t}"),
        None => format!("ws://{addr}/ws"),
    };
    let mut request = url.into_client_request()?;
    if let Some(cookie) = cookie {
        let _ = request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    }
    connect_async(request).await.map(|(socket, _)| socket)
}

async fn connect(server: &TestServer, user: UserId, thread: ThreadId) -> Socket {
    let cookie = format!("access_token={}", token_for(user));
    try_connect(server.addr, Some(&cookie), Some(&thread.to_string()))
        .await
        .unwrap()
}

async fn wait_for_clients(hub: &HubHandle, expected: usize) {
    for _ in 0..100 {
        if hub.client_count().await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("hub never reached {expected} clients");
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(socket: &mut Socket) {
    let waited = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(waited.is_err(), "expected no frame, got {waited:?}");
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string().into())).await.unwrap();
}

fn status_of(err: WsError) -> u16 {
    match err {
        WsError::Http(response) => response.status().as_u16(),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_cookie_is_401() {
    let server = start().await;
    let err = try_connect(server.addr, None, Some(&ThreadId::new().to_string()))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), 401);
}

#[tokio::test]
async fn invalid_token_is_401() {
    let server = start().await;
    let err = try_connect(server.addr, Some("access_token=forged"), Some(&ThreadId::new().to_string()))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), 401);
}

#[tokio::test]
async fn missing_or_malformed_thread_is_400() {
    let server = start().await;
    let cookie = format!("access_token={}", token_for(UserId::new()));

    let err = try_connect(server.addr, Some(&cookie), None).await.unwrap_err();
    assert_eq!(status_of(err), 400);

    let err = try_connect(server.addr, Some(&cookie), Some("abc")).await.unwrap_err();
    assert_eq!(status_of(err), 400);
    assert_eq!(server.hub.client_count().await.unwrap(), 0);
}

#[tokio::test]
async fn typing_reaches_peer_only() {
    let server = start().await;
    let thread = ThreadId::new();
    let (alice, bob) = (UserId::new(), UserId::new());
    let mut a = connect(&server, alice, thread).await;
    let mut b = connect(&server, bob, thread).await;
    wait_for_clients(&server.hub, 2).await;

    send_json(
        &mut a,
        json!({"type": "TYPING_INDICATOR", "threadId": thread.to_string(), "payload": {"isTyping": true}}),
    )
    .await;

    let got = next_json(&mut b).await;
    assert_eq!(got["type"], "TYPING_INDICATOR");
    assert_eq!(got["threadId"], thread.to_string());
    assert_eq!(got["payload"]["userId"], alice.to_string());
    assert_eq!(got["payload"]["isTyping"], true);
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn presence_names_thread_in_payload_only() {
    let server = start().await;
    let thread = ThreadId::new();
    let (alice, bob) = (UserId::new(), UserId::new());
    let mut a = connect(&server, alice, thread).await;
    let mut b = connect(&server, bob, thread).await;
    wait_for_clients(&server.hub, 2).await;

    send_json(&mut a, json!({"type": "USER_STATUS", "payload": {"status": "away"}})).await;

    let got = next_json(&mut b).await;
    assert_eq!(got["type"], "USER_STATUS");
    assert!(got.get("threadId").is_none());
    assert_eq!(got["payload"]["threadId"], thread.to_string());
    assert_eq!(got["payload"]["userId"], alice.to_string());
    assert!(got["timestamp"].is_string());
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn other_threads_hear_nothing() {
    let server = start().await;
    let mut a = connect(&server, UserId::new(), ThreadId::new()).await;
    let mut c = connect(&server, UserId::new(), ThreadId::new()).await;
    wait_for_clients(&server.hub, 2).await;

    send_json(&mut a, json!({"type": "USER_STATUS", "payload": {"status": "online"}})).await;

    assert_silent(&mut c).await;
}

#[tokio::test]
async fn unknown_type_gets_error_and_connection_survives() {
    let server = start().await;
    let thread = ThreadId::new();
    let mut a = connect(&server, UserId::new(), thread).await;
    let mut b = connect(&server, UserId::new(), thread).await;
    wait_for_clients(&server.hub, 2).await;

    send_json(&mut a, json!({"type": "FOO", "payload": {}})).await;

    let reply = next_json(&mut a).await;
    assert_eq!(reply["type"], "ERROR");
    assert_eq!(reply["payload"]["code"], "UNKNOWN_TYPE");
    assert_eq!(reply["payload"]["kind"], "FOO");
    assert_silent(&mut b).await;

    send_json(
        &mut a,
        json!({"type": "TYPING_INDICATOR", "threadId": thread.to_string(), "payload": {"isTyping": false}}),
    )
    .await;
    assert_eq!(next_json(&mut b).await["payload"]["isTyping"], false);
}

#[tokio::test]
async fn read_receipt_resets_unread_and_notifies_author() {
    let server = start().await;
    let thread = ThreadId::new();
    let (author, reader) = (UserId::new(), UserId::new());
    server.threads.add_participant(&thread, &reader).unwrap();
    let m1 = server.threads.record_message(&thread, &author).unwrap();
    let m2 = server.threads.record_message(&thread, &author).unwrap();
    assert_eq!(server.threads.unread_count(&thread, &reader).unwrap(), 2);

    let mut author_ws = connect(&server, author, thread).await;
    let mut reader_ws = connect(&server, reader, thread).await;
    wait_for_clients(&server.hub, 2).await;

    send_json(
        &mut reader_ws,
        json!({
            "type": "READ_RECEIPT",
            "threadId": thread.to_string(),
            "payload": {"messageIds": [m1.to_string(), m2.to_string(), "not-an-id"]}
        }),
    )
    .await;

    let got = next_json(&mut author_ws).await;
    assert_eq!(got["type"], "READ_RECEIPT");
    assert_eq!(got["payload"]["userId"], reader.to_string());
    assert_eq!(got["payload"]["processedCount"], 2);
    assert_eq!(server.threads.unread_count(&thread, &reader).unwrap(), 0);
    assert_eq!(server.threads.read_count(&m1).unwrap(), 1);
    assert_silent(&mut reader_ws).await;
}

#[tokio::test]
async fn disconnect_unregisters_client() {
    let server = start().await;
    let mut a = connect(&server, UserId::new(), ThreadId::new()).await;
    wait_for_clients(&server.hub, 1).await;

    a.close(None).await.unwrap();

    wait_for_clients(&server.hub, 0).await;
}

#[tokio::test]
async fn health_reports_live_connections() {
    let server = start().await;
    let _a = connect(&server, UserId::new(), ThreadId::new()).await;
    let _b = connect(&server, UserId::new(), ThreadId::new()).await;
    wait_for_clients(&server.hub, 2).await;

    let body: Value = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
}

#[tokio::test]
async fn shutdown_closes_live_sockets() {
    let server = start().await;
    let mut a = connect(&server, UserId::new(), ThreadId::new()).await;
    wait_for_clients(&server.hub, 1).await;

    server.shutdown.shutdown();

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(frame) = a.next().await {
            if matches!(frame, Ok(Message::Close(_)) | Err(_)) {
                return;
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket stayed open after shutdown");
}
