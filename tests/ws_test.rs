mod common;

use common::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest, http::header, Message},
    MaybeTlsStream, WebSocketStream,
};

use taskpulse::assistant::{Assistant, Reply};
use taskpulse::state::AppState;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, taskpulse::app(state)).await.unwrap();
    });
    addr
}

async fn connect_with_query(addr: SocketAddr, user_id: &str) -> Client {
    let url = format!("ws://{}/api/v1/ws?token={}", addr, token_for(user_id));
    let (client, _) = connect_async(url).await.expect("handshake failed");
    client
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .expect("send failed");
}

async fn wait_for_connections(state: &AppState, expected: usize) {
    for _ in 0..100 {
        if state.registry.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "Expected {} connections, found {}",
        expected,
        state.registry.connection_count().await
    );
}

fn assert_unauthorized(result: Result<(Client, tungstenite::handshake::client::Response), tungstenite::Error>) {
    match result {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        Err(other) => panic!("Expected HTTP 401, got {:?}", other),
        Ok(_) => panic!("Expected HTTP 401, connection was accepted"),
    }
}

#[tokio::test]
async fn test_missing_or_invalid_credential_is_refused() {
    let state = test_state(None);
    let addr = spawn_server(state.clone()).await;

    assert_unauthorized(connect_async(format!("ws://{}/api/v1/ws", addr)).await);
    assert_unauthorized(connect_async(format!("ws://{}/api/v1/ws?token=garbage", addr)).await);

    let mut request = format!("ws://{}/api/v1/ws", addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        header::AUTHORIZATION,
        "Bearer not-a-token".parse().unwrap(),
    );
    assert_unauthorized(connect_async(request).await);

    assert_eq!(state.registry.connection_count().await, 0);
}

#[tokio::test]
async fn test_bearer_header_admits_and_errors_keep_socket_open() {
    let state = test_state(None);
    let addr = spawn_server(state.clone()).await;

    let mut request = format!("ws://{}/api/v1/ws", addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", token_for("alice")).parse().unwrap(),
    );
    let (mut client, _) = connect_async(request).await.expect("handshake failed");

    send_json(&mut client, json!({"type": "bogus", "payload": {}})).await;
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "UNKNOWN_TYPE");
    assert!(error["payload"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Unknown message type"));

    client
        .send(Message::text("definitely not json"))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["payload"]["code"], "PARSE_ERROR");

    // Still open and processing
    send_json(&mut client, json!({"type": "ai_request", "payload": {"message": "hi"}})).await;
    assert_eq!(
        next_json(&mut client).await["payload"]["code"],
        "ASSISTANT_UNAVAILABLE"
    );

    let users = state.registry.connections_for("alice").await;
    assert_eq!(users.len(), 1);
}

#[tokio::test]
async fn test_task_created_reaches_other_users() {
    let assistant = ScriptedAssistant::new(vec![
        Ok(create_task_call("Ship release")),
        Ok(Reply::Text("Created your task".to_string())),
    ]);
    let state = test_state(Some(assistant as Arc<dyn Assistant>));
    let addr = spawn_server(state.clone()).await;

    let mut alice = connect_with_query(addr, "alice").await;
    let mut bob = connect_with_query(addr, "bob").await;
    wait_for_connections(&state, 2).await;

    send_json(
        &mut alice,
        json!({"type": "ai_request", "payload": {"message": "ship it"}}),
    )
    .await;

    let broadcast = next_json(&mut bob).await;
    assert_eq!(broadcast["type"], "task_created");
    assert_eq!(broadcast["payload"]["title"], "Ship release");

    let mut types = vec![
        next_json(&mut alice).await["type"].clone(),
        next_json(&mut alice).await["type"].clone(),
    ];
    types.sort_by_key(|t| t.to_string());
    assert_eq!(types, vec![json!("ai_response"), json!("task_created")]);
}

#[tokio::test]
async fn test_disconnect_deregisters() {
    let state = test_state(None);
    let addr = spawn_server(state.clone()).await;

    let first = connect_with_query(addr, "alice").await;
    let mut second = connect_with_query(addr, "alice").await;
    wait_for_connections(&state, 2).await;
    assert_eq!(state.registry.user_count().await, 1);

    drop(first);
    wait_for_connections(&state, 1).await;

    second.close(None).await.unwrap();
    wait_for_connections(&state, 0).await;
    assert_eq!(state.registry.user_count().await, 0);
}
