//! Presence behaviour across real connections: cursor fan-out, selection
//! clearing, typing relay, staleness, and the disconnect invariant.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tandem_server::{build_state, router, AppState, ServerConfig};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, AppState) {
    let state = build_state(Arc::new(ServerConfig::default())).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, doc: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?doc={doc}"))
        .await
        .unwrap();
    ws
}

async fn recv_json(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out")
            .expect("closed")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn recv_type(ws: &mut Ws, frame_type: &str) -> Value {
    for _ in 0..32 {
        let value = recv_json(ws).await;
        if value["type"] == frame_type {
            return value;
        }
    }
    panic!("never received a {frame_type} frame");
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn join(ws: &mut Ws) -> String {
    let init = recv_type(ws, "init").await;
    let client_id = init["clientId"].as_str().unwrap().to_string();
    recv_type(ws, "active_users").await;
    client_id
}

#[tokio::test]
async fn test_cursor_fan_out_without_echo() {
    let (addr, state) = start_server().await;
    let mut a = connect(addr, "doc-1").await;
    let a_id = join(&mut a).await;
    let mut b = connect(addr, "doc-1").await;
    join(&mut b).await;
    recv_type(&mut a, "user_joined").await;

    send_json(&mut a, json!({"type": "cursor_position", "position": 5})).await;

    let cursor = recv_type(&mut b, "cursor_position").await;
    assert_eq!(cursor["data"]["clientId"], a_id.as_str());
    assert_eq!(cursor["data"]["position"], 5);
    assert!(cursor["data"]["username"]
        .as_str()
        .unwrap()
        .starts_with("User-"));

    // The originator hears nothing back.
    assert!(timeout(Duration::from_millis(300), a.next()).await.is_err());

    // And the server tracks it, excluding the owner from its own view.
    let session = state.hub.get("doc-1").await.unwrap();
    assert!(session.cursors(&a_id).await.is_empty());
    assert_eq!(session.cursors("other").await.len(), 1);
}

#[tokio::test]
async fn test_selection_change_and_clear() {
    let (addr, state) = start_server().await;
    let mut a = connect(addr, "doc-1").await;
    let a_id = join(&mut a).await;
    let mut b = connect(addr, "doc-1").await;
    join(&mut b).await;
    recv_type(&mut a, "user_joined").await;

    send_json(
        &mut a,
        json!({"type": "selection_change", "data": {"start": 5, "end": 10}}),
    )
    .await;
    let selection = recv_type(&mut b, "selection_change").await;
    assert_eq!(selection["data"]["clientId"], a_id.as_str());
    assert_eq!(selection["data"]["start"], 5);
    assert_eq!(selection["data"]["end"], 10);

    let session = state.hub.get("doc-1").await.unwrap();
    assert_eq!(session.selections("other").await.len(), 1);

    // Collapsing the range clears the server entry and still notifies
    // peers so they drop the highlight.
    send_json(
        &mut a,
        json!({"type": "selection_change", "data": {"start": 7, "end": 7}}),
    )
    .await;
    let clearing = recv_type(&mut b, "selection_change").await;
    assert_eq!(clearing["data"]["start"], 7);
    assert_eq!(clearing["data"]["end"], 7);
    assert!(session.selections("other").await.is_empty());
}

#[tokio::test]
async fn test_typing_indicators_are_relayed() {
    let (addr, _state) = start_server().await;
    let mut a = connect(addr, "doc-1").await;
    let a_id = join(&mut a).await;
    let mut b = connect(addr, "doc-1").await;
    join(&mut b).await;
    recv_type(&mut a, "user_joined").await;

    send_json(&mut a, json!({"type": "typing_start"})).await;
    let start = recv_type(&mut b, "typing_start").await;
    assert_eq!(start["data"]["userId"], a_id.as_str());
    assert!(start["data"]["color"].as_str().unwrap().starts_with('#'));

    send_json(&mut a, json!({"type": "typing_stop"})).await;
    let stop = recv_type(&mut b, "typing_stop").await;
    assert_eq!(stop["data"]["userId"], a_id.as_str());

    // No echo to the typist.
    assert!(timeout(Duration::from_millis(300), a.next()).await.is_err());
}

#[tokio::test]
async fn test_disconnect_removes_presence() {
    let (addr, state) = start_server().await;
    let mut a = connect(addr, "doc-1").await;
    join(&mut a).await;
    let mut b = connect(addr, "doc-1").await;
    let b_id = join(&mut b).await;
    recv_type(&mut a, "user_joined").await;

    send_json(&mut b, json!({"type": "cursor_position", "position": 3})).await;
    recv_type(&mut a, "cursor_position").await;

    b.close(None).await.unwrap();
    let removed = recv_type(&mut a, "cursor_remove").await;
    assert_eq!(removed["data"]["clientId"], b_id.as_str());
    recv_type(&mut a, "user_left").await;

    // Presence never outlives the participant set.
    let session = state.hub.get("doc-1").await.unwrap();
    assert!(session.cursors("").await.is_empty());
    assert!(session.selections("").await.is_empty());
}

#[tokio::test]
async fn test_stale_cursors_are_swept_and_announced() {
    let (addr, state) = start_server().await;
    let mut a = connect(addr, "doc-1").await;
    join(&mut a).await;
    let mut b = connect(addr, "doc-1").await;
    let b_id = join(&mut b).await;
    recv_type(&mut a, "user_joined").await;

    send_json(&mut b, json!({"type": "cursor_position", "position": 3})).await;
    recv_type(&mut a, "cursor_position").await;

    // Sweep with a zero timeout: the cursor is immediately stale.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let session = state.hub.get("doc-1").await.unwrap();
    session.sweep_presence(Duration::ZERO).await;

    let removed = recv_type(&mut a, "cursor_remove").await;
    assert_eq!(removed["data"]["clientId"], b_id.as_str());
    assert!(session.cursors("").await.is_empty());
}

#[tokio::test]
async fn test_presence_is_scoped_to_the_document() {
    let (addr, _state) = start_server().await;
    let mut a = connect(addr, "doc-a").await;
    join(&mut a).await;
    let mut b = connect(addr, "doc-b").await;
    join(&mut b).await;

    send_json(&mut a, json!({"type": "cursor_position", "position": 1})).await;

    // The other document's client never hears about it.
    assert!(timeout(Duration::from_millis(300), b.next()).await.is_err());
}
