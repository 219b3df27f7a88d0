//! One WebSocket connection: identity, reader dispatch, writer pump.
//!
//! Each accepted socket is split into two cooperative halves:
//!
//! - the **reader** parses inbound frames under a rolling deadline and
//!   dispatches them to the session;
//! - the **writer** drains the bounded outbound queue with a per-write
//!   deadline and pings on a fixed cadence.
//!
//! Teardown funnels through a single point after the reader loop: the hub
//! detaches the client (idempotently), the local queue handle drops, and
//! the writer observes the closed queue, emits a Close frame and exits.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, MissedTickBehavior};
use uuid::Uuid;

use crate::protocol::{ClientFrame, ServerFrame};
use crate::server::AppState;
use crate::session::{OutboundFrame, Participant};

/// Cursor palette; assignment is stable per client id.
const CURSOR_COLORS: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#FFA07A",
];

/// Server-assigned identity for one connection.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub username: String,
    pub color: String,
}

impl ClientIdentity {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        let client_id = raw[..8].to_string();
        let username = format!("User-{}", &raw[..4]);
        let color = color_for(&client_id);
        Self {
            client_id,
            username,
            color,
        }
    }
}

fn color_for(client_id: &str) -> String {
    let hash: usize = client_id.bytes().map(usize::from).sum();
    CURSOR_COLORS[hash % CURSOR_COLORS.len()].to_string()
}

/// Drive one upgraded socket until either side terminates.
pub async fn serve_connection(socket: WebSocket, doc_id: String, state: AppState) {
    let identity = ClientIdentity::generate();

    let session = match state.hub.get_or_create(&doc_id).await {
        Ok(session) => session,
        Err(e) => {
            log::error!("failed to open document {doc_id}: {e}");
            let mut socket = socket;
            if let Ok(text) = ServerFrame::error(format!("failed to open document: {e}")).encode() {
                let _ = socket.send(Message::Text(text.into())).await;
            }
            return;
        }
    };

    state.metrics.connection_opened();
    log::info!(
        "client {} connected to document {doc_id}",
        identity.client_id
    );

    let (tx, rx) = mpsc::channel::<OutboundFrame>(state.config.outbound_queue_depth);
    let (ws_tx, ws_rx) = socket.split();
    let (writer_done_tx, writer_done) = oneshot::channel();
    let writer = tokio::spawn(writer_task(
        ws_tx,
        rx,
        state.config.ping_interval,
        state.config.write_timeout,
        writer_done_tx,
    ));

    session
        .attach(Participant::new(
            &identity.client_id,
            &identity.username,
            &identity.color,
            tx.clone(),
        ))
        .await;

    read_loop(ws_rx, writer_done, &doc_id, &identity, &tx, &state).await;

    // Single teardown point for both pump failure modes.
    state.hub.unregister(&doc_id, &identity.client_id).await;
    drop(tx);
    state.metrics.connection_closed();
    log::info!(
        "client {} disconnected from document {doc_id}",
        identity.client_id
    );
    let _ = writer.await;
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    mut writer_done: oneshot::Receiver<()>,
    doc_id: &str,
    identity: &ClientIdentity,
    tx: &mpsc::Sender<OutboundFrame>,
    state: &AppState,
) {
    loop {
        tokio::select! {
            // Writer died (write error or closed queue): stop reading.
            _ = &mut writer_done => break,

            inbound = timeout(state.config.read_timeout, ws_rx.next()) => {
                let message = match inbound {
                    Err(_) => {
                        log::warn!("client {} missed the read deadline", identity.client_id);
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        log::debug!("read error from {}: {e}", identity.client_id);
                        break;
                    }
                    Ok(Some(Ok(message))) => message,
                };

                match message {
                    Message::Text(text) => {
                        state.metrics.message_received();
                        if text.len() > state.config.max_message_size {
                            send_error(
                                tx,
                                format!(
                                    "frame of {} bytes exceeds the {} byte limit",
                                    text.len(),
                                    state.config.max_message_size
                                ),
                            );
                            break;
                        }
                        match ClientFrame::decode(text.as_str()) {
                            Ok(frame) => dispatch(frame, doc_id, identity, state).await,
                            Err(e) => send_error(tx, e.to_string()),
                        }
                    }
                    Message::Binary(_) => {
                        send_error(tx, "binary frames are not supported".to_string());
                    }
                    // Low-level pings are answered by the websocket layer;
                    // pongs just refreshed the read deadline above.
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }
}

async fn dispatch(frame: ClientFrame, doc_id: &str, identity: &ClientIdentity, state: &AppState) {
    let Some(session) = state.hub.get(doc_id).await else {
        return;
    };
    let client_id = identity.client_id.as_str();
    match frame {
        ClientFrame::TextUpdate { content, version } => {
            session.handle_text_update(client_id, version, &content).await;
        }
        ClientFrame::CursorPosition { position } => {
            session.handle_cursor(client_id, position).await;
        }
        ClientFrame::SelectionChange { data } => {
            session.handle_selection(client_id, data.start, data.end).await;
        }
        ClientFrame::TypingStart => session.handle_typing(client_id, true).await,
        ClientFrame::TypingStop => session.handle_typing(client_id, false).await,
        ClientFrame::SaveDocument => {
            session
                .handle_save(client_id, state.hub.store().map(|s| s.as_ref()))
                .await;
        }
        ClientFrame::RequestDocument => session.resend_state(client_id).await,
        // Application-level keepalive; the read deadline was refreshed by
        // receiving it.
        ClientFrame::Ping => {}
    }
}

fn send_error(tx: &mpsc::Sender<OutboundFrame>, message: String) {
    if let Ok(text) = ServerFrame::error(message).encode() {
        let _ = tx.try_send(text.into());
    }
}

async fn writer_task(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
    ping_interval: Duration,
    write_timeout: Duration,
    done: oneshot::Sender<()>,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(payload) => {
                    if !send_with_deadline(
                        &mut ws_tx,
                        Message::Text(payload.to_string().into()),
                        write_timeout,
                    )
                    .await
                    {
                        break;
                    }
                }
                None => {
                    // Queue closed: detach or backpressure eviction.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !send_with_deadline(&mut ws_tx, Message::Ping(Vec::new().into()), write_timeout)
                    .await
                {
                    break;
                }
            }
        }
    }
    let _ = done.send(());
}

async fn send_with_deadline(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: Message,
    deadline: Duration,
) -> bool {
    matches!(timeout(deadline, ws_tx.send(message)).await, Ok(Ok(())))
}
