//! Per-connection socket pumps
//!
//! Each attached websocket runs a read pump (this task) and a write pump
//! (spawned). The read pump enforces the inbound size cap and the pong
//! deadline; the write pump forwards hub deliveries under a write deadline
//! and pings on a timer. Client→server payloads are ignored — reads exist
//! only to drive keepalive and detect closure.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::hub::{ClientId, HubHandle, CLIENT_BUFFER};

/// Largest client→server frame we will read
pub const MAX_READ_BYTES: usize = 512;

/// How long we wait for any inbound frame before declaring the peer gone;
/// pongs reset this deadline
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping cadence: 9/10 of the pong deadline
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Deadline for each outbound write
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Serve one upgraded socket until either side goes away
pub async fn serve_socket(socket: WebSocket, hub: HubHandle) {
    let (ws_tx, ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Arc<str>>(CLIENT_BUFFER);

    let id = ClientId::new();
    if hub.register(id, out_tx).await.is_err() {
        return;
    }

    let writer = tokio::spawn(write_pump(ws_tx, out_rx));

    read_pump(ws_rx).await;

    // Detach first so the hub drops its sender; the write pump then drains
    // its buffer, emits a close frame, and returns.
    let _ = hub.unregister(id).await;
    let _ = timeout(WRITE_WAIT, writer).await;

    tracing::debug!(client = %id, "realtime connection closed");
}

/// Read until close, error, oversize frame, or pong starvation
async fn read_pump(mut ws_rx: SplitStream<WebSocket>) {
    loop {
        match timeout(PONG_WAIT, ws_rx.next()).await {
            // Pong deadline elapsed with no traffic at all.
            Err(_) => break,
            Ok(None) => break,
            Ok(Some(Err(_))) => break,
            Ok(Some(Ok(message))) => match message {
                Message::Close(_) => break,
                Message::Text(text) if text.len() > MAX_READ_BYTES => break,
                Message::Binary(data) if data.len() > MAX_READ_BYTES => break,
                // Pongs (and any small client chatter, which we ignore)
                // reset the deadline simply by arriving.
                _ => {}
            },
        }
    }
}

/// Forward hub deliveries and pings until the buffer closes or a write fails
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Arc<str>>,
) {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_PERIOD,
        PING_PERIOD,
    );
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            delivery = out_rx.recv() => match delivery {
                Some(text) => {
                    let frame = Message::Text(text.to_string().into());
                    match timeout(WRITE_WAIT, ws_tx.send(frame)).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                None => {
                    // Hub closed our buffer: say goodbye and stop.
                    let _ = timeout(WRITE_WAIT, ws_tx.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => {
                match timeout(WRITE_WAIT, ws_tx.send(Message::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
}
