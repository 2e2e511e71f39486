pub mod admin;
pub mod display;
pub mod handlers;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

use crate::config::ConnectionLimits;
use crate::state::hub::{Connection, Outbound};
use crate::state::AppState;
use crate::types::ConnId;

/// Why one side of a connection stopped
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("socket error: {0}")]
    Socket(#[from] axum::Error),

    #[error("no message or pong within {0:?}")]
    LivenessTimeout(Duration),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::debug!("WebSocket connection request from {}", addr);

    let max_size = state.config.limits.max_message_size;
    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| {
            // awaited by server::serve on shutdown
            let workers = state.workers.clone();
            workers.track_future(handle_socket(socket, addr.to_string(), state))
        })
}

/// Register the socket with the hub and run its reader and writer until either stops
async fn handle_socket(socket: WebSocket, addr: String, state: Arc<AppState>) {
    let limits = state.config.limits.clone();
    let (sender, receiver) = socket.split();
    let (conn, rx) = Connection::open(addr.clone(), limits.send_queue_depth);

    let conn_id = match state.hub.register(conn) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Client {} not registered: {}", addr, e);
            // the queue is already closed; flush whatever it holds and hang up
            if let Err(e) = write_pump(sender, rx, limits).await {
                tracing::debug!("Writer for rejected client {} failed: {}", addr, e);
            }
            return;
        }
    };

    let mut writer = state.workers.spawn(write_pump(sender, rx, limits.clone()));
    let mut reader = state.workers.spawn(read_pump(
        receiver,
        conn_id.clone(),
        state.clone(),
        limits.pong_wait,
    ));

    tokio::select! {
        result = &mut reader => match result {
            Ok(Ok(())) => tracing::debug!("Reader for {} finished", conn_id),
            Ok(Err(e)) => tracing::info!("Reader for {} stopped: {}", conn_id, e),
            Err(e) => tracing::error!("Reader task for {} failed: {}", conn_id, e),
        },
        result = &mut writer => match result {
            Ok(Ok(())) => tracing::debug!("Writer for {} finished", conn_id),
            Ok(Err(e)) => tracing::info!("Writer for {} stopped: {}", conn_id, e),
            Err(e) => tracing::error!("Writer task for {} failed: {}", conn_id, e),
        },
    }

    // closes the queue, so a still-running writer sends a close frame and exits
    state.hub.unregister(&conn_id);
    reader.abort();

    if timeout(limits.write_wait, &mut writer).await.is_err() {
        tracing::debug!("Writer for {} did not finish in time, aborting", conn_id);
        writer.abort();
    }
}

/// Drain the outbound queue onto the socket, pinging on a fixed interval.
///
/// Returns once the queue is closed (after sending a close frame) or a write fails.
async fn write_pump(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    limits: ConnectionLimits,
) -> Result<(), WorkerError> {
    let mut heartbeat = interval_at(Instant::now() + limits.ping_period, limits.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(json) => {
                    send_frame(&mut sender, Message::Text((&*json).into()), limits.write_wait).await?;
                }
                None => {
                    // best effort; the peer may already be gone
                    let _ = send_frame(&mut sender, Message::Close(None), limits.write_wait).await;
                    return Ok(());
                }
            },
            _ = heartbeat.tick() => {
                send_frame(&mut sender, Message::Ping(Bytes::new()), limits.write_wait).await?;
            }
        }
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    write_wait: Duration,
) -> Result<(), WorkerError> {
    match timeout(write_wait, sender.send(frame)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(WorkerError::WriteTimeout(write_wait)),
    }
}

/// Feed inbound frames to the dispatcher until the peer goes away.
///
/// Any frame, including a pong, pushes the liveness deadline out by `pong_wait`.
/// A message that fails to decode is dropped without closing the connection.
async fn read_pump(
    mut receiver: SplitStream<WebSocket>,
    conn_id: ConnId,
    state: Arc<AppState>,
    pong_wait: Duration,
) -> Result<(), WorkerError> {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = match timeout_at(deadline, receiver.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => return Ok(()),
            Err(_) => return Err(WorkerError::LivenessTimeout(pong_wait)),
        };
        deadline = Instant::now() + pong_wait;

        match frame {
            Message::Text(text) => {
                tracing::debug!("Received from {}: {}", conn_id, text.as_str());
                if let Err(e) = handlers::handle_text(text.as_str(), &conn_id, &state) {
                    tracing::warn!("Dropping message from {}: {}", conn_id, e);
                }
            }
            Message::Close(_) => {
                tracing::debug!("Client {} sent close", conn_id);
                return Ok(());
            }
            // pings are answered by the socket itself
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                tracing::debug!("Ignoring binary frame from {}", conn_id);
            }
        }
    }
}
