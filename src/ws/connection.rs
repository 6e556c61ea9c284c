//! Per-connection pump loops.
//!
//! Every connection runs two tasks coupled only through its outbound queue:
//! a read loop that turns frames into room commands, and a write loop that
//! drains the queue onto the socket and keeps the peer alive with pings.
//! Either loop exiting tears the whole connection down.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use rand::distr::Alphanumeric;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout, timeout_at};

use super::room::{Member, RoomHandle};
use super::types::{ConnectionState, Envelope, STAGE_TYPE, StageGrid, StagePayload};

/// Deadline for a single frame write.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Idle read deadline; reset whenever the peer answers a ping.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping cadence, 9/10 of the idle deadline so a healthy peer always hears
/// from us well before its own read deadline expires.
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Largest accepted application frame. Bigger frames are a protocol
/// violation and terminate the connection.
pub(crate) const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Capacity of a member's outbound queue. A member that lets this back up
/// is evicted by the room's fan-out.
const OUTBOUND_BUFFER_SIZE: usize = 256;

/// Drive one established connection until either pump loop stops, then
/// unregister it. The room may close the outbound queue at any point
/// (slow-consumer eviction, hub shutdown); that path converges here too.
pub(crate) async fn serve_connection(socket: WebSocket, room: RoomHandle) {
    let client_id = generate_client_id();
    let mut state = ConnectionState::Connecting;
    debug!("client {client_id} room {}: {state}", room.id());

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
    room.register(Member {
        id: client_id.clone(),
        sender: outbound_tx,
    })
    .await;
    state = ConnectionState::Active;
    debug!("client {client_id} room {}: {state}", room.id());

    let (sink, stream) = socket.split();
    let mut write_task = tokio::spawn(write_pump(sink, outbound_rx, client_id.clone()));
    let mut read_task = tokio::spawn(read_pump(stream, room.clone(), client_id.clone()));

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state = ConnectionState::Closing;
    debug!("client {client_id} room {}: {state}", room.id());
    room.unregister(&client_id).await;

    // Both halves of the socket are dropped with the tasks, which closes
    // the transport; closing an already-closed peer is a no-op.
    debug!(
        "client {client_id} room {}: {}",
        room.id(),
        ConnectionState::Closed
    );
}

/// Unique per-connection identity: timestamp plus a random suffix.
fn generate_client_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

async fn read_pump(mut stream: SplitStream<WebSocket>, room: RoomHandle, client_id: String) {
    let mut deadline = Instant::now() + PONG_WAIT;
    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                info!("client {client_id}: idle timeout, dropping connection");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(err))) => {
                debug!("client {client_id}: read error: {err}");
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    warn!(
                        "client {client_id}: frame of {} bytes exceeds limit, dropping connection",
                        text.len()
                    );
                    return;
                }
                handle_text_frame(text.as_str(), &room, &client_id).await;
            }
            Message::Binary(_) => {
                debug!("client {client_id}: ignoring binary frame");
            }
            // Pings are answered by the transport layer.
            Message::Ping(_) => {}
            Message::Pong(_) => {
                deadline = Instant::now() + PONG_WAIT;
            }
            Message::Close(_) => return,
        }
    }
}

/// Decode one inbound frame and forward it to the room. Malformed frames
/// are logged and skipped; they are never fatal to the connection.
async fn handle_text_frame(text: &str, room: &RoomHandle, client_id: &str) {
    match rewrite_envelope(text, client_id) {
        Ok((payload, stage)) => {
            if let Some(grid) = stage {
                room.set_stage(grid).await;
            }
            room.broadcast(payload).await;
        }
        Err(err) => {
            warn!("client {client_id}: skipping frame: {err}");
        }
    }
}

#[derive(Debug, Error)]
enum FrameError {
    #[error("malformed envelope: {0}")]
    Envelope(serde_json::Error),
    #[error("malformed stage payload: {0}")]
    Stage(serde_json::Error),
    #[error("re-encoding envelope: {0}")]
    Encode(serde_json::Error),
}

/// Stamp the sender identity into `from` and, for `"stage"` envelopes,
/// extract the grid. Returns the re-encoded envelope ready for fan-out.
fn rewrite_envelope(
    text: &str,
    client_id: &str,
) -> Result<(String, Option<StageGrid>), FrameError> {
    let mut envelope: Envelope = serde_json::from_str(text).map_err(FrameError::Envelope)?;
    envelope.from = client_id.to_string();

    let stage = if envelope.kind == STAGE_TYPE {
        let payload: StagePayload =
            serde_json::from_str(envelope.content.get()).map_err(FrameError::Stage)?;
        Some(payload.stage)
    } else {
        None
    };

    let encoded = serde_json::to_string(&envelope).map_err(FrameError::Encode)?;
    Ok((encoded, stage))
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    client_id: String,
) {
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    loop {
        tokio::select! {
            received = outbound.recv() => {
                let Some(mut payload) = received else {
                    // Queue closed: evicted or the room is going away.
                    let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    return;
                };
                // Coalesce whatever else is already queued into this frame.
                while let Ok(next) = outbound.try_recv() {
                    payload.push('\n');
                    payload.push_str(&next);
                }
                if !write_frame(&mut sink, Message::Text(payload.into()), &client_id).await {
                    return;
                }
            }
            _ = ping.tick() => {
                if !write_frame(&mut sink, Message::Ping(Bytes::new()), &client_id).await {
                    return;
                }
            }
        }
    }
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    client_id: &str,
) -> bool {
    match timeout(WRITE_WAIT, sink.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!("client {client_id}: write error: {err}");
            false
        }
        Err(_) => {
            debug!("client {client_id}: write timed out");
            false
        }
    }
}
