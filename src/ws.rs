//! Connection lifecycle: handshake completion, the per-connection
//! read/write loop, and teardown.
//!
//! The socket is split, a dedicated write loop is spawned fed by an mpsc
//! channel, and the read loop dispatches decoded frames until the
//! connection closes or is torn down.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    codec::{Response, Status, decode_request, encode_response},
    dispatcher,
    router::ChannelName,
    state::{ConnHandle, ConnId, OutboundMsg, ServerState},
};

/// Drive one upgraded WebSocket connection through Handshake → Active →
/// Closed. `username` has already passed the upgrade-boundary checks, but
/// this function still re-validates registration, since a race between two
/// upgrades for the same name can only be caught here.
pub async fn handle_connection(socket: WebSocket, state: Arc<ServerState>, username: Bytes) {
    let conn = ConnId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMsg>(state.config.outbound_queue_depth);
    let cancel = CancellationToken::new();

    let write_cancel = cancel.clone();
    let write_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = write_cancel.cancelled() => break,
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let sent = match msg {
                        OutboundMsg::Frame(bytes) => ws_tx.send(Message::Binary(bytes)).await,
                        OutboundMsg::Ping => ws_tx.send(Message::Ping(Bytes::new())).await,
                    };
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    if !enter_active(&state, conn, username.clone(), outbound_tx.clone(), cancel.clone()).await {
        cancel.cancel();
        write_handle.abort();
        return;
    }

    let ping_handle = spawn_ping_ticker(state.config.ping_interval, outbound_tx.clone(), cancel.clone());

    info!(conn_id = %conn, username = %String::from_utf8_lossy(&username), "connection active");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = state.shutdown.cancelled() => break,
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Binary(bytes)) => {
                        handle_frame(&state, conn, &username, &bytes).await;
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(conn_id = %conn, error = %e, "read error");
                        break;
                    },
                }
            }
        }
    }

    enter_closed(&state, conn, &username).await;
    cancel.cancel();
    ping_handle.abort();
    write_handle.abort();
    info!(conn_id = %conn, username = %String::from_utf8_lossy(&username), "connection closed");
}

/// Decode and dispatch one inbound frame, replying directly to `conn` when
/// the dispatcher produces a response. A malformed frame is dropped without
/// closing the connection. If the reply overflows the outbound queue, the
/// connection's cancellation token is tripped, and the next loop iteration
/// of `handle_connection`'s `select!` tears the connection down.
async fn handle_frame(state: &ServerState, conn: ConnId, username: &Bytes, bytes: &[u8]) {
    let request = match decode_request(bytes) {
        Ok(req) => req,
        Err(e) => {
            debug!(conn_id = %conn, error = %e, "malformed frame dropped");
            return;
        },
    };

    if let Some(response) = dispatcher::dispatch(state, conn, username, request).await {
        let frame = encode_response(&response).freeze();
        state.reply(conn, frame).await;
    }
}

/// On entering Active: register the user, subscribe to the group channel,
/// ensure+subscribe every existing pair channel, and announce. Returns
/// `false` if registration lost a race (duplicate name).
async fn enter_active(
    state: &Arc<ServerState>,
    conn: ConnId,
    username: Bytes,
    outbound: mpsc::Sender<OutboundMsg>,
    cancel: CancellationToken,
) -> bool {
    let others: Vec<Bytes> = {
        let mut presence = state.presence.write().await;
        if presence.register(username.clone()).is_err() {
            warn!(conn_id = %conn, "duplicate username raced past the upgrade check");
            return false;
        }
        presence
            .iterate()
            .map(|u| u.username.clone())
            .filter(|n| n.as_ref() != username.as_ref())
            .collect()
    };

    state
        .register_connection(conn, ConnHandle {
            username: username.clone(),
            outbound,
            cancel,
        })
        .await;

    state.router.subscribe(conn, ChannelName::Group).await;

    for other in others {
        let channel = crate::router::pair_channel(&username, &other);
        state.histories.ensure(channel.clone()).await;
        state.router.subscribe(conn, channel.clone()).await;
        // `other` was already Active before this connection joined, so its
        // own `enter_active` ran before this pair channel existed and never
        // had a chance to subscribe to it. Resolve its live `ConnId` and
        // subscribe it now, or it would never receive messages on a pair
        // channel whose existence postdates its own join.
        if let Some(other_conn) = state.conn_for_username(&other).await {
            state.router.subscribe(other_conn, channel).await;
        }
    }

    let frame = encode_response(&Response::RegisteredUser(username, Status::Active)).freeze();
    state.publish(&ChannelName::Group, frame).await;
    true
}

/// On entering Closed: unsubscribe everywhere, deregister, and reap
/// histories that reference this connection's username.
async fn enter_closed(state: &ServerState, conn: ConnId, username: &Bytes) {
    state.router.unsubscribe_all(conn).await;
    state.presence.write().await.remove(username);
    state.histories.reap_touching(username).await;
    state.remove_connection(&conn).await;
}

/// Best-effort WebSocket keepalive; the transport's pong handling is left
/// to axum's default frame processing.
fn spawn_ping_ticker(
    interval: std::time::Duration,
    outbound: mpsc::Sender<OutboundMsg>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if outbound.try_send(OutboundMsg::Ping).is_err() {
                        break;
                    }
                }
            }
        }
    })
}
