//! The idle detector: a background worker that periodically demotes
//! inactive users and broadcasts the transition.
//!
//! A `tokio::time::interval` driven loop, spawned alongside the listener,
//! that exits on the shared shutdown token.

use std::sync::Arc;

use tracing::info;

use crate::{
    codec::{Response, Status, encode_response},
    router::ChannelName,
    state::ServerState,
};

/// Runs until `state.shutdown` is cancelled. Intended to be spawned once,
/// for the lifetime of the process.
pub async fn run(state: Arc<ServerState>) {
    let mut interval = tokio::time::interval(state.config.idle_check_period);
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = interval.tick() => scan(&state).await,
        }
    }
}

async fn scan(state: &ServerState) {
    let demoted = {
        let mut presence = state.presence.write().await;
        presence.demote_idle(state.config.idle_threshold)
    };
    for username in demoted {
        info!(username = %String::from_utf8_lossy(&username), "idle demotion");
        let frame = encode_response(&Response::ChangedStatus(username, Status::Inactive)).freeze();
        state.publish(&ChannelName::Group, frame).await;
    }
}
