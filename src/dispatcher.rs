//! Typed request dispatch: the per-connection handler invoked for each
//! decoded inbound frame. Mutates the presence registry and chat histories,
//! and fans out the resulting events through the channel router.
//!
//! A single async entry point matches on a request's shape and returns the
//! reply the caller sends back to the requester, while also owning any
//! publish side effects (a roster broadcast or a pair-channel message,
//! alongside the direct reply).

use bytes::Bytes;

use crate::{
    codec::{ErrorCode, Request, Response, Status, encode_response},
    history::ChatEntry,
    router::{ChannelName, GROUP_NAME, channel_for, is_reserved_name, pair_channel},
    state::{ConnId, ServerState},
};

/// Handle one decoded inbound frame for the connection identified by
/// `conn`/`username`. Returns the response (if any) to send directly back
/// to the requester; publishes to other subscribers happen as a side effect.
pub async fn dispatch(
    state: &ServerState,
    conn: ConnId,
    username: &Bytes,
    req: Request,
) -> Option<Response> {
    touch_and_maybe_promote(state, username).await;

    match req {
        Request::ListUsers => {
            let presence = state.presence.read().await;
            let users = presence
                .iterate()
                .map(|u| (u.username.clone(), u.status))
                .collect();
            Some(Response::ListedUsers(users))
        },

        Request::GetUser { user } => {
            let presence = state.presence.read().await;
            match presence.lookup(&user) {
                Some(u) => Some(Response::GotUser(u.username.clone(), u.status)),
                None => Some(Response::Error(ErrorCode::UserNotFound)),
            }
        },

        Request::ChangeStatus { user, status } => {
            // A client cannot change another user's status; such a request
            // is silently ignored rather than answered with an error, since
            // answering would let a client probe for which names exist.
            if user.as_ref() != username.as_ref() {
                return None;
            }
            let mut presence = state.presence.write().await;
            match presence.request_status_change(username, status) {
                Ok(()) => {
                    drop(presence);
                    let frame = encode_response(&Response::ChangedStatus(username.clone(), status)).freeze();
                    state.publish(&ChannelName::Group, frame).await;
                    None
                },
                Err(_) => Some(Response::Error(ErrorCode::InvalidStatus)),
            }
        },

        Request::SendMessage { peer, content } => handle_send_message(state, username, peer, content).await,

        Request::GetMessages { peer } => handle_get_messages(state, username, peer).await,
    }
}

/// Every dispatch first touches the connection's last-activity stamp; if
/// that promotes the user out of `Inactive`, the promotion is published on
/// the group channel before the frame itself is handled.
async fn touch_and_maybe_promote(state: &ServerState, username: &Bytes) {
    let promoted = {
        let mut presence = state.presence.write().await;
        presence.touch_and_maybe_promote(username)
    };
    if promoted == Some(true) {
        let frame =
            encode_response(&Response::ChangedStatus(username.clone(), Status::Active)).freeze();
        state.publish(&ChannelName::Group, frame).await;
    }
}

async fn handle_send_message(
    state: &ServerState,
    username: &Bytes,
    peer: Bytes,
    content: Bytes,
) -> Option<Response> {
    if content.is_empty() {
        return Some(Response::Error(ErrorCode::EmptyMessage));
    }

    if is_reserved_name(&peer) {
        let entry = ChatEntry {
            origin_username: username.clone(),
            content: content.clone(),
        };
        let history = state.histories.ensure(ChannelName::Group).await;
        history.write().await.append(entry);

        let frame = encode_response(&Response::GotMessage {
            peer: Bytes::from_static(GROUP_NAME),
            content,
        })
        .freeze();
        state.publish(&ChannelName::Group, frame).await;
        return None;
    }

    {
        let presence = state.presence.read().await;
        if presence.lookup(&peer).is_none() {
            return Some(Response::Error(ErrorCode::UserNotFound));
        }
    }

    let channel = pair_channel(username, &peer);
    let entry = ChatEntry {
        origin_username: username.clone(),
        content: content.clone(),
    };
    let history = state.histories.ensure(channel.clone()).await;
    history.write().await.append(entry);

    let frame = encode_response(&Response::GotMessage { peer, content }).freeze();
    state.publish(&channel, frame).await;
    None
}

async fn handle_get_messages(state: &ServerState, username: &Bytes, peer: Bytes) -> Option<Response> {
    if !is_reserved_name(&peer) {
        let presence = state.presence.read().await;
        if presence.lookup(&peer).is_none() {
            return Some(Response::Error(ErrorCode::UserNotFound));
        }
    }

    let channel = channel_for(username, &peer);
    // The pair history is created at connect time while both endpoints are
    // registered, so it should already exist; `ensure` rather than `get`
    // guards against a connect-time race, at the cost of transiently
    // creating an empty history if one truly never existed.
    let history = state.histories.ensure(channel).await;
    let entries = history
        .read()
        .await
        .iterate()
        .map(|e| (e.origin_username.clone(), e.content.clone()))
        .collect();
    Some(Response::GotMessages(entries))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{codec::decode_response, config::ServerConfig, state::OutboundMsg};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn register(state: &ServerState, name: &'static str) -> (ConnId, Bytes, mpsc::Receiver<OutboundMsg>) {
        let username = Bytes::from_static(name.as_bytes());
        state.presence.write().await.register(username.clone()).unwrap();
        let conn = ConnId::new();
        let (tx, rx) = mpsc::channel(16);
        state
            .register_connection(conn, crate::state::ConnHandle {
                username: username.clone(),
                outbound: tx,
                cancel: CancellationToken::new(),
            })
            .await;
        state.router.subscribe(conn, ChannelName::Group).await;
        (conn, username, rx)
    }

    fn new_state() -> std::sync::Arc<ServerState> {
        ServerState::new(ServerConfig::default())
    }

    async fn next_frame(rx: &mut mpsc::Receiver<OutboundMsg>) -> Response {
        match rx.recv().await.expect("expected a frame") {
            OutboundMsg::Frame(bytes) => decode_response(&bytes).unwrap(),
            OutboundMsg::Ping => panic!("unexpected ping"),
        }
    }

    #[tokio::test]
    async fn list_users_replies_only_to_requester() {
        let state = new_state();
        let (conn_a, user_a, mut rx_a) = register(&state, "Flavio").await;
        let (_conn_b, _user_b, mut rx_b) = register(&state, "Jose").await;

        let resp = dispatch(&state, conn_a, &user_a, Request::ListUsers).await;
        assert!(matches!(resp, Some(Response::ListedUsers(_))));
        assert!(rx_b.try_recv().is_err());
        drop(rx_a.try_recv());
    }

    #[tokio::test]
    async fn change_status_for_another_user_is_ignored() {
        let state = new_state();
        let (conn_a, _user_a, _rx_a) = register(&state, "Flavio").await;
        let (_conn_b, user_b, mut rx_b) = register(&state, "Jose").await;

        let resp = dispatch(&state, conn_a, &Bytes::from_static(b"Flavio"), Request::ChangeStatus {
            user: user_b,
            status: Status::Busy,
        })
        .await;
        assert_eq!(resp, None);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_op_status_change_is_invalid() {
        let state = new_state();
        let (conn_a, user_a, mut rx_a) = register(&state, "Flavio").await;

        // Already Active; requesting Active again is InvalidStatus, not a no-op success.
        let resp = dispatch(&state, conn_a, &user_a, Request::ChangeStatus {
            user: user_a.clone(),
            status: Status::Active,
        })
        .await;
        assert_eq!(resp, Some(Response::Error(ErrorCode::InvalidStatus)));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn direct_message_delivers_to_both_participants_and_is_stored() {
        let state = new_state();
        let (conn_a, user_a, mut rx_a) = register(&state, "Flavio").await;
        let (conn_b, user_b, mut rx_b) = register(&state, "Jose").await;
        state.router.subscribe(conn_a, pair_channel(&user_a, &user_b)).await;
        state.router.subscribe(conn_b, pair_channel(&user_a, &user_b)).await;

        let resp = dispatch(&state, conn_a, &user_a, Request::SendMessage {
            peer: user_b.clone(),
            content: Bytes::from_static(b"Hola"),
        })
        .await;
        assert_eq!(resp, None);

        let got_a = next_frame(&mut rx_a).await;
        let got_b = next_frame(&mut rx_b).await;
        assert_eq!(got_a, Response::GotMessage {
            peer: user_b.clone(),
            content: Bytes::from_static(b"Hola")
        });
        assert_eq!(got_a, got_b);

        let resp = dispatch(&state, conn_b, &user_b, Request::GetMessages { peer: user_a.clone() }).await;
        assert_eq!(
            resp,
            Some(Response::GotMessages(vec![(user_a, Bytes::from_static(b"Hola"))]))
        );
    }

    #[tokio::test]
    async fn send_empty_message_is_rejected() {
        let state = new_state();
        let (conn_a, user_a, _rx_a) = register(&state, "Flavio").await;

        let resp = dispatch(&state, conn_a, &user_a, Request::SendMessage {
            peer: Bytes::from_static(GROUP_NAME),
            content: Bytes::new(),
        })
        .await;
        assert_eq!(resp, Some(Response::Error(ErrorCode::EmptyMessage)));
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_user_not_found() {
        let state = new_state();
        let (conn_a, user_a, _rx_a) = register(&state, "Flavio").await;

        let resp = dispatch(&state, conn_a, &user_a, Request::SendMessage {
            peer: Bytes::from_static(b"Ghost"),
            content: Bytes::from_static(b"hi"),
        })
        .await;
        assert_eq!(resp, Some(Response::Error(ErrorCode::UserNotFound)));
    }

    #[tokio::test]
    async fn inactive_user_is_promoted_and_broadcasts_before_reply() {
        let state = new_state();
        let (conn_a, user_a, mut rx_a) = register(&state, "Flavio").await;
        state.presence.write().await.demote_idle(Duration::from_secs(0));

        let resp = dispatch(&state, conn_a, &user_a, Request::ListUsers).await;
        assert!(resp.is_some());

        // The promotion broadcast arrives before the ListUsers reply.
        let first = next_frame(&mut rx_a).await;
        assert_eq!(first, Response::ChangedStatus(user_a.clone(), Status::Active));
        let second = next_frame(&mut rx_a).await;
        assert!(matches!(second, Response::ListedUsers(_)));
    }
}
