//! WebSocket gateway.
//!
//! Each socket is split in two: a writer task drains the connection's
//! outbound queue into the socket, while the read loop parses client events
//! and dispatches them. Closing either side tears down the connection and
//! updates presence.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use parley_shared::protocol::{ClientEvent, ServerEvent};
use parley_shared::types::UserId;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::auth::Caller;
use crate::broadcaster::ConnectionId;
use crate::error::ServerError;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
    let (conn, mut outbound) = state.broadcaster.register(user).await;
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, kind = event.kind(), "Failed to encode event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let reader_state = state.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    handle_text(&reader_state, conn, user, &text).await;
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(conn, error = %e, "Socket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if let Some(user) = state.broadcaster.disconnect(conn).await {
        if let Err(e) = state.presence.mark_offline(user).await {
            warn!(user = %user, error = %e, "Failed to record offline presence");
        }
    }
}

async fn handle_text(state: &AppState, conn: ConnectionId, user: UserId, text: &str) {
    let result = match ClientEvent::from_json(text) {
        Ok(event) => handle_event(state, conn, user, event).await,
        Err(e) => Err(ServerError::InvalidOperation(format!("malformed event: {e}"))),
    };

    if let Err(e) = result {
        debug!(conn, error = %e, "Client event rejected");
        state
            .broadcaster
            .send_to(
                conn,
                ServerEvent::Error {
                    message: e.public_message(),
                },
            )
            .await;
    }
}

/// Apply one client event on behalf of the connection's authenticated user.
pub(crate) async fn handle_event(
    state: &AppState,
    conn: ConnectionId,
    user: UserId,
    event: ClientEvent,
) -> Result<(), ServerError> {
    match event {
        ClientEvent::AnnounceOnline { user_id } => {
            ensure_self(user, user_id)?;
            if state.broadcaster.is_announced(conn).await {
                return Ok(());
            }
            // Counted first so a failed announce leaves the connection free
            // to try again.
            state.presence.mark_online(user).await?;
            if !state.broadcaster.announce(conn).await {
                // Closed while the store write ran; disconnect will not undo it.
                state.presence.mark_offline(user).await?;
            }
            Ok(())
        }

        ClientEvent::JoinConversation { conversation_id } => {
            state.chat.ensure_participant(conversation_id, user).await?;
            state.broadcaster.subscribe(conn, conversation_id).await;
            Ok(())
        }

        ClientEvent::Typing {
            conversation_id,
            user_id,
        } => {
            ensure_self(user, user_id)?;
            if !state.broadcaster.is_subscribed(conn, conversation_id).await {
                return Err(ServerError::Forbidden(
                    "join the conversation before typing".into(),
                ));
            }
            state.chat.typing(conversation_id, user).await?;
            Ok(())
        }

        ClientEvent::MessageSent {
            conversation_id,
            message,
        } => {
            let sent = state
                .chat
                .send(conversation_id, user, message.content, message.attachment)
                .await?;
            state
                .broadcaster
                .send_to(
                    conn,
                    ServerEvent::MessageAck {
                        conversation_id,
                        message: sent.into(),
                    },
                )
                .await;
            Ok(())
        }
    }
}

fn ensure_self(caller: UserId, claimed: UserId) -> Result<(), ServerError> {
    if caller == claimed {
        Ok(())
    } else {
        Err(ServerError::Forbidden(
            "cannot act on behalf of another user".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_state;
    use parley_shared::protocol::MessageDraft;

    #[tokio::test]
    async fn test_announce_requires_own_identity() {
        let (state, alice, bob, _dir) = test_state().await;
        let (conn, _rx) = state.broadcaster.register(alice).await;

        let err = handle_event(&state, conn, alice, ClientEvent::AnnounceOnline { user_id: bob })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
        assert!(!state.presence.is_online(alice).await);

        handle_event(&state, conn, alice, ClientEvent::AnnounceOnline { user_id: alice })
            .await
            .unwrap();
        assert!(state.presence.is_online(alice).await);

        // A repeated announce on the same connection does not double count.
        handle_event(&state, conn, alice, ClientEvent::AnnounceOnline { user_id: alice })
            .await
            .unwrap();
        assert_eq!(state.broadcaster.disconnect(conn).await, Some(alice));
        assert!(state.presence.mark_offline(alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_announce_can_be_retried() {
        let (state, _alice, _bob, _dir) = test_state().await;
        let carol = UserId::new();
        let (conn, _rx) = state.broadcaster.register(carol).await;

        let err = handle_event(&state, conn, carol, ClientEvent::AnnounceOnline { user_id: carol })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
        assert!(!state.broadcaster.is_announced(conn).await);
        assert!(!state.presence.is_online(carol).await);

        state
            .chat
            .db()
            .run("upsert_user", move |db| db.upsert_user(carol, "carol"))
            .await
            .unwrap();

        handle_event(&state, conn, carol, ClientEvent::AnnounceOnline { user_id: carol })
            .await
            .unwrap();
        assert!(state.broadcaster.is_announced(conn).await);
        assert!(state.presence.is_online(carol).await);
        let stored = state
            .chat
            .db()
            .run("get_user", move |db| db.get_user(carol))
            .await
            .unwrap();
        assert!(stored.is_online);
    }

    #[tokio::test]
    async fn test_announce_after_close_is_undone() {
        let (state, alice, _bob, _dir) = test_state().await;
        let (conn, _rx) = state.broadcaster.register(alice).await;
        state.broadcaster.disconnect(conn).await;

        handle_event(&state, conn, alice, ClientEvent::AnnounceOnline { user_id: alice })
            .await
            .unwrap();
        assert!(!state.presence.is_online(alice).await);
    }

    #[tokio::test]
    async fn test_join_rejects_outsiders() {
        let (state, alice, bob, _dir) = test_state().await;
        let conversation = state.chat.resolve(alice, bob).await.unwrap().conversation_id;

        let outsider = UserId::new();
        let (conn, _rx) = state.broadcaster.register(outsider).await;
        let err = handle_event(
            &state,
            conn,
            outsider,
            ClientEvent::JoinConversation { conversation_id: conversation },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
        assert_eq!(state.broadcaster.subscriber_count(conversation).await, 0);
    }

    #[tokio::test]
    async fn test_message_sent_acks_and_delivers() {
        let (state, alice, bob, _dir) = test_state().await;
        let conversation = state.chat.resolve(alice, bob).await.unwrap().conversation_id;

        let (a, mut a_rx) = state.broadcaster.register(alice).await;
        let (b, mut b_rx) = state.broadcaster.register(bob).await;
        for (conn, user) in [(a, alice), (b, bob)] {
            handle_event(
                &state,
                conn,
                user,
                ClientEvent::JoinConversation { conversation_id: conversation },
            )
            .await
            .unwrap();
        }

        handle_event(
            &state,
            a,
            alice,
            ClientEvent::MessageSent {
                conversation_id: conversation,
                message: MessageDraft {
                    content: Some("hello".into()),
                    attachment: None,
                },
            },
        )
        .await
        .unwrap();

        let delivered = match b_rx.try_recv().unwrap() {
            ServerEvent::MessageDelivered { message, .. } => message,
            other => panic!("unexpected event: {other:?}"),
        };
        let acked = match a_rx.try_recv().unwrap() {
            ServerEvent::MessageAck { message, .. } => message,
            other => panic!("unexpected event: {other:?}"),
        };
        assert_eq!(delivered.id, acked.id);
        assert_eq!(delivered.sender, alice);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_typing_requires_join() {
        let (state, alice, bob, _dir) = test_state().await;
        let conversation = state.chat.resolve(alice, bob).await.unwrap().conversation_id;
        let (a, _a_rx) = state.broadcaster.register(alice).await;
        let (b, mut b_rx) = state.broadcaster.register(bob).await;
        handle_event(
            &state,
            b,
            bob,
            ClientEvent::JoinConversation { conversation_id: conversation },
        )
        .await
        .unwrap();

        let typing = ClientEvent::Typing {
            conversation_id: conversation,
            user_id: alice,
        };
        assert!(handle_event(&state, a, alice, typing.clone()).await.is_err());
        assert!(b_rx.try_recv().is_err());

        handle_event(
            &state,
            a,
            alice,
            ClientEvent::JoinConversation { conversation_id: conversation },
        )
        .await
        .unwrap();
        handle_event(&state, a, alice, typing).await.unwrap();
        assert_eq!(
            b_rx.try_recv().unwrap(),
            ServerEvent::TypingIndicator {
                conversation_id: conversation,
                user_id: alice,
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_reports_error() {
        let (state, alice, _bob, _dir) = test_state().await;
        let (conn, mut rx) = state.broadcaster.register(alice).await;

        handle_text(&state, conn, alice, "{\"type\":\"shout\"}").await;
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error { .. }));
    }
}
