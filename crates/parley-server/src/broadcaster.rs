use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ConversationId, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

pub type ConnectionId = u64;

/// One live realtime connection.
struct Connection {
    /// Identity authenticated at upgrade time.
    user: UserId,
    /// Set once the client has announced itself online.
    announced: bool,
    tx: mpsc::Sender<ServerEvent>,
    topics: HashSet<ConversationId>,
}

#[derive(Default)]
struct Hub {
    connections: HashMap<ConnectionId, Connection>,
    topics: HashMap<ConversationId, HashSet<ConnectionId>>,
}

/// Per-conversation fan-out of realtime events.
///
/// Every connection owns a bounded outbound queue. Events for a connection
/// whose queue is full are dropped so one slow reader never stalls delivery
/// to the others; events for a single connection keep their publish order.
#[derive(Clone)]
pub struct Broadcaster {
    hub: Arc<RwLock<Hub>>,
    next_id: Arc<AtomicU64>,
    queue: usize,
}

impl Broadcaster {
    pub fn new(queue: usize) -> Self {
        Self {
            hub: Arc::new(RwLock::new(Hub::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            queue: queue.max(1),
        }
    }

    /// Register a connection for `user`. Returns its id and outbound queue.
    pub async fn register(&self, user: UserId) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.queue);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.hub.write().await.connections.insert(
            id,
            Connection {
                user,
                announced: false,
                tx,
                topics: HashSet::new(),
            },
        );

        debug!(conn = id, user = %user, "Connection registered");
        (id, rx)
    }

    pub async fn is_announced(&self, conn: ConnectionId) -> bool {
        self.hub
            .read()
            .await
            .connections
            .get(&conn)
            .map(|c| c.announced)
            .unwrap_or(false)
    }

    /// Mark the connection as announced. Returns `false` if it already was,
    /// or if the connection is gone.
    pub async fn announce(&self, conn: ConnectionId) -> bool {
        let mut hub = self.hub.write().await;
        match hub.connections.get_mut(&conn) {
            Some(c) if !c.announced => {
                c.announced = true;
                true
            }
            _ => false,
        }
    }

    /// Join `conn` to a conversation topic.
    pub async fn subscribe(&self, conn: ConnectionId, conversation: ConversationId) -> bool {
        let mut hub = self.hub.write().await;
        let Some(connection) = hub.connections.get_mut(&conn) else {
            return false;
        };
        connection.topics.insert(conversation);
        let subscribers = hub.topics.entry(conversation).or_default();
        subscribers.insert(conn);

        info!(
            conversation = %conversation,
            conn,
            subscribers = subscribers.len(),
            "Connection joined conversation"
        );
        true
    }

    pub async fn is_subscribed(&self, conn: ConnectionId, conversation: ConversationId) -> bool {
        self.hub
            .read()
            .await
            .topics
            .get(&conversation)
            .map(|subs| subs.contains(&conn))
            .unwrap_or(false)
    }

    /// Deliver `event` to every subscriber of `conversation` except the
    /// connections of `sender`. Returns how many queues accepted it.
    pub async fn publish(
        &self,
        conversation: ConversationId,
        event: ServerEvent,
        sender: UserId,
    ) -> usize {
        let hub = self.hub.read().await;
        let Some(subscribers) = hub.topics.get(&conversation) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in subscribers {
            let Some(connection) = hub.connections.get(conn) else {
                continue;
            };
            if connection.user == sender {
                continue;
            }
            if connection.tx.try_send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(
                    conversation = %conversation,
                    peer = conn,
                    kind = event.kind(),
                    "Dropping event for slow connection"
                );
            }
        }
        delivered
    }

    /// Deliver `event` to every connection not owned by `except`.
    pub async fn broadcast_all(&self, event: ServerEvent, except: UserId) -> usize {
        let hub = self.hub.read().await;
        let mut delivered = 0;
        for (id, connection) in &hub.connections {
            if connection.user == except {
                continue;
            }
            if connection.tx.try_send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(peer = id, kind = event.kind(), "Dropping event for slow connection");
            }
        }
        delivered
    }

    /// Queue an event for a single connection (acks and errors).
    pub async fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let hub = self.hub.read().await;
        match hub.connections.get(&conn) {
            Some(connection) => connection.tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Forget a connection and leave all its topics. Returns the user if the
    /// connection had announced itself, so presence can be updated.
    pub async fn disconnect(&self, conn: ConnectionId) -> Option<UserId> {
        let mut hub = self.hub.write().await;
        let connection = hub.connections.remove(&conn)?;

        for conversation in &connection.topics {
            let now_empty = match hub.topics.get_mut(conversation) {
                Some(subs) => {
                    subs.remove(&conn);
                    subs.is_empty()
                }
                None => false,
            };
            if now_empty {
                hub.topics.remove(conversation);
                debug!(conversation = %conversation, "Removed empty topic");
            }
        }

        debug!(conn, user = %connection.user, "Connection closed");
        connection.announced.then_some(connection.user)
    }

    pub async fn subscriber_count(&self, conversation: ConversationId) -> usize {
        self.hub
            .read()
            .await
            .topics
            .get(&conversation)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(conversation: ConversationId, user: UserId) -> ServerEvent {
        ServerEvent::TypingIndicator {
            conversation_id: conversation,
            user_id: user,
        }
    }

    #[tokio::test]
    async fn test_publish_skips_sender() {
        let hub = Broadcaster::new(8);
        let alice = UserId::new();
        let bob = UserId::new();
        let conversation = ConversationId::new();

        let (a, mut a_rx) = hub.register(alice).await;
        let (b, mut b_rx) = hub.register(bob).await;
        hub.subscribe(a, conversation).await;
        hub.subscribe(b, conversation).await;

        let delivered = hub.publish(conversation, typing(conversation, alice), alice).await;
        assert_eq!(delivered, 1);
        assert_eq!(b_rx.try_recv().unwrap(), typing(conversation, alice));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_only_reaches_topic() {
        let hub = Broadcaster::new(8);
        let alice = UserId::new();
        let bob = UserId::new();
        let joined = ConversationId::new();
        let other = ConversationId::new();

        let (_, _a_rx) = hub.register(alice).await;
        let (b, mut b_rx) = hub.register(bob).await;
        hub.subscribe(b, joined).await;

        assert_eq!(hub.publish(other, typing(other, alice), alice).await, 0);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_per_connection_order() {
        let hub = Broadcaster::new(8);
        let alice = UserId::new();
        let bob = UserId::new();
        let conversation = ConversationId::new();

        let (b, mut b_rx) = hub.register(bob).await;
        hub.subscribe(b, conversation).await;

        for _ in 0..3 {
            hub.publish(conversation, typing(conversation, alice), alice).await;
        }
        hub.publish(conversation, ServerEvent::Error { message: "last".into() }, alice)
            .await;

        for _ in 0..3 {
            assert!(matches!(b_rx.recv().await, Some(ServerEvent::TypingIndicator { .. })));
        }
        assert!(matches!(b_rx.recv().await, Some(ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let hub = Broadcaster::new(1);
        let alice = UserId::new();
        let bob = UserId::new();
        let conversation = ConversationId::new();

        let (b, _b_rx) = hub.register(bob).await;
        hub.subscribe(b, conversation).await;

        assert_eq!(hub.publish(conversation, typing(conversation, alice), alice).await, 1);
        assert_eq!(hub.publish(conversation, typing(conversation, alice), alice).await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_topics() {
        let hub = Broadcaster::new(8);
        let alice = UserId::new();
        let conversation = ConversationId::new();

        let (a, _rx) = hub.register(alice).await;
        hub.subscribe(a, conversation).await;
        assert_eq!(hub.subscriber_count(conversation).await, 1);

        // Never announced, so presence has nothing to undo.
        assert_eq!(hub.disconnect(a).await, None);
        assert_eq!(hub.subscriber_count(conversation).await, 0);
        assert!(!hub.send_to(a, ServerEvent::Error { message: "gone".into() }).await);

        let (a2, _rx2) = hub.register(alice).await;
        assert!(!hub.is_announced(a2).await);
        assert!(hub.announce(a2).await);
        assert!(hub.is_announced(a2).await);
        assert!(!hub.announce(a2).await);
        assert_eq!(hub.disconnect(a2).await, Some(alice));
    }

    #[tokio::test]
    async fn test_broadcast_all_skips_owner() {
        let hub = Broadcaster::new(8);
        let alice = UserId::new();
        let bob = UserId::new();

        let (_, mut a_rx) = hub.register(alice).await;
        let (_, mut b_rx) = hub.register(bob).await;

        let event = ServerEvent::PresenceChanged {
            user_id: alice,
            online: true,
        };
        assert_eq!(hub.broadcast_all(event.clone(), alice).await, 1);
        assert_eq!(b_rx.try_recv().unwrap(), event);
        assert!(a_rx.try_recv().is_err());
    }
}
