use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use worklane_types::events::GatewayEvent;

/// Fans appended-message events out to connected clients.
///
/// Conversation-scoped events go over a single broadcast channel; each
/// connection filters against its own subscription set, so one viewer
/// tearing down never affects another viewer of the same conversation.
/// Delivery is at-least-once and best-effort ordered — a lagging receiver
/// drops events and the client reconciles by re-fetching the message list.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for conversation-scoped events
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to conversation-scoped events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event to every connected client; per-connection filters
    /// decide which clients actually see it.
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.user_channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches —
    /// a reconnect may already have replaced the entry.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user, if connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message_event(conversation_id: Uuid) -> GatewayEvent {
        GatewayEvent::MessageCreated {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Uuid::new_v4(),
            content: "hello".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let dispatcher = Dispatcher::new();
        let mut rx_a = dispatcher.subscribe();
        let mut rx_b = dispatcher.subscribe();

        let conv = Uuid::new_v4();
        dispatcher.publish(message_event(conv));

        assert_eq!(rx_a.recv().await.unwrap().conversation_id(), Some(conv));
        assert_eq!(rx_b.recv().await.unwrap().conversation_id(), Some(conv));
    }

    #[tokio::test]
    async fn dropping_one_receiver_leaves_others_delivering() {
        let dispatcher = Dispatcher::new();
        let rx_gone = dispatcher.subscribe();
        let mut rx_stays = dispatcher.subscribe();
        drop(rx_gone);

        let conv = Uuid::new_v4();
        dispatcher.publish(message_event(conv));

        assert_eq!(rx_stays.recv().await.unwrap().conversation_id(), Some(conv));
    }

    #[tokio::test]
    async fn targeted_send_reaches_only_that_user() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (_, mut alice_rx) = dispatcher.register_user_channel(alice).await;
        let (_, mut bob_rx) = dispatcher.register_user_channel(bob).await;

        let conv = Uuid::new_v4();
        dispatcher
            .send_to_user(
                alice,
                GatewayEvent::ConversationStarted {
                    conversation_id: conv,
                    participant_1_id: bob,
                    participant_2_id: alice,
                },
            )
            .await;

        let received = alice_rx.recv().await.unwrap();
        assert!(matches!(
            received,
            GatewayEvent::ConversationStarted { conversation_id, .. } if conversation_id == conv
        ));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_conn_id_cannot_unregister_a_newer_connection() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register_user_channel(alice).await;
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(alice).await;

        // The old connection's teardown arrives late; it must not tear down
        // the replacement.
        dispatcher.unregister_user_channel(alice, old_conn).await;

        dispatcher
            .send_to_user(
                alice,
                GatewayEvent::Ready {
                    user_id: alice,
                    full_name: "Alice".into(),
                },
            )
            .await;
        assert!(new_rx.recv().await.is_some());
    }
}
