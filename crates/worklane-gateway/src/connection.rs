use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use worklane_db::Database;
use worklane_types::api::Claims;
use worklane_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, then relay
/// conversation-scoped events filtered by this connection's subscription
/// set. Everything this connection holds (broadcast receiver, targeted
/// channel, subscriptions) is released when either task exits, so a closed
/// viewer stops receiving without disturbing other viewers.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, full_name) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", full_name, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        full_name: full_name.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Register per-user channel and subscribe to broadcasts
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;
    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection conversation subscriptions (shared between tasks).
    let subscriptions: Arc<std::sync::RwLock<HashSet<Uuid>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // Dropped events are fine: the client re-fetches
                            // the message list to reconcile after gaps.
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(conversation_id) = event.conversation_id() {
                        let subs = send_subscriptions.read()
                            .expect("subscription lock poisoned");
                        if !subs.contains(&conversation_id) {
                            continue;
                        }
                    }

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let full_name_recv = full_name.clone();
    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(cmd) => {
                            handle_command(user_id, cmd, &recv_subscriptions, &db).await;
                        }
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                full_name_recv,
                                user_id,
                                e,
                                &text[..text.len().min(200)]
                            );
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_user_channel(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", full_name, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.full_name));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    user_id: Uuid,
    cmd: GatewayCommand,
    subscriptions: &Arc<std::sync::RwLock<HashSet<Uuid>>>,
    db: &Arc<Database>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {
            // Already identified; ignore repeats.
        }
        GatewayCommand::Subscribe { conversation_ids } => {
            // Refuse subscriptions to conversations the user is not part of.
            let allowed = participant_filter(db, user_id, conversation_ids).await;
            let mut subs = subscriptions.write().expect("subscription lock poisoned");
            for id in allowed {
                subs.insert(id);
            }
        }
        GatewayCommand::Unsubscribe { conversation_ids } => {
            let mut subs = subscriptions.write().expect("subscription lock poisoned");
            for id in conversation_ids {
                subs.remove(&id);
            }
        }
    }
}

/// Keep only the conversations `user_id` actually participates in. The
/// rusqlite lookups run off the async runtime.
async fn participant_filter(
    db: &Arc<Database>,
    user_id: Uuid,
    conversation_ids: Vec<Uuid>,
) -> Vec<Uuid> {
    let db = db.clone();
    let uid = user_id.to_string();

    let result = tokio::task::spawn_blocking(move || {
        let mut allowed = Vec::with_capacity(conversation_ids.len());
        for id in conversation_ids {
            match db.get_conversation(&id.to_string()) {
                Ok(Some(conv))
                    if conv.participant_1_id == uid || conv.participant_2_id == uid =>
                {
                    allowed.push(id);
                }
                Ok(_) => {
                    warn!("{} tried to subscribe to conversation {} without membership", uid, id);
                }
                Err(e) => {
                    warn!("Subscription check failed for {}: {}", id, e);
                }
            }
        }
        allowed
    })
    .await;

    result.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Arc<Database> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    fn add_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(
            &id.to_string(),
            &format!("{}@example.com", name),
            name,
            "client",
            "hash",
        )
        .unwrap();
        id
    }

    fn start_conversation(db: &Database, a: Uuid, b: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        db.resolve_conversation(&id.to_string(), &a.to_string(), &b.to_string())
            .unwrap();
        id
    }

    fn empty_subs() -> Arc<std::sync::RwLock<HashSet<Uuid>>> {
        Arc::new(std::sync::RwLock::new(HashSet::new()))
    }

    #[tokio::test]
    async fn subscribe_refused_without_membership() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let mallory = add_user(&db, "mallory");
        let conversation = start_conversation(&db, alice, bob);

        let subs = empty_subs();
        handle_command(
            mallory,
            GatewayCommand::Subscribe {
                conversation_ids: vec![conversation],
            },
            &subs,
            &db,
        )
        .await;

        assert!(subs.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_accepts_participants_only() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let carol = add_user(&db, "carol");
        let with_bob = start_conversation(&db, alice, bob);
        let between_others = start_conversation(&db, bob, carol);
        let unknown = Uuid::new_v4();

        let subs = empty_subs();
        handle_command(
            alice,
            GatewayCommand::Subscribe {
                conversation_ids: vec![with_bob, between_others, unknown],
            },
            &subs,
            &db,
        )
        .await;

        let held = subs.read().unwrap().clone();
        assert_eq!(held.len(), 1);
        assert!(held.contains(&with_bob));
    }

    #[tokio::test]
    async fn unsubscribe_tears_down_subscription() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let conversation = start_conversation(&db, alice, bob);

        let subs = empty_subs();
        handle_command(
            alice,
            GatewayCommand::Subscribe {
                conversation_ids: vec![conversation],
            },
            &subs,
            &db,
        )
        .await;
        assert!(subs.read().unwrap().contains(&conversation));

        handle_command(
            alice,
            GatewayCommand::Unsubscribe {
                conversation_ids: vec![conversation],
            },
            &subs,
            &db,
        )
        .await;
        assert!(subs.read().unwrap().is_empty());
    }
}
