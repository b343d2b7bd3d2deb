use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use worklane_db::Database;
use worklane_db::models::{ConversationRow, MessageRow, parse_timestamp};
use worklane_types::api::{
    Claims, ConversationResponse, Envelope, MessageResponse, PeerSummary, SendMessageRequest,
    StartConversationRequest,
};
use worklane_types::events::GatewayEvent;

use crate::AppState;
use crate::auth::parse_role;
use crate::error::ApiError;

/// Longest accepted message body; anything larger is a validation error, not
/// a truncation.
const MAX_MESSAGE_LEN: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` of the oldest message
    /// from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

// -- Handlers --
//
// Thin async wrappers: each one moves the blocking rusqlite work onto the
// blocking pool via the sync core functions below, then publishes gateway
// events from the async side.

/// `startConversation(otherUserId)` — find or create the unique conversation
/// between the caller and the target.
pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartConversationRequest>,
) -> Result<Json<Envelope<ConversationResponse>>, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub;
    let other = req.other_user_id;

    let (conversation, peer, created) =
        run_blocking(move || resolve_conversation(&db, caller, other)).await?;

    // Tell the other participant a thread now exists with them in it.
    if created {
        state
            .dispatcher
            .send_to_user(
                other,
                GatewayEvent::ConversationStarted {
                    conversation_id: parse_id(&conversation.id, "conversation"),
                    participant_1_id: caller,
                    participant_2_id: other,
                },
            )
            .await;
    }

    Ok(Json(Envelope::new(conversation_response(&conversation, peer))))
}

/// `getConversations()` — every thread containing the caller, most recent
/// activity first.
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Envelope<Vec<ConversationResponse>>>, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub;

    let rows = run_blocking(move || {
        db.conversations_for_user(&caller.to_string()).map_err(ApiError::from)
    })
    .await?;

    let conversations = rows
        .into_iter()
        .map(|row| {
            let caller_is_p1 = row.participant_1_id == caller.to_string();
            let (peer_id, peer_name, peer_role) = if caller_is_p1 {
                (&row.participant_2_id, &row.participant_2_name, &row.participant_2_role)
            } else {
                (&row.participant_1_id, &row.participant_1_name, &row.participant_1_role)
            };

            ConversationResponse {
                id: parse_id(&row.id, "conversation"),
                other_user: PeerSummary {
                    id: parse_id(peer_id, "user"),
                    full_name: peer_name.clone(),
                    role: parse_role(peer_role).unwrap_or(worklane_types::models::UserRole::Client),
                },
                last_message_at: ts(&row.last_message_at, &row.id),
                created_at: ts(&row.created_at, &row.id),
            }
        })
        .collect();

    Ok(Json(Envelope::new(conversations)))
}

/// `getMessages(conversationId)` — ascending creation order, bounded page.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Envelope<Vec<MessageResponse>>>, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub;
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = run_blocking(move || {
        list_messages(&db, caller, conversation_id, limit, before.as_deref())
    })
    .await?;

    Ok(Json(Envelope::new(
        rows.iter().map(message_response).collect(),
    )))
}

/// `sendMessage(conversationId, content)` — append to the log, bump the
/// conversation's activity timestamp, notify live viewers.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Envelope<MessageResponse>>, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub;

    let row =
        run_blocking(move || append_message(&db, caller, conversation_id, &req.content)).await?;

    let response = message_response(&row);

    // Push delivery after the durable insert. The send response and the
    // gateway event carry the same authoritative row, so an optimistic
    // client reconciles against either.
    state.dispatcher.publish(GatewayEvent::MessageCreated {
        id: response.id,
        conversation_id,
        sender_id: caller,
        content: row.content.clone(),
        created_at: response.created_at,
    });

    Ok(Json(Envelope::new(response)))
}

/// Mark the other participant's messages in this conversation as read.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub;

    let flipped = run_blocking(move || mark_messages_read(&db, caller, conversation_id)).await?;

    if flipped > 0 {
        state.dispatcher.publish(GatewayEvent::MessagesRead {
            conversation_id,
            reader_id: caller,
        });
    }

    Ok(Json(Envelope::new(serde_json::json!({ "marked": flipped }))))
}

// -- Sync core --
//
// All authorization and validation of the message log lives here, directly
// testable without a running server.

/// Find-or-create the conversation for {caller, other}. Self-conversations
/// are rejected outright. Returns the row, the peer's display fields, and
/// whether this call created the row.
pub fn resolve_conversation(
    db: &Database,
    caller: Uuid,
    other: Uuid,
) -> Result<(ConversationRow, PeerSummary, bool), ApiError> {
    if caller == other {
        return Err(ApiError::Validation(
            "Cannot start a conversation with yourself".into(),
        ));
    }

    let peer = db
        .get_user_by_id(&other.to_string())?
        .ok_or(ApiError::NotFound("User"))?;

    let (row, created) = db.resolve_conversation(
        &Uuid::new_v4().to_string(),
        &caller.to_string(),
        &other.to_string(),
    )?;

    let peer = PeerSummary {
        id: other,
        full_name: peer.full_name,
        role: parse_role(&peer.role).unwrap_or(worklane_types::models::UserRole::Client),
    };

    Ok((row, peer, created))
}

/// Append a message. The sender must be a participant; the body must be
/// non-empty after trimming. The row's timestamp is DB-assigned, and the
/// parent conversation's last_message_at is bumped to the same instant
/// afterwards (advisory, not atomic with the insert).
pub fn append_message(
    db: &Database,
    sender: Uuid,
    conversation_id: Uuid,
    content: &str,
) -> Result<MessageRow, ApiError> {
    let conversation = db
        .get_conversation(&conversation_id.to_string())?
        .ok_or(ApiError::NotFound("Conversation"))?;

    let sender_str = sender.to_string();
    if conversation.participant_1_id != sender_str && conversation.participant_2_id != sender_str {
        return Err(ApiError::Forbidden);
    }

    if content.trim().is_empty() {
        return Err(ApiError::Validation("Message body must not be empty".into()));
    }
    if content.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::Validation("Message body too long".into()));
    }

    let id = Uuid::new_v4();
    let created_at = db.insert_message(&id.to_string(), &conversation.id, &sender_str, content)?;
    db.touch_conversation(&conversation.id, &created_at)?;

    Ok(MessageRow {
        id: id.to_string(),
        conversation_id: conversation.id,
        sender_id: sender_str,
        content: content.to_string(),
        is_read: false,
        created_at,
    })
}

/// Full history page for a participant, ascending by creation time.
pub fn list_messages(
    db: &Database,
    caller: Uuid,
    conversation_id: Uuid,
    limit: u32,
    before: Option<&str>,
) -> Result<Vec<MessageRow>, ApiError> {
    let conversation = db
        .get_conversation(&conversation_id.to_string())?
        .ok_or(ApiError::NotFound("Conversation"))?;

    let caller_str = caller.to_string();
    if conversation.participant_1_id != caller_str && conversation.participant_2_id != caller_str {
        return Err(ApiError::Forbidden);
    }

    Ok(db.get_messages(&conversation.id, limit, before)?)
}

pub fn mark_messages_read(
    db: &Database,
    caller: Uuid,
    conversation_id: Uuid,
) -> Result<usize, ApiError> {
    let conversation = db
        .get_conversation(&conversation_id.to_string())?
        .ok_or(ApiError::NotFound("Conversation"))?;

    let caller_str = caller.to_string();
    if conversation.participant_1_id != caller_str && conversation.participant_2_id != caller_str {
        return Err(ApiError::Forbidden);
    }

    Ok(db.mark_messages_read(&conversation.id, &caller_str)?)
}

// -- Helpers --

/// Run blocking rusqlite work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Storage(anyhow::anyhow!("blocking task failed: {}", e))
    })?
}

fn conversation_response(row: &ConversationRow, peer: PeerSummary) -> ConversationResponse {
    ConversationResponse {
        id: parse_id(&row.id, "conversation"),
        other_user: peer,
        last_message_at: ts(&row.last_message_at, &row.id),
        created_at: ts(&row.created_at, &row.id),
    }
}

fn message_response(row: &MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_id(&row.id, "message"),
        conversation_id: parse_id(&row.conversation_id, "conversation"),
        sender_id: parse_id(&row.sender_id, "user"),
        content: row.content.clone(),
        is_read: row.is_read,
        created_at: ts(&row.created_at, &row.id),
    }
}

fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn ts(raw: &str, row_id: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Corrupt timestamp '{}' on row '{}'", raw, row_id);
        DateTime::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use worklane_payments::gateway::PaymentGateway;

    fn test_state() -> AppState {
        Arc::new(crate::AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".into(),
            dispatcher: worklane_gateway::dispatcher::Dispatcher::new(),
            gateway: PaymentGateway::new(
                "http://localhost:0".into(),
                "key".into(),
                "secret".into(),
            ),
        })
    }

    fn add_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(
            &id.to_string(),
            &format!("{}@example.com", name),
            name,
            "freelancer",
            "hash",
        )
        .unwrap();
        id
    }

    #[test]
    fn self_conversation_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");

        let result = resolve_conversation(&db, alice, alice);
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[test]
    fn unknown_target_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");

        let result = resolve_conversation(&db, alice, Uuid::new_v4());
        assert!(matches!(result, Err(ApiError::NotFound("User"))));
    }

    #[test]
    fn both_directions_resolve_to_one_conversation() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let (c1, _, created) = resolve_conversation(&db, alice, bob).unwrap();
        assert!(created);
        let (c2, _, created) = resolve_conversation(&db, bob, alice).unwrap();
        assert!(!created);
        assert_eq!(c1.id, c2.id);
    }

    #[test]
    fn non_participant_append_is_rejected_and_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let mallory = add_user(&db, "mallory");

        let (conv, _, _) = resolve_conversation(&db, alice, bob).unwrap();
        let conv_id: Uuid = conv.id.parse().unwrap();

        let result = append_message(&db, mallory, conv_id, "intrusion");
        assert!(matches!(result, Err(ApiError::Forbidden)));

        let messages = list_messages(&db, alice, conv_id, 50, None).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn empty_body_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _, _) = resolve_conversation(&db, alice, bob).unwrap();
        let conv_id: Uuid = conv.id.parse().unwrap();

        assert!(matches!(
            append_message(&db, alice, conv_id, "   \n "),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn non_participant_cannot_list() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let mallory = add_user(&db, "mallory");
        let (conv, _, _) = resolve_conversation(&db, alice, bob).unwrap();
        let conv_id: Uuid = conv.id.parse().unwrap();

        assert!(matches!(
            list_messages(&db, mallory, conv_id, 50, None),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn append_bumps_conversation_activity() {
        let db = Database::open_in_memory().unwrap();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _, _) = resolve_conversation(&db, alice, bob).unwrap();
        let conv_id: Uuid = conv.id.parse().unwrap();

        let row = append_message(&db, alice, conv_id, "hello").unwrap();

        let refreshed = db.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(refreshed.last_message_at, row.created_at);
    }

    /// End-to-end: start a conversation, send a message through the handler,
    /// see it in the recipient's list and on the live channel.
    #[tokio::test]
    async fn message_flow_reaches_list_and_live_channel() {
        let state = test_state();
        let alice = add_user(&state.db, "alice");
        let bob = add_user(&state.db, "bob");

        let claims = Claims {
            sub: alice,
            full_name: "alice".into(),
            role: worklane_types::models::UserRole::Freelancer,
            exp: 0,
        };

        let started = start_conversation(
            State(state.clone()),
            Extension(claims.clone()),
            Json(StartConversationRequest { other_user_id: bob }),
        )
        .await
        .unwrap();
        let conv_id = started.0.data.id;

        // A concurrent viewer subscribed to the live channel.
        let mut live_rx = state.dispatcher.subscribe();

        let sent = send_message(
            State(state.clone()),
            Path(conv_id),
            Extension(claims),
            Json(SendMessageRequest { content: "hello".into() }),
        )
        .await
        .unwrap();
        assert_eq!(sent.0.data.content, "hello");
        assert_eq!(sent.0.data.sender_id, alice);

        // Bob's list includes the message, in timestamp order.
        let messages = list_messages(&state.db, bob, conv_id, 50, None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].sender_id, alice.to_string());

        // The live channel carried a notification correlated with the insert.
        let event = live_rx.recv().await.unwrap();
        match event {
            GatewayEvent::MessageCreated { id, conversation_id, sender_id, content, .. } => {
                assert_eq!(id, sent.0.data.id);
                assert_eq!(conversation_id, conv_id);
                assert_eq!(sender_id, alice);
                assert_eq!(content, "hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
