use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, full_name: String },

    /// A new message was appended to a conversation
    MessageCreated {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// A participant marked the other side's messages as read
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
    },

    /// A conversation was created with this user as a participant
    ConversationStarted {
        conversation_id: Uuid,
        participant_1_id: Uuid,
        participant_2_id: Uuid,
    },
}

impl GatewayEvent {
    /// Returns the conversation_id if this event is scoped to a specific
    /// conversation. `None` means the event is targeted by user instead and
    /// bypasses the subscription filter.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreated { conversation_id, .. } => Some(*conversation_id),
            Self::MessagesRead { conversation_id, .. } => Some(*conversation_id),
            // Ready and ConversationStarted are delivered per-user
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to events for specific conversations. The server only
    /// forwards conversation-scoped events for subscribed conversations,
    /// and refuses ids the user is not a participant of.
    Subscribe { conversation_ids: Vec<Uuid> },

    /// Drop subscriptions, e.g. when a conversation view closes.
    Unsubscribe { conversation_ids: Vec<Uuid> },
}
