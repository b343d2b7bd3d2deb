use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UserRole;

// -- JWT Claims --

/// JWT claims shared across worklane-api (REST middleware) and
/// worklane-gateway (WebSocket Identify). Canonical definition lives here in
/// worklane-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub full_name: String,
    pub role: UserRole,
    pub exp: usize,
}

// -- Envelope --

/// Success envelope for the chat RPC surface: `{"success": true, "data": ...}`.
/// Failures never construct this; they go through the API error type, which
/// renders `{"error": ...}` with a matching status code.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self { success: true, data }
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub full_name: String,
    pub role: UserRole,
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartConversationRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub other_user: PeerSummary,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The counterparty as shown in a conversation list entry.
#[derive(Debug, Serialize)]
pub struct PeerSummary {
    pub id: Uuid,
    pub full_name: String,
    pub role: UserRole,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// -- Payments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub plan: String,
    pub cycle: String,
    /// Amount in major currency units; converted to minor units for the
    /// gateway.
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyPaymentRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    /// Accepted for wire compatibility but ignored: plan and cycle are
    /// re-derived from the server-side order record, since the signature
    /// only authenticates the order/payment pair.
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub cycle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub message: String,
}
