use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Client,
    Freelancer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

/// A 1:1 messaging thread. For any unordered pair of users at most one
/// conversation exists; which participant landed in slot 1 vs slot 2 is
/// insertion order, not meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_1_id: Uuid,
    pub participant_2_id: Uuid,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participant_1_id == user_id || self.participant_2_id == user_id
    }

    /// The participant that is not `user_id`. Callers check membership first.
    pub fn other_participant(&self, user_id: Uuid) -> Uuid {
        if self.participant_1_id == user_id {
            self.participant_2_id
        } else {
            self.participant_1_id
        }
    }
}

/// Messages are append-only: no update path for the body exists anywhere in
/// the workspace. Only `is_read` is mutable, by the recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

/// A user's current billing period. Exactly one row per user; renewals
/// overwrite it. Payment history lives in the transactions log instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: String,
    pub status: SubscriptionStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub payment_ref: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// Append-only audit record of a payment event. Never edited once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub amount: i64,
    pub status: TransactionStatus,
    pub payment_ref: Option<String>,
    pub order_ref: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
