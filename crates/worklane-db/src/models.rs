//! Database row types — these map directly to SQLite rows.
//! Distinct from the worklane-types API models to keep the DB layer
//! independent.

use chrono::{DateTime, NaiveDateTime, Utc};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub password: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_1_id: String,
    pub participant_2_id: String,
    pub last_message_at: String,
    pub created_at: String,
}

/// Conversation list entry with both participants' display fields joined in;
/// the caller picks whichever side is not the requesting user.
pub struct ConversationPeerRow {
    pub id: String,
    pub participant_1_id: String,
    pub participant_2_id: String,
    pub participant_1_name: String,
    pub participant_1_role: String,
    pub participant_2_name: String,
    pub participant_2_role: String,
    pub last_message_at: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

pub struct PaymentOrderRow {
    pub id: String,
    pub user_id: String,
    pub plan: String,
    pub cycle: String,
    pub amount: i64,
    pub created_at: String,
}

pub struct SubscriptionRow {
    pub id: String,
    pub user_id: String,
    pub plan: String,
    pub status: String,
    pub period_start: String,
    pub period_end: String,
    pub payment_ref: String,
    pub updated_at: String,
}

pub struct TransactionRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub amount: i64,
    pub status: String,
    pub payment_ref: Option<String>,
    pub order_ref: Option<String>,
    pub description: String,
    pub created_at: String,
}

/// Parse a timestamp column. SQLite's strftime default writes
/// "YYYY-MM-DD HH:MM:SS.SSS" without a timezone (always UTC); rows written
/// from Rust carry RFC 3339. Accept both.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.and_utc())
}
