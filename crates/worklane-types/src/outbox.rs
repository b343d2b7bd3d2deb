use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::Message;

/// How far apart a staged entry and the authoritative row may be and still
/// be treated as the same send. Covers request latency plus modest clock
/// skew between client and server.
const MATCH_WINDOW_SECS: i64 = 30;

fn match_window() -> Duration {
    Duration::seconds(MATCH_WINDOW_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Rendered locally, append call still in flight.
    InFlight,
    /// The append failed; the entry must be shown as failed, never left
    /// looking sent.
    Failed,
}

/// A locally-rendered message awaiting server confirmation.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub temp_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub staged_at: DateTime<Utc>,
    pub state: PendingState,
}

/// Client-side pending-operation log for optimistic echo.
///
/// A sending client stages its outgoing message under a temporary id and
/// renders it immediately. When the authoritative row arrives (append
/// response or gateway event), `reconcile` matches it by conversation,
/// sender, content and approximate time, and the temporary entry is retired
/// in favour of the real id. If the append fails, `mark_failed` keeps the
/// entry visible in a failed state so the user is never shown a phantom
/// "sent" message.
#[derive(Debug, Default)]
pub struct PendingOutbox {
    entries: Vec<PendingMessage>,
}

impl PendingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an outgoing message; returns the temporary id to render under.
    pub fn stage(&mut self, conversation_id: Uuid, sender_id: Uuid, content: &str) -> Uuid {
        let temp_id = Uuid::new_v4();
        self.entries.push(PendingMessage {
            temp_id,
            conversation_id,
            sender_id,
            content: content.to_string(),
            staged_at: Utc::now(),
            state: PendingState::InFlight,
        });
        temp_id
    }

    /// Match an authoritative message against the staged entries. On a match
    /// the entry is removed and its temporary id returned so the caller can
    /// swap it for `message.id` in whatever it rendered. Failed entries are
    /// not eligible; they stay until explicitly discarded.
    pub fn reconcile(&mut self, message: &Message) -> Option<Uuid> {
        let idx = self.entries.iter().position(|e| {
            e.state == PendingState::InFlight
                && e.conversation_id == message.conversation_id
                && e.sender_id == message.sender_id
                && e.content == message.content
                && (message.created_at - e.staged_at).abs() <= match_window()
        })?;
        Some(self.entries.remove(idx).temp_id)
    }

    /// Flag an in-flight entry as failed after a rejected append.
    pub fn mark_failed(&mut self, temp_id: Uuid) -> bool {
        match self.entries.iter_mut().find(|e| e.temp_id == temp_id) {
            Some(entry) => {
                entry.state = PendingState::Failed;
                true
            }
            None => false,
        }
    }

    /// Drop a failed entry once the user has dismissed or retried it.
    pub fn discard(&mut self, temp_id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.temp_id != temp_id);
        self.entries.len() != before
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &PendingMessage> {
        self.entries.iter().filter(|e| e.state == PendingState::InFlight)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PendingMessage> {
        self.entries.iter().filter(|e| e.state == PendingState::Failed)
    }
}
