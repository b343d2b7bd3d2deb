use crate::Database;
use crate::models::{
    ConversationPeerRow, ConversationRow, MessageRow, PaymentOrderRow, SubscriptionRow,
    TransactionRow, UserRow,
};
use anyhow::Result;
use rusqlite::Connection;

/// Normalized unordered-pair key for a conversation: participants sorted
/// lexicographically and joined. The UNIQUE index on this column is the
/// storage-level defense against two concurrent first-contacts inserting
/// duplicate rows for the same pair.
pub fn conversation_pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        full_name: &str,
        role: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, full_name, role, password) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, email, full_name, role, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Conversations --

    /// Find-or-create the unique conversation between two users. Returns the
    /// row plus whether it was created by this call. The lookup checks both
    /// participant orderings; if the insert loses a race to a concurrent
    /// resolver the UNIQUE pair_key violation is resolved by re-querying and
    /// returning the winner's row.
    pub fn resolve_conversation(
        &self,
        id: &str,
        caller_id: &str,
        other_id: &str,
    ) -> Result<(ConversationRow, bool)> {
        self.with_conn(|conn| {
            if let Some(existing) = query_conversation_between(conn, caller_id, other_id)? {
                return Ok((existing, false));
            }

            let pair_key = conversation_pair_key(caller_id, other_id);
            let inserted = conn.execute(
                "INSERT INTO conversations (id, participant_1_id, participant_2_id, pair_key)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(pair_key) DO NOTHING",
                (id, caller_id, other_id, pair_key),
            )?;

            let row = query_conversation_between(conn, caller_id, other_id)?
                .ok_or_else(|| anyhow::anyhow!("conversation vanished after insert"))?;
            Ok((row, inserted > 0))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_1_id, participant_2_id, last_message_at, created_at
                 FROM conversations WHERE id = ?1",
            )?;
            stmt.query_row([id], conversation_from_row).optional()
        })
    }

    /// All conversations containing `user_id`, most recent activity first,
    /// with both participants' display fields joined in.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationPeerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.participant_1_id, c.participant_2_id,
                        u1.full_name, u1.role, u2.full_name, u2.role,
                        c.last_message_at, c.created_at
                 FROM conversations c
                 JOIN users u1 ON c.participant_1_id = u1.id
                 JOIN users u2 ON c.participant_2_id = u2.id
                 WHERE c.participant_1_id = ?1 OR c.participant_2_id = ?1
                 ORDER BY c.last_message_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationPeerRow {
                        id: row.get(0)?,
                        participant_1_id: row.get(1)?,
                        participant_2_id: row.get(2)?,
                        participant_1_name: row.get(3)?,
                        participant_1_role: row.get(4)?,
                        participant_2_name: row.get(5)?,
                        participant_2_role: row.get(6)?,
                        last_message_at: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Advisory display timestamp; not required to be atomic with the
    /// message insert it follows.
    pub fn touch_conversation(&self, id: &str, last_message_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                (id, last_message_at),
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Insert a message with a DB-assigned timestamp and return that
    /// timestamp, so concurrent senders are ordered by server-observed
    /// arrival rather than client clocks.
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<String> {
        self.with_conn(|conn| {
            let created_at = conn.query_row(
                "INSERT INTO messages (id, conversation_id, sender_id, content)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING created_at",
                (id, conversation_id, sender_id, content),
                |row| row.get(0),
            )?;
            Ok(created_at)
        })
    }

    /// Most recent `limit` messages, optionally those strictly older than the
    /// `before` cursor, returned in ascending creation order.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, content, is_read, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                   AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )?;

            let mut rows = stmt
                .query_map(rusqlite::params![conversation_id, before, limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        content: row.get(3)?,
                        is_read: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            Ok(rows)
        })
    }

    /// Mark every message sent by the other participant as read. Returns the
    /// number of rows flipped.
    pub fn mark_messages_read(&self, conversation_id: &str, reader_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
                (conversation_id, reader_id),
            )?;
            Ok(changed)
        })
    }

    // -- Payments --

    pub fn insert_payment_order(
        &self,
        id: &str,
        user_id: &str,
        plan: &str,
        cycle: &str,
        amount: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO payment_orders (id, user_id, plan, cycle, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, user_id, plan, cycle, amount),
            )?;
            Ok(())
        })
    }

    pub fn get_payment_order(&self, id: &str) -> Result<Option<PaymentOrderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, plan, cycle, amount, created_at
                 FROM payment_orders WHERE id = ?1",
            )?;
            stmt.query_row([id], |row| {
                Ok(PaymentOrderRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    plan: row.get(2)?,
                    cycle: row.get(3)?,
                    amount: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .optional()
        })
    }

    /// One subscription row per user: a repeat payment overwrites the
    /// previous billing period instead of adding a row.
    pub fn upsert_subscription(
        &self,
        id: &str,
        user_id: &str,
        plan: &str,
        status: &str,
        period_start: &str,
        period_end: &str,
        payment_ref: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subscriptions
                     (id, user_id, plan, status, period_start, period_end, payment_ref, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, strftime('%Y-%m-%d %H:%M:%f', 'now'))
                 ON CONFLICT(user_id) DO UPDATE SET
                     plan = excluded.plan,
                     status = excluded.status,
                     period_start = excluded.period_start,
                     period_end = excluded.period_end,
                     payment_ref = excluded.payment_ref,
                     updated_at = excluded.updated_at",
                (id, user_id, plan, status, period_start, period_end, payment_ref),
            )?;
            Ok(())
        })
    }

    pub fn get_subscription(&self, user_id: &str) -> Result<Option<SubscriptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, plan, status, period_start, period_end, payment_ref, updated_at
                 FROM subscriptions WHERE user_id = ?1",
            )?;
            stmt.query_row([user_id], |row| {
                Ok(SubscriptionRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    plan: row.get(2)?,
                    status: row.get(3)?,
                    period_start: row.get(4)?,
                    period_end: row.get(5)?,
                    payment_ref: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })
            .optional()
        })
    }

    pub fn insert_transaction(
        &self,
        id: &str,
        user_id: &str,
        kind: &str,
        amount: i64,
        status: &str,
        payment_ref: Option<&str>,
        order_ref: Option<&str>,
        description: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO transactions
                     (id, user_id, kind, amount, status, payment_ref, order_ref, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                (id, user_id, kind, amount, status, payment_ref, order_ref, description),
            )?;
            Ok(())
        })
    }

    pub fn transactions_for_user(&self, user_id: &str) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, kind, amount, status, payment_ref, order_ref, description, created_at
                 FROM transactions WHERE user_id = ?1
                 ORDER BY created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(TransactionRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        kind: row.get(2)?,
                        amount: row.get(3)?,
                        status: row.get(4)?,
                        payment_ref: row.get(5)?,
                        order_ref: row.get(6)?,
                        description: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is a compile-time constant from the two callers above
    let sql = format!(
        "SELECT id, email, full_name, role, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            email: row.get(1)?,
            full_name: row.get(2)?,
            role: row.get(3)?,
            password: row.get(4)?,
            created_at: row.get(5)?,
        })
    })
    .optional()
}

fn query_conversation_between(
    conn: &Connection,
    a: &str,
    b: &str,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, participant_1_id, participant_2_id, last_message_at, created_at
         FROM conversations
         WHERE (participant_1_id = ?1 AND participant_2_id = ?2)
            OR (participant_1_id = ?2 AND participant_2_id = ?1)",
    )?;
    stmt.query_row([a, b], conversation_from_row).optional()
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_1_id: row.get(1)?,
        participant_2_id: row.get(2)?,
        last_message_at: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, &format!("{}@example.com", name), name, "client", "hash")
            .unwrap();
        id
    }

    #[test]
    fn resolve_conversation_is_symmetric() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let (c1, created) = db
            .resolve_conversation(&Uuid::new_v4().to_string(), &alice, &bob)
            .unwrap();
        assert!(created);

        // Resolving from the other side must find the same row, not insert.
        let (c2, created) = db
            .resolve_conversation(&Uuid::new_v4().to_string(), &bob, &alice)
            .unwrap();
        assert!(!created);
        assert_eq!(c1.id, c2.id);
    }

    #[test]
    fn pair_key_conflict_returns_existing_row() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        let (first, _) = db
            .resolve_conversation(&Uuid::new_v4().to_string(), &alice, &bob)
            .unwrap();

        // Simulate the check-then-act race: force an insert attempt for a
        // pair that already has a row. ON CONFLICT DO NOTHING plus the
        // re-query must hand back the winner.
        let (second, created) = db
            .resolve_conversation(&Uuid::new_v4().to_string(), &alice, &bob)
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn messages_list_ascending_and_complete() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db
            .resolve_conversation(&Uuid::new_v4().to_string(), &alice, &bob)
            .unwrap();

        for i in 0..10 {
            db.insert_message(&Uuid::new_v4().to_string(), &conv.id, &alice, &format!("m{}", i))
                .unwrap();
        }

        let messages = db.get_messages(&conv.id, 50, None).unwrap();
        assert_eq!(messages.len(), 10);
        for pair in messages.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[test]
    fn message_pagination_cursor() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db
            .resolve_conversation(&Uuid::new_v4().to_string(), &alice, &bob)
            .unwrap();

        for i in 0..5 {
            let id = format!("00000000-0000-0000-0000-00000000000{}", i);
            // Explicit timestamps so the cursor boundary is unambiguous.
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    (&id, &conv.id, &alice, format!("m{}", i), format!("2026-01-01 00:00:0{}.000", i)),
                )?;
                Ok(())
            })
            .unwrap();
        }

        let newest_two = db.get_messages(&conv.id, 2, None).unwrap();
        assert_eq!(newest_two.len(), 2);
        assert_eq!(newest_two[0].content, "m3");
        assert_eq!(newest_two[1].content, "m4");

        let older = db
            .get_messages(&conv.id, 50, Some(&newest_two[0].created_at))
            .unwrap();
        assert_eq!(older.len(), 3);
        assert_eq!(older.last().unwrap().content, "m2");
    }

    #[test]
    fn mark_read_only_touches_the_other_sides_messages() {
        let db = test_db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");
        let (conv, _) = db
            .resolve_conversation(&Uuid::new_v4().to_string(), &alice, &bob)
            .unwrap();

        db.insert_message(&Uuid::new_v4().to_string(), &conv.id, &alice, "from alice")
            .unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &conv.id, &bob, "from bob")
            .unwrap();

        // Bob reads: only alice's message flips.
        let flipped = db.mark_messages_read(&conv.id, &bob).unwrap();
        assert_eq!(flipped, 1);

        let messages = db.get_messages(&conv.id, 50, None).unwrap();
        let alices = messages.iter().find(|m| m.sender_id == alice).unwrap();
        let bobs = messages.iter().find(|m| m.sender_id == bob).unwrap();
        assert!(alices.is_read);
        assert!(!bobs.is_read);
    }

    #[test]
    fn subscription_upsert_overwrites_single_row() {
        let db = test_db();
        let alice = add_user(&db, "alice");

        db.upsert_subscription(
            &Uuid::new_v4().to_string(),
            &alice,
            "monthly",
            "active",
            "2026-01-01T00:00:00Z",
            "2026-02-01T00:00:00Z",
            "pay_first",
        )
        .unwrap();

        db.upsert_subscription(
            &Uuid::new_v4().to_string(),
            &alice,
            "yearly",
            "active",
            "2026-03-01T00:00:00Z",
            "2027-03-01T00:00:00Z",
            "pay_second",
        )
        .unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM subscriptions", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);

        let sub = db.get_subscription(&alice).unwrap().unwrap();
        assert_eq!(sub.plan, "yearly");
        assert_eq!(sub.payment_ref, "pay_second");
        assert_eq!(sub.period_end, "2027-03-01T00:00:00Z");
    }

    #[test]
    fn payment_order_round_trips_plan_and_cycle() {
        let db = test_db();
        let alice = add_user(&db, "alice");

        db.insert_payment_order("order_abc", &alice, "pro", "yearly", 4999)
            .unwrap();

        let order = db.get_payment_order("order_abc").unwrap().unwrap();
        assert_eq!(order.user_id, alice);
        assert_eq!(order.plan, "pro");
        assert_eq!(order.cycle, "yearly");
        assert_eq!(order.amount, 4999);

        assert!(db.get_payment_order("order_missing").unwrap().is_none());
    }
}
