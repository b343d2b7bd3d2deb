use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            full_name   TEXT NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('client', 'freelancer')),
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        -- pair_key is the lexicographically ordered participant pair
        -- 'min:max'; its UNIQUE index is what actually stops two concurrent
        -- first-contacts from creating duplicate threads.
        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            participant_1_id    TEXT NOT NULL REFERENCES users(id),
            participant_2_id    TEXT NOT NULL REFERENCES users(id),
            pair_key            TEXT NOT NULL UNIQUE,
            last_message_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_p1
            ON conversations(participant_1_id, last_message_at);
        CREATE INDEX IF NOT EXISTS idx_conversations_p2
            ON conversations(participant_2_id, last_message_at);

        -- created_at carries millisecond precision so that ordering within a
        -- conversation follows server-observed arrival. Messages have no
        -- update path for content; only is_read changes after insert.
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        -- Server-side record of a gateway order: plan/cycle/amount are read
        -- back from here at verification time instead of trusting the
        -- callback body.
        CREATE TABLE IF NOT EXISTS payment_orders (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            plan        TEXT NOT NULL,
            cycle       TEXT NOT NULL CHECK (cycle IN ('monthly', 'yearly')),
            amount      INTEGER NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL UNIQUE REFERENCES users(id),
            plan            TEXT NOT NULL,
            status          TEXT NOT NULL CHECK (status IN ('active', 'cancelled', 'expired')),
            period_start    TEXT NOT NULL,
            period_end      TEXT NOT NULL,
            payment_ref     TEXT NOT NULL,
            updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL,
            amount      INTEGER NOT NULL,
            status      TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed')),
            payment_ref TEXT,
            order_ref   TEXT,
            description TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_user
            ON transactions(user_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
