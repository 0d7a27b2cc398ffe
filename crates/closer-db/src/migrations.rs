use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY,
            full_name    TEXT NOT NULL,
            email        TEXT NOT NULL UNIQUE,
            password     TEXT NOT NULL,
            avatar       TEXT,
            -- E2E enrollment: published public key, plus the private key
            -- escrowed for recovery (see DESIGN.md for the trade-off)
            public_key   TEXT,
            private_key  TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS direct_messages (
            id                    TEXT PRIMARY KEY,
            sender_id             TEXT NOT NULL REFERENCES users(id),
            receiver_id           TEXT NOT NULL REFERENCES users(id),
            text                  TEXT,
            image                 TEXT,
            is_encrypted          INTEGER NOT NULL DEFAULT 0,
            encrypted_key         TEXT,
            sender_encrypted_key  TEXT,
            iv                    TEXT,
            signature             TEXT,
            sender_public_key     TEXT,
            created_at            TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_direct_messages_pair
            ON direct_messages(sender_id, receiver_id, created_at);

        CREATE TABLE IF NOT EXISTS groups (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL,
            description  TEXT,
            avatar       TEXT,
            created_by   TEXT NOT NULL REFERENCES users(id),
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id   TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            user_id    TEXT NOT NULL REFERENCES users(id),
            role       TEXT NOT NULL DEFAULT 'member',
            joined_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (group_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user
            ON group_members(user_id);

        CREATE TABLE IF NOT EXISTS group_messages (
            id              TEXT PRIMARY KEY,
            group_id        TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            sender_id       TEXT REFERENCES users(id),
            text            TEXT,
            image           TEXT,
            kind            TEXT NOT NULL DEFAULT 'message',
            system_action   TEXT,
            is_encrypted    INTEGER NOT NULL DEFAULT 0,
            -- JSON array of {recipientId, encryptedKey} fanout entries
            encrypted_keys  TEXT,
            iv              TEXT,
            signature       TEXT,
            sender_public_key TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_group_messages_group
            ON group_messages(group_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
