use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            avatar      TEXT,
            status      TEXT NOT NULL DEFAULT 'offline',
            last_seen   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_blocks (
            user_id     TEXT NOT NULL REFERENCES users(id),
            blocked_id  TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (user_id, blocked_id)
        );

        CREATE TABLE IF NOT EXISTS groups (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT,
            creator     TEXT NOT NULL REFERENCES users(id),
            avatar      TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    TEXT NOT NULL REFERENCES groups(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            role        TEXT NOT NULL DEFAULT 'member',
            PRIMARY KEY (group_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            sender           TEXT NOT NULL REFERENCES users(id),
            receiver         TEXT REFERENCES users(id),
            group_id         TEXT REFERENCES groups(id),
            content          TEXT NOT NULL,
            content_type     TEXT NOT NULL DEFAULT 'text',
            voice_url        TEXT,
            latitude         REAL,
            longitude        REAL,
            poll_id          TEXT,
            original_content TEXT,
            timestamp        TEXT NOT NULL,
            edited_at        TEXT,
            parent_message   TEXT REFERENCES messages(id),
            forwarded_from   TEXT REFERENCES messages(id),
            is_deleted       INTEGER NOT NULL DEFAULT 0,
            is_pinned        INTEGER NOT NULL DEFAULT 0,
            CHECK ((receiver IS NULL) != (group_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_direct
            ON messages(sender, receiver, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(parent_message);

        CREATE TABLE IF NOT EXISTS read_receipts (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_id, emoji)
        );

        CREATE TABLE IF NOT EXISTS polls (
            id                 TEXT PRIMARY KEY,
            creator            TEXT NOT NULL REFERENCES users(id),
            question           TEXT NOT NULL,
            expires_at         TEXT,
            is_multiple_choice INTEGER NOT NULL DEFAULT 0,
            group_id           TEXT NOT NULL REFERENCES groups(id),
            created_at         TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS poll_options (
            poll_id     TEXT NOT NULL REFERENCES polls(id),
            idx         INTEGER NOT NULL,
            text        TEXT NOT NULL,
            PRIMARY KEY (poll_id, idx)
        );

        CREATE TABLE IF NOT EXISTS poll_votes (
            poll_id     TEXT NOT NULL,
            option_idx  INTEGER NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (poll_id, option_idx, user_id),
            FOREIGN KEY (poll_id, option_idx) REFERENCES poll_options(poll_id, idx)
        );
        ",
    )?;

    info!("database migrations complete");
    Ok(())
}
