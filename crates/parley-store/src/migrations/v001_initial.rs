//! v001 -- Initial schema creation.
//!
//! Creates the user collaborator tables (`users`, `user_blocks`) and the chat
//! core tables (`conversations`, `conversation_clears`, `messages`).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (owned by the account collaborator, mirrored here)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID
    username   TEXT NOT NULL,
    is_online  INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at TEXT NOT NULL                -- RFC-3339, microseconds
);

CREATE TABLE IF NOT EXISTS user_blocks (
    blocker_id TEXT NOT NULL,
    blocked_id TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (blocker_id, blocked_id),
    FOREIGN KEY (blocker_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (blocked_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    pair_key          TEXT NOT NULL,              -- "<min uuid>:<max uuid>"
    user_a            TEXT NOT NULL,
    user_b            TEXT NOT NULL,
    is_group          INTEGER NOT NULL DEFAULT 0, -- reserved, always 0
    latest_message_id TEXT,                       -- nullable, no FK (repointed on delete)
    created_at        TEXT NOT NULL,

    FOREIGN KEY (user_a) REFERENCES users(id),
    FOREIGN KEY (user_b) REFERENCES users(id)
);

-- At most one direct conversation per unordered pair.
CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair
    ON conversations(pair_key);

CREATE INDEX IF NOT EXISTS idx_conversations_user_a ON conversations(user_a);
CREATE INDEX IF NOT EXISTS idx_conversations_user_b ON conversations(user_b);

-- Per-user "clear chat" markers.
CREATE TABLE IF NOT EXISTS conversation_clears (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    cleared_at      TEXT NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,              -- FK -> users(id)
    content         TEXT,                       -- trimmed, never empty
    attachment      TEXT,                       -- attachment reference
    seen            INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    created_at      TEXT NOT NULL,

    CHECK (content IS NOT NULL OR attachment IS NOT NULL),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_unseen
    ON messages(conversation_id, sender_id) WHERE seen = 0;
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_twice_without_error() {
        let conn = Connection::open_in_memory().unwrap();
        up(&conn).unwrap();
        up(&conn).unwrap();
    }
}
