//! v002 -- Conversation display names and attachment ownership.
//!
//! Adds `conversations.chat_name` (backfilled from the participants'
//! usernames) and the `attachments` table recording who uploaded each file.

use rusqlite::Connection;

/// SQL executed when upgrading from version 1 to version 2.
const UP_SQL: &str = r#"
ALTER TABLE conversations ADD COLUMN chat_name TEXT NOT NULL DEFAULT '';

UPDATE conversations SET chat_name =
    (SELECT username FROM users WHERE id = conversations.user_a)
    || ' & ' ||
    (SELECT username FROM users WHERE id = conversations.user_b)
WHERE chat_name = '';

-- ----------------------------------------------------------------
-- Attachments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachments (
    reference  TEXT PRIMARY KEY NOT NULL,   -- "<uuid>[.ext]"
    owner_id   TEXT NOT NULL,               -- uploader
    size       INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_attachment
    ON messages(attachment) WHERE attachment IS NOT NULL;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
