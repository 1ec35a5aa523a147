use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID
    recipient_id TEXT NOT NULL,
    sender_id    TEXT,
    title        TEXT NOT NULL,
    body         TEXT NOT NULL,
    type         TEXT NOT NULL,
    data         TEXT NOT NULL DEFAULT 'null', -- JSON
    is_read      INTEGER NOT NULL DEFAULT 0,
    is_deleted   INTEGER NOT NULL DEFAULT 0,  -- soft delete only
    created_at   TEXT NOT NULL,
    read_at      TEXT
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient
    ON notifications(recipient_id, is_deleted, is_read, created_at DESC);

CREATE TABLE IF NOT EXISTS calls (
    id              TEXT PRIMARY KEY NOT NULL,  -- client-chosen call id
    caller_id       TEXT NOT NULL,
    recipient_id    TEXT,                       -- private calls
    conversation_id TEXT,                       -- group calls
    call_type       TEXT NOT NULL,              -- AUDIO | VIDEO
    status          TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    ended_at        TEXT,
    duration_secs   INTEGER
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
