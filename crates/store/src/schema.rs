/// All DDL for the inboxmux SQLite schema.
/// Run in order; all statements are idempotent (IF NOT EXISTS).
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS messages (
    message_id      TEXT PRIMARY KEY NOT NULL CHECK (message_id <> ''),
    subject         TEXT,
    from_addr       TEXT,
    from_name       TEXT,
    date_sent       INTEGER,
    commit_id       TEXT NOT NULL,
    root_message_id TEXT NOT NULL CHECK (root_message_id <> '')
);

CREATE INDEX IF NOT EXISTS idx_commit_id
    ON messages (commit_id);

CREATE INDEX IF NOT EXISTS idx_root_message_id
    ON messages (root_message_id, date_sent);

CREATE INDEX IF NOT EXISTS idx_date_sent
    ON messages (date_sent);

-- Single row (id = 1). Written in the same transaction as each batch.
CREATE TABLE IF NOT EXISTS ingest_state (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    last_commit     TEXT,
    position        INTEGER NOT NULL DEFAULT 0,
    last_indexed_at INTEGER,
    last_error      TEXT
);

CREATE TABLE IF NOT EXISTS skipped_commits (
    commit_id   TEXT PRIMARY KEY NOT NULL,
    reason      TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);
"#;
