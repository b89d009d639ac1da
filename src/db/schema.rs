/// Schema for the agent database.
pub const SCHEMA: &str = r#"
-- Outbound messages waiting for confirmed delivery. AUTOINCREMENT keeps ids
-- monotonic and never reused, so id order is enqueue order.
CREATE TABLE IF NOT EXISTS pending_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Cached responses partitioned by cache generation
CREATE TABLE IF NOT EXISTS response_cache (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_generation
    ON response_cache(generation);

-- Small key/value table (active cache generation)
CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
