/// Schema shared by the mutation queue and the resource cache.
pub const SCHEMA: &str = r#"
-- Pending writes, replayed in sequence order
CREATE TABLE IF NOT EXISTS pending_mutations (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    origin TEXT NOT NULL,
    session TEXT,
    digest TEXT NOT NULL,
    payload TEXT NOT NULL,
    -- Milliseconds since the Unix epoch
    enqueued_at INTEGER NOT NULL
);

-- Cache generations: at most one row is 'current'
CREATE TABLE IF NOT EXISTS cache_generations (
    tag TEXT PRIMARY KEY,
    state TEXT NOT NULL CHECK (state IN ('installed', 'current')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, method, url)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation
    ON cache_entries(generation);
"#;
