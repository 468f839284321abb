//! SQLite schema for the cache database.

pub(super) const SCHEMA: &str = r#"
-- Physical files found on disk
CREATE TABLE IF NOT EXISTS file_records (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    hash TEXT NOT NULL,
    crc32 TEXT NOT NULL,
    name TEXT NOT NULL,
    thumbnail_path TEXT,
    thumbnail_fingerprint TEXT,
    descriptor_path TEXT,
    size INTEGER NOT NULL,
    memo TEXT,
    prompts TEXT NOT NULL DEFAULT '[]',
    base_model TEXT,
    related_version_id INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_file_records_path ON file_records(path);
CREATE INDEX IF NOT EXISTS idx_file_records_hash ON file_records(hash);

-- Registry models
CREATE TABLE IF NOT EXISTS models (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    creator TEXT,
    nsfw INTEGER NOT NULL DEFAULT 0,
    poi INTEGER NOT NULL DEFAULT 0,
    kind TEXT NOT NULL,
    mode TEXT,
    original BLOB,
    last_synced_at TEXT,
    withdrawn INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS model_tags (
    model_id INTEGER NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (model_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_model_tags_tag ON model_tags(tag);

CREATE TABLE IF NOT EXISTS model_versions (
    id INTEGER PRIMARY KEY,
    model_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    prompts TEXT NOT NULL DEFAULT '[]',
    base_model TEXT,
    page_url TEXT NOT NULL,
    download_url TEXT,
    primary_file_id INTEGER,
    cover_image_id TEXT,
    original BLOB,
    registry_created_at TEXT,
    registry_updated_at TEXT,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_model_versions_model ON model_versions(model_id);

CREATE TABLE IF NOT EXISTS model_files (
    id INTEGER PRIMARY KEY,
    version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    kind TEXT,
    identity_hash TEXT,
    metadata TEXT,
    hashes TEXT,
    is_primary INTEGER NOT NULL DEFAULT 0,
    download_url TEXT,
    seq INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_model_files_identity ON model_files(identity_hash);
CREATE INDEX IF NOT EXISTS idx_model_files_version ON model_files(version_id);

CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    version_id INTEGER NOT NULL,
    blur_hash TEXT NOT NULL,
    local_path TEXT,
    fingerprint TEXT,
    download_url TEXT NOT NULL,
    width INTEGER,
    height INTEGER,
    nsfw INTEGER NOT NULL DEFAULT -1,
    meta TEXT,
    raw_meta BLOB,
    seq INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    UNIQUE (version_id, blur_hash)
);
"#;
