//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Events table schema.
#[derive(Iden)]
pub enum Events {
    Table,
    #[iden = "seq_id"]
    SeqId,
    #[iden = "stream_id"]
    StreamId,
    #[iden = "version"]
    Version,
    #[iden = "event_type"]
    EventType,
    #[iden = "stream_type"]
    StreamType,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "data"]
    Data,
}

/// Projection progress table schema.
#[derive(Iden)]
pub enum ProjectionProgress {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "last_seq_id"]
    LastSeqId,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Projection documents table schema.
#[derive(Iden)]
pub enum ProjectionDocuments {
    Table,
    #[iden = "collection"]
    Collection,
    #[iden = "id"]
    Id,
    #[iden = "body"]
    Body,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Dead letters table schema.
#[derive(Iden)]
pub enum DeadLetters {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "shard"]
    Shard,
    #[iden = "projection_name"]
    ProjectionName,
    #[iden = "event_sequence"]
    EventSequence,
    #[iden = "event_type"]
    EventType,
    #[iden = "stream_id"]
    StreamId,
    #[iden = "reason"]
    Reason,
    #[iden = "message"]
    Message,
    #[iden = "recorded_at"]
    RecordedAt,
}

/// Daemon leases table schema.
#[derive(Iden)]
pub enum DaemonLeases {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "holder"]
    Holder,
    #[iden = "expires_at"]
    ExpiresAt,
}

/// SQL for creating the events table.
pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    seq_id BIGINT NOT NULL PRIMARY KEY,
    stream_id TEXT NOT NULL,
    version BIGINT NOT NULL,
    event_type TEXT NOT NULL,
    stream_type TEXT NULL,
    tenant_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_stream ON events(stream_id, version);
"#;

/// SQL for creating the projection progress table.
pub const CREATE_PROJECTION_PROGRESS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS projection_progress (
    name TEXT NOT NULL PRIMARY KEY,
    last_seq_id BIGINT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// SQL for creating the projection documents table.
pub const CREATE_PROJECTION_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS projection_documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
"#;

/// SQL for creating the daemon leases table.
///
/// `expires_at` is Unix epoch milliseconds.
pub const CREATE_DAEMON_LEASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS daemon_leases (
    name TEXT NOT NULL PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at BIGINT NOT NULL
);
"#;

/// SQL for creating the dead letters table.
///
/// `{id_column}` is the backend's auto-increment primary key declaration.
pub fn create_dead_letters_table(id_column: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS dead_letters (
    id {id_column},
    shard TEXT NOT NULL,
    projection_name TEXT NOT NULL,
    event_sequence BIGINT NOT NULL,
    event_type TEXT NOT NULL,
    stream_id TEXT NOT NULL,
    reason TEXT NOT NULL,
    message TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dead_letters_shard ON dead_letters(shard);
"#
    )
}
