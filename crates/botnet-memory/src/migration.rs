//! SQLite schema creation and migration.
//!
//! Creates all tables needed by the trust layer on first boot.

use rusqlite::Connection;

/// Current schema version.
const SCHEMA_VERSION: u32 = 1;

/// Run all migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "user_version", version)
}

/// Version 1: the five trust tables.
///
/// All timestamps are Unix milliseconds. Raw negotiation and session tokens
/// are never stored, only their SHA-256.
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS negotiation_tokens (
            token_hash TEXT PRIMARY KEY,
            from_caller TEXT NOT NULL,
            related_request_id TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
        );
        CREATE INDEX IF NOT EXISTS idx_negotiation_expires ON negotiation_tokens(expires_at);
        CREATE INDEX IF NOT EXISTS idx_negotiation_request ON negotiation_tokens(related_request_id);

        CREATE TABLE IF NOT EXISTS permanent_credentials (
            id TEXT PRIMARY KEY,
            owner_caller TEXT NOT NULL,
            peer_caller TEXT NOT NULL,
            secret TEXT NOT NULL,
            exchange_method TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            revoked_at INTEGER
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_credentials_active_pair
            ON permanent_credentials(owner_caller, peer_caller) WHERE status = 'active';

        CREATE TABLE IF NOT EXISTS session_tokens (
            token_hash TEXT PRIMARY KEY,
            owning_caller TEXT NOT NULL,
            credential_id TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            last_activity_at INTEGER NOT NULL,
            permissions TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_expires ON session_tokens(expires_at);
        CREATE INDEX IF NOT EXISTS idx_sessions_credential ON session_tokens(credential_id);

        CREATE TABLE IF NOT EXISTS friendships (
            id TEXT PRIMARY KEY,
            peer_identifier TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            state TEXT NOT NULL,
            tier TEXT NOT NULL DEFAULT 'unverified',
            established_at INTEGER,
            last_interaction_at INTEGER NOT NULL,
            interaction_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_friendships_state ON friendships(state);

        CREATE TABLE IF NOT EXISTS domain_challenges (
            id TEXT PRIMARY KEY,
            for_friendship_id TEXT NOT NULL,
            challenge_secret TEXT NOT NULL,
            expected_proof TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending'
        );
        CREATE INDEX IF NOT EXISTS idx_challenges_expires ON domain_challenges(expires_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_challenges_pending
            ON domain_challenges(for_friendship_id) WHERE status = 'pending';
        ",
    )?;
    Ok(())
}
