//! Rows of `session_tokens`.

use crate::{from_ms, storage, to_ms};
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::token::SessionRecord;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str =
    "token_hash, owning_caller, credential_id, issued_at, expires_at, last_activity_at, permissions";

fn from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let permissions: String = row.get(6)?;
    let permissions: Vec<String> = serde_json::from_str(&permissions).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(SessionRecord {
        token_hash: row.get(0)?,
        owning_caller: row.get(1)?,
        credential_id: row.get(2)?,
        issued_at: from_ms(row.get(3)?),
        expires_at: from_ms(row.get(4)?),
        last_activity_at: from_ms(row.get(5)?),
        permissions,
    })
}

pub fn insert(conn: &Connection, record: &SessionRecord) -> BotNetResult<()> {
    let permissions = serde_json::to_string(&record.permissions)
        .map_err(|e| BotNetError::Internal(e.to_string()))?;
    conn.execute(
        "INSERT INTO session_tokens (token_hash, owning_caller, credential_id, issued_at, expires_at, last_activity_at, permissions)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.token_hash,
            record.owning_caller,
            record.credential_id,
            to_ms(record.issued_at),
            to_ms(record.expires_at),
            to_ms(record.last_activity_at),
            permissions,
        ],
    )
    .map_err(storage)?;
    Ok(())
}

pub fn get(conn: &Connection, token_hash: &str) -> BotNetResult<Option<SessionRecord>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM session_tokens WHERE token_hash = ?1"),
        params![token_hash],
        from_row,
    )
    .optional()
    .map_err(storage)
}

/// Store a renewed expiry. The expiry never moves backwards.
pub fn renew(
    conn: &Connection,
    token_hash: &str,
    expires_ms: i64,
    activity_ms: i64,
) -> BotNetResult<bool> {
    let changed = conn
        .execute(
            "UPDATE session_tokens
             SET expires_at = MAX(expires_at, ?2), last_activity_at = ?3
             WHERE token_hash = ?1",
            params![token_hash, expires_ms, activity_ms],
        )
        .map_err(storage)?;
    Ok(changed == 1)
}

pub fn delete(conn: &Connection, token_hash: &str) -> BotNetResult<bool> {
    let changed = conn
        .execute(
            "DELETE FROM session_tokens WHERE token_hash = ?1",
            params![token_hash],
        )
        .map_err(storage)?;
    Ok(changed == 1)
}

/// Delete every session minted from one of `credential_ids`.
pub fn delete_for_credentials(conn: &Connection, credential_ids: &[String]) -> BotNetResult<usize> {
    let mut removed = 0;
    for id in credential_ids {
        removed += conn
            .execute(
                "DELETE FROM session_tokens WHERE credential_id = ?1",
                params![id],
            )
            .map_err(storage)?;
    }
    Ok(removed)
}

/// Delete every session whose expiry is at or before `now_ms`.
pub fn delete_expired(conn: &Connection, now_ms: i64) -> BotNetResult<usize> {
    conn.execute(
        "DELETE FROM session_tokens WHERE expires_at <= ?1",
        params![now_ms],
    )
    .map_err(storage)
}

/// Sessions still valid at `now_ms`.
pub fn count_live(conn: &Connection, now_ms: i64) -> BotNetResult<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM session_tokens WHERE expires_at > ?1",
        params![now_ms],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as usize)
    .map_err(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn record(hash: &str, credential: &str, expires_ms: i64) -> SessionRecord {
        SessionRecord {
            token_hash: hash.to_string(),
            owning_caller: "TestBot".to_string(),
            credential_id: credential.to_string(),
            issued_at: from_ms(0),
            expires_at: from_ms(expires_ms),
            last_activity_at: from_ms(0),
            permissions: vec!["message".to_string(), "gossip".to_string()],
        }
    }

    #[test]
    fn test_insert_get_delete() {
        let conn = setup();
        let rec = record("s1", "c1", 1_000);
        insert(&conn, &rec).unwrap();
        assert_eq!(get(&conn, "s1").unwrap(), Some(rec));
        assert!(delete(&conn, "s1").unwrap());
        assert!(!delete(&conn, "s1").unwrap());
    }

    #[test]
    fn test_renew_never_shortens() {
        let conn = setup();
        insert(&conn, &record("s1", "c1", 1_000)).unwrap();
        renew(&conn, "s1", 500, 400).unwrap();
        let rec = get(&conn, "s1").unwrap().unwrap();
        assert_eq!(to_ms(rec.expires_at), 1_000);
        assert_eq!(to_ms(rec.last_activity_at), 400);
        renew(&conn, "s1", 2_000, 900).unwrap();
        assert_eq!(to_ms(get(&conn, "s1").unwrap().unwrap().expires_at), 2_000);
    }

    #[test]
    fn test_delete_for_credentials_and_expired() {
        let conn = setup();
        insert(&conn, &record("s1", "c1", 1_000)).unwrap();
        insert(&conn, &record("s2", "c1", 5_000)).unwrap();
        insert(&conn, &record("s3", "c2", 100)).unwrap();
        assert_eq!(delete_for_credentials(&conn, &["c1".to_string()]).unwrap(), 2);
        assert_eq!(count_live(&conn, 0).unwrap(), 1);
        assert_eq!(delete_expired(&conn, 100).unwrap(), 1);
        assert_eq!(count_live(&conn, 0).unwrap(), 0);
    }
}
