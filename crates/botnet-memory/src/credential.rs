//! Rows of `permanent_credentials`.

use crate::{decode, from_ms, storage, to_ms};
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::token::{CredentialStatus, ExchangeMethod, PermanentCredential, PermanentSecret};
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, owner_caller, peer_caller, secret, exchange_method, created_at, last_used_at, status, revoked_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<PermanentCredential> {
    let secret: String = row.get(3)?;
    let method: String = row.get(4)?;
    let status: String = row.get(7)?;
    let last_used: Option<i64> = row.get(6)?;
    let revoked: Option<i64> = row.get(8)?;
    Ok(PermanentCredential {
        id: row.get(0)?,
        owner_caller: row.get(1)?,
        peer_caller: row.get(2)?,
        secret: decode(3, &secret, |s| PermanentSecret::parse(s).ok())?,
        exchange_method: decode(4, &method, ExchangeMethod::parse)?,
        created_at: from_ms(row.get(5)?),
        last_used_at: last_used.map(from_ms),
        status: decode(7, &status, CredentialStatus::parse)?,
        revoked_at: revoked.map(from_ms),
    })
}

/// Insert a credential. A second active row for the same ordered pair
/// violates the partial unique index and fails.
pub fn insert(conn: &Connection, cred: &PermanentCredential) -> BotNetResult<()> {
    conn.execute(
        "INSERT INTO permanent_credentials (id, owner_caller, peer_caller, secret, exchange_method, created_at, last_used_at, status, revoked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            cred.id,
            cred.owner_caller,
            cred.peer_caller,
            cred.secret.as_str(),
            cred.exchange_method.as_str(),
            to_ms(cred.created_at),
            cred.last_used_at.map(to_ms),
            cred.status.as_str(),
            cred.revoked_at.map(to_ms),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            BotNetError::conflict("active", "issue a second credential for the same pair")
        }
        other => storage(other),
    })?;
    Ok(())
}

/// The active credential for an ordered pair, if any.
pub fn find_active(
    conn: &Connection,
    owner: &str,
    peer: &str,
) -> BotNetResult<Option<PermanentCredential>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM permanent_credentials
             WHERE owner_caller = ?1 AND peer_caller = ?2 AND status = 'active'"
        ),
        params![owner, peer],
        from_row,
    )
    .optional()
    .map_err(storage)
}

pub fn get(conn: &Connection, id: &str) -> BotNetResult<Option<PermanentCredential>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM permanent_credentials WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .map_err(storage)
}

/// All active credentials owned by `owner`.
pub fn list_active_for_owner(
    conn: &Connection,
    owner: &str,
) -> BotNetResult<Vec<PermanentCredential>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM permanent_credentials
             WHERE owner_caller = ?1 AND status = 'active' ORDER BY created_at"
        ))
        .map_err(storage)?;
    let rows = stmt.query_map(params![owner], from_row).map_err(storage)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(storage)
}

pub fn touch_last_used(conn: &Connection, id: &str, now_ms: i64) -> BotNetResult<()> {
    conn.execute(
        "UPDATE permanent_credentials SET last_used_at = ?2 WHERE id = ?1",
        params![id, now_ms],
    )
    .map_err(storage)?;
    Ok(())
}

/// Revoke the active credentials in both directions between `a` and `b`.
/// Returns the ids that were revoked.
pub fn revoke_between(
    conn: &Connection,
    a: &str,
    b: &str,
    now_ms: i64,
) -> BotNetResult<Vec<String>> {
    let mut ids = Vec::new();
    for (owner, peer) in [(a, b), (b, a)] {
        if let Some(cred) = find_active(conn, owner, peer)? {
            revoke(conn, &cred.id, now_ms)?;
            ids.push(cred.id);
        }
    }
    Ok(ids)
}

/// Revoke one credential. Returns `false` if it was not active.
pub fn revoke(conn: &Connection, id: &str, now_ms: i64) -> BotNetResult<bool> {
    let changed = conn
        .execute(
            "UPDATE permanent_credentials SET status = 'revoked', revoked_at = ?2
             WHERE id = ?1 AND status = 'active'",
            params![id, now_ms],
        )
        .map_err(storage)?;
    Ok(changed == 1)
}

pub fn count_active(conn: &Connection) -> BotNetResult<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM permanent_credentials WHERE status = 'active'",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as usize)
    .map_err(storage)
}
