//! Rows of `negotiation_tokens`.

use crate::{decode, from_ms, storage, to_ms};
use botnet_types::error::BotNetResult;
use botnet_types::token::{NegotiationRecord, NegotiationStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str =
    "token_hash, from_caller, related_request_id, issued_at, expires_at, status";

fn from_row(row: &Row<'_>) -> rusqlite::Result<NegotiationRecord> {
    let status: String = row.get(5)?;
    Ok(NegotiationRecord {
        token_hash: row.get(0)?,
        from_caller: row.get(1)?,
        related_request_id: row.get(2)?,
        issued_at: from_ms(row.get(3)?),
        expires_at: from_ms(row.get(4)?),
        status: decode(5, &status, NegotiationStatus::parse)?,
    })
}

pub fn insert(conn: &Connection, record: &NegotiationRecord) -> BotNetResult<()> {
    conn.execute(
        "INSERT INTO negotiation_tokens (token_hash, from_caller, related_request_id, issued_at, expires_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.token_hash,
            record.from_caller,
            record.related_request_id,
            to_ms(record.issued_at),
            to_ms(record.expires_at),
            record.status.as_str(),
        ],
    )
    .map_err(storage)?;
    Ok(())
}

pub fn get(conn: &Connection, token_hash: &str) -> BotNetResult<Option<NegotiationRecord>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM negotiation_tokens WHERE token_hash = ?1"),
        params![token_hash],
        from_row,
    )
    .optional()
    .map_err(storage)
}

/// Move a token from `from` to `to`. Returns `false` if it was not in `from`,
/// which is how exactly-once consumption is enforced.
pub fn transition(
    conn: &Connection,
    token_hash: &str,
    from: NegotiationStatus,
    to: NegotiationStatus,
) -> BotNetResult<bool> {
    let changed = conn
        .execute(
            "UPDATE negotiation_tokens SET status = ?3 WHERE token_hash = ?1 AND status = ?2",
            params![token_hash, from.as_str(), to.as_str()],
        )
        .map_err(storage)?;
    Ok(changed == 1)
}

/// Reject every still-pending token bound to `related_request_id`.
pub fn reject_pending_for(conn: &Connection, related_request_id: &str) -> BotNetResult<usize> {
    conn.execute(
        "UPDATE negotiation_tokens SET status = ?2 WHERE related_request_id = ?1 AND status = ?3",
        params![
            related_request_id,
            NegotiationStatus::Rejected.as_str(),
            NegotiationStatus::Pending.as_str(),
        ],
    )
    .map_err(storage)
}

/// Delete every token whose expiry is at or before `now_ms`.
pub fn delete_expired(conn: &Connection, now_ms: i64) -> BotNetResult<usize> {
    conn.execute(
        "DELETE FROM negotiation_tokens WHERE expires_at <= ?1",
        params![now_ms],
    )
    .map_err(storage)
}
