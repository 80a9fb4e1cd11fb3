//! Rows of `domain_challenges`.

use crate::{decode, from_ms, storage, to_ms};
use botnet_types::challenge::{ChallengeStatus, DomainChallenge};
use botnet_types::error::{BotNetError, BotNetResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, for_friendship_id, challenge_secret, expected_proof, issued_at, expires_at, attempts, status";

fn from_row(row: &Row<'_>) -> rusqlite::Result<DomainChallenge> {
    let attempts: i64 = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(DomainChallenge {
        id: row.get(0)?,
        for_friendship_id: row.get(1)?,
        challenge_secret: row.get(2)?,
        expected_proof: row.get(3)?,
        issued_at: from_ms(row.get(4)?),
        expires_at: from_ms(row.get(5)?),
        attempts: attempts.max(0) as u32,
        status: decode(7, &status, ChallengeStatus::parse)?,
    })
}

/// Insert a challenge. A second pending challenge for the same friendship
/// violates the partial unique index and fails.
pub fn insert(conn: &Connection, c: &DomainChallenge) -> BotNetResult<()> {
    conn.execute(
        "INSERT INTO domain_challenges (id, for_friendship_id, challenge_secret, expected_proof, issued_at, expires_at, attempts, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            c.id,
            c.for_friendship_id,
            c.challenge_secret,
            c.expected_proof,
            to_ms(c.issued_at),
            to_ms(c.expires_at),
            c.attempts,
            c.status.as_str(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            BotNetError::conflict("pending", "issue a second challenge")
        }
        other => storage(other),
    })?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> BotNetResult<Option<DomainChallenge>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM domain_challenges WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .map_err(storage)
}

/// The pending challenge of a friendship, if one exists.
pub fn find_pending(conn: &Connection, friendship_id: &str) -> BotNetResult<Option<DomainChallenge>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM domain_challenges
             WHERE for_friendship_id = ?1 AND status = 'pending'"
        ),
        params![friendship_id],
        from_row,
    )
    .optional()
    .map_err(storage)
}

/// Record an attempt on a pending challenge and set its new status.
/// Returns `false` if the challenge was no longer pending.
pub fn record_attempt(
    conn: &Connection,
    id: &str,
    attempts: u32,
    status: ChallengeStatus,
) -> BotNetResult<bool> {
    let changed = conn
        .execute(
            "UPDATE domain_challenges SET attempts = ?2, status = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![id, attempts, status.as_str()],
        )
        .map_err(storage)?;
    Ok(changed == 1)
}

/// Mark every pending challenge whose expiry is at or before `now_ms` as
/// expired. Returns how many changed.
pub fn expire_due(conn: &Connection, now_ms: i64) -> BotNetResult<usize> {
    conn.execute(
        "UPDATE domain_challenges SET status = 'expired'
         WHERE status = 'pending' AND expires_at <= ?1",
        params![now_ms],
    )
    .map_err(storage)
}

pub fn count_pending(conn: &Connection) -> BotNetResult<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM domain_challenges WHERE status = 'pending'",
        [],
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

    fn challenge(id: &str, friendship: &str, expires_ms: i64) -> DomainChallenge {
        DomainChallenge {
            id: id.to_string(),
            for_friendship_id: friendship.to_string(),
            challenge_secret: "secret".to_string(),
            expected_proof: "proof".to_string(),
            issued_at: from_ms(0),
            expires_at: from_ms(expires_ms),
            attempts: 0,
            status: ChallengeStatus::Pending,
        }
    }

    #[test]
    fn test_one_pending_per_friendship() {
        let conn = setup();
        insert(&conn, &challenge("c1", "f1", 100)).unwrap();
        let err = insert(&conn, &challenge("c2", "f1", 100)).unwrap_err();
        assert!(matches!(err, BotNetError::FriendshipConflict { .. }));
        assert_eq!(find_pending(&conn, "f1").unwrap().unwrap().id, "c1");

        record_attempt(&conn, "c1", 2, ChallengeStatus::Failed).unwrap();
        assert!(find_pending(&conn, "f1").unwrap().is_none());
        insert(&conn, &challenge("c3", "f1", 100)).unwrap();
    }

    #[test]
    fn test_record_attempt_only_while_pending() {
        let conn = setup();
        insert(&conn, &challenge("c1", "f1", 100)).unwrap();
        assert!(record_attempt(&conn, "c1", 1, ChallengeStatus::Pending).unwrap());
        assert!(record_attempt(&conn, "c1", 2, ChallengeStatus::Verified).unwrap());
        assert!(!record_attempt(&conn, "c1", 3, ChallengeStatus::Failed).unwrap());
        let c = get(&conn, "c1").unwrap().unwrap();
        assert_eq!(c.attempts, 2);
        assert_eq!(c.status, ChallengeStatus::Verified);
    }

    #[test]
    fn test_expire_due() {
        let conn = setup();
        insert(&conn, &challenge("c1", "f1", 100)).unwrap();
        insert(&conn, &challenge("c2", "f2", 500)).unwrap();
        assert_eq!(expire_due(&conn, 100).unwrap(), 1);
        assert_eq!(get(&conn, "c1").unwrap().unwrap().status, ChallengeStatus::Expired);
        assert_eq!(count_pending(&conn).unwrap(), 1);
        assert_eq!(expire_due(&conn, 100).unwrap(), 0);
    }
}
