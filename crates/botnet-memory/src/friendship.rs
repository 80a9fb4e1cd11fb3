//! Rows of `friendships`.

use crate::{decode, from_ms, storage, to_ms};
use botnet_types::error::BotNetResult;
use botnet_types::friendship::{Friendship, FriendshipState, TrustTier};
use botnet_types::peer::PeerKind;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, peer_identifier, kind, state, tier, established_at, last_interaction_at, interaction_count, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Friendship> {
    let kind: String = row.get(2)?;
    let state: String = row.get(3)?;
    let tier: String = row.get(4)?;
    let established: Option<i64> = row.get(5)?;
    let count: i64 = row.get(7)?;
    Ok(Friendship {
        id: row.get(0)?,
        peer_identifier: row.get(1)?,
        kind: decode(2, &kind, PeerKind::parse)?,
        state: decode(3, &state, FriendshipState::parse)?,
        tier: decode(4, &tier, TrustTier::parse)?,
        established_at: established.map(from_ms),
        last_interaction_at: from_ms(row.get(6)?),
        interaction_count: count.max(0) as u64,
        created_at: from_ms(row.get(8)?),
        updated_at: from_ms(row.get(9)?),
    })
}

/// Insert a new row unless the peer already has one.
/// Returns `true` if this call created it.
pub fn insert_if_absent(conn: &Connection, f: &Friendship) -> BotNetResult<bool> {
    let changed = conn
        .execute(
            "INSERT OR IGNORE INTO friendships (id, peer_identifier, kind, state, tier, established_at, last_interaction_at, interaction_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                f.id,
                f.peer_identifier,
                f.kind.as_str(),
                f.state.as_str(),
                f.tier.as_str(),
                f.established_at.map(to_ms),
                to_ms(f.last_interaction_at),
                f.interaction_count as i64,
                to_ms(f.created_at),
                to_ms(f.updated_at),
            ],
        )
        .map_err(storage)?;
    Ok(changed == 1)
}

pub fn get_by_peer(conn: &Connection, peer: &str) -> BotNetResult<Option<Friendship>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM friendships WHERE peer_identifier = ?1"),
        params![peer],
        from_row,
    )
    .optional()
    .map_err(storage)
}

pub fn get_by_id(conn: &Connection, id: &str) -> BotNetResult<Option<Friendship>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM friendships WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .map_err(storage)
}

/// Move a friendship from `from` to `to`, setting its tier.
///
/// Activation stamps `established_at`; any other target clears it along
/// with the interaction count. Returns `false` if the row was not in `from`.
pub fn transition(
    conn: &Connection,
    id: &str,
    from: FriendshipState,
    to: FriendshipState,
    tier: TrustTier,
    now_ms: i64,
) -> BotNetResult<bool> {
    let established = (to == FriendshipState::Active).then_some(now_ms);
    let changed = conn
        .execute(
            "UPDATE friendships
             SET state = ?3, tier = ?4, established_at = ?5, updated_at = ?6,
                 last_interaction_at = ?6,
                 interaction_count = CASE WHEN ?3 = 'active' THEN interaction_count ELSE 0 END
             WHERE id = ?1 AND state = ?2",
            params![id, from.as_str(), to.as_str(), tier.as_str(), established, now_ms],
        )
        .map_err(storage)?;
    Ok(changed == 1)
}

/// Bump the interaction counters of an active friendship.
pub fn record_interaction(conn: &Connection, peer: &str, now_ms: i64) -> BotNetResult<bool> {
    let changed = conn
        .execute(
            "UPDATE friendships
             SET interaction_count = interaction_count + 1, last_interaction_at = ?2
             WHERE peer_identifier = ?1 AND state = 'active'",
            params![peer, now_ms],
        )
        .map_err(storage)?;
    Ok(changed == 1)
}

/// All friendships, optionally restricted to one state, oldest first.
pub fn list(conn: &Connection, state: Option<FriendshipState>) -> BotNetResult<Vec<Friendship>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM friendships
             WHERE ?1 IS NULL OR state = ?1 ORDER BY created_at, peer_identifier"
        ))
        .map_err(storage)?;
    let rows = stmt
        .query_map(params![state.map(|s| s.as_str())], from_row)
        .map_err(storage)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(storage)
}
