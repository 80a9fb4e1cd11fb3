//! Persistence for the BotNet trust layer.
//!
//! One SQLite database holds the five durable entities:
//! - **negotiation_tokens**: friendship-request polling tokens (hashed)
//! - **permanent_credentials**: one active secret per ordered (owner, peer) pair
//! - **session_tokens**: renewable session tokens (hashed)
//! - **friendships**: one row per peer identifier
//! - **domain_challenges**: proof-of-control exchanges for federated peers
//!
//! Row modules expose plain functions over `&Connection` so callers can
//! compose several of them inside one [`TrustSubstrate::with_transaction`].

pub mod challenge;
pub mod credential;
pub mod friendship;
pub mod migration;
pub mod negotiation;
pub mod session;

mod substrate;
pub use substrate::TrustSubstrate;

use botnet_types::error::BotNetError;
use chrono::{DateTime, TimeZone, Utc};

/// Map a rusqlite failure into the opaque storage error.
pub(crate) fn storage(e: rusqlite::Error) -> BotNetError {
    BotNetError::Storage(e.to_string())
}

/// Unix milliseconds, the on-disk time format.
pub fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Inverse of [`to_ms`].
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Truncate an instant to the precision that survives a round trip.
pub fn truncate_ms(t: DateTime<Utc>) -> DateTime<Utc> {
    from_ms(to_ms(t))
}

/// Decode a stored enum string, surfacing bad values as conversion errors.
pub(crate) fn decode<T>(
    idx: usize,
    raw: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value '{raw}'").into(),
        )
    })
}
