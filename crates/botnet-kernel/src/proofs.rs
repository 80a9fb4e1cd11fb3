//! Proofs this node publishes while answering a remote peer's challenge.
//!
//! Served from the well-known path by the API. Entries are ephemeral and
//! drop out at their challenge's expiry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct PublishedProof {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Challenge id → proof body.
#[derive(Debug, Default)]
pub struct PublishedProofs {
    entries: DashMap<String, PublishedProof>,
}

impl PublishedProofs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, challenge_id: &str, value: &str, expires_at: DateTime<Utc>) {
        debug!(challenge = challenge_id, "Publishing domain proof");
        self.entries.insert(
            challenge_id.to_string(),
            PublishedProof {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    /// The proof for `challenge_id`, unless it has expired.
    pub fn get(&self, challenge_id: &str) -> Option<String> {
        self.get_at(challenge_id, Utc::now())
    }

    pub fn get_at(&self, challenge_id: &str, now: DateTime<Utc>) -> Option<String> {
        self.entries
            .get(challenge_id)
            .filter(|p| now < p.expires_at)
            .map(|p| p.value.clone())
    }

    pub fn withdraw(&self, challenge_id: &str) -> bool {
        self.entries.remove(challenge_id).is_some()
    }

    /// Drop expired proofs. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, p| now < p.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
