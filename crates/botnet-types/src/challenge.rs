//! Domain challenge records.

use crate::token::string_enum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Verified,
    Failed,
    Expired,
}

string_enum!(ChallengeStatus {
    Pending => "pending",
    Verified => "verified",
    Failed => "failed",
    Expired => "expired",
});

/// A proof-of-control exchange for one federated friendship.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainChallenge {
    pub id: String,
    pub for_friendship_id: String,
    /// Never leaves this node.
    pub challenge_secret: String,
    /// Value the peer must publish under its domain.
    pub expected_proof: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: ChallengeStatus,
}

/// Where and what the challenged peer must publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofInstructions {
    pub domain: String,
    pub path: String,
    pub url: String,
    /// Exact body to serve at `url`.
    pub value: String,
}

/// Returned by `challenge.request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedChallenge {
    pub challenge_id: String,
    pub proof_instructions: ProofInstructions,
    pub expires_at: DateTime<Utc>,
}

/// Result of a verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChallengeOutcome {
    Verified,
    Failed {
        /// Further attempts allowed on this challenge.
        attempts_left: u32,
    },
}
