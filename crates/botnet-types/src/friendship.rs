//! Friendship records and their lifecycle states.

use crate::peer::PeerKind;
use crate::token::string_enum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a friendship. "No row" is the implicit `none` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipState {
    /// This node asked the peer.
    Requested,
    /// The peer asked this node.
    Pending,
    Active,
    Rejected,
    Terminated,
}

string_enum!(FriendshipState {
    Requested => "requested",
    Pending => "pending",
    Active => "active",
    Rejected => "rejected",
    Terminated => "terminated",
});

impl FriendshipState {
    /// States in which a new request is absorbed instead of applied.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            FriendshipState::Requested | FriendshipState::Pending | FriendshipState::Active
        )
    }

    /// States from which a re-request starts over.
    pub fn is_closed(self) -> bool {
        matches!(self, FriendshipState::Rejected | FriendshipState::Terminated)
    }
}

/// Trust reached by a friendship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// No proof of the peer's domain is held by this node.
    Unverified,
    /// Activated as a local peer, no domain proof.
    Local,
    /// Activated after a verified domain challenge.
    DomainVerified,
}

string_enum!(TrustTier {
    Unverified => "unverified",
    Local => "local",
    DomainVerified => "domain_verified",
});

/// A relationship between this node and one peer identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friendship {
    pub id: String,
    pub peer_identifier: String,
    pub kind: PeerKind,
    pub state: FriendshipState,
    pub tier: TrustTier,
    pub established_at: Option<DateTime<Utc>>,
    pub last_interaction_at: DateTime<Utc>,
    /// Interactions since the friendship was (re-)established.
    pub interaction_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_closed_partition() {
        for state in [
            FriendshipState::Requested,
            FriendshipState::Pending,
            FriendshipState::Active,
            FriendshipState::Rejected,
            FriendshipState::Terminated,
        ] {
            assert_ne!(state.is_open(), state.is_closed(), "{state}");
        }
    }

    #[test]
    fn test_state_roundtrip_strings() {
        assert_eq!(FriendshipState::parse("terminated"), Some(FriendshipState::Terminated));
        assert_eq!(TrustTier::DomainVerified.as_str(), "domain_verified");
        assert!(FriendshipState::parse("none").is_none());
    }
}
