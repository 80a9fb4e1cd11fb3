//! Peer identifiers: classification and the claimed/resolved split.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a peer lives relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    /// Bare, dot-free name. Trusted without domain proof.
    Local,
    /// Dotted name inside the federation namespace. Needs domain proof.
    Federated,
}

crate::token::string_enum!(PeerKind {
    Local => "local",
    Federated => "federated",
});

/// Result of classifying a raw peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerClass {
    Local,
    Federated,
    /// Dotted, but outside the federation namespace.
    Invalid,
}

impl PeerClass {
    /// The persistable kind, or `None` for invalid identifiers.
    pub fn kind(self) -> Option<PeerKind> {
        match self {
            PeerClass::Local => Some(PeerKind::Local),
            PeerClass::Federated => Some(PeerKind::Federated),
            PeerClass::Invalid => None,
        }
    }
}

/// An identity a caller says it has. Untrusted.
///
/// Only used before a token exists (classification, issuing a negotiation
/// token). It deliberately has no conversion into an authenticated identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimedIdentity(String);

impl ClaimedIdentity {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ClaimedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Claimed({})", self.0)
    }
}

impl fmt::Display for ClaimedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
