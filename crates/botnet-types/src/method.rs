//! The protocol method table.
//!
//! Every method is a variant of [`Method`], and its tier and rate-limit class
//! are exhaustive matches, so adding a method without deciding how it is
//! protected does not compile. Names that are not in the table never fall
//! back to public access; see [`Tier::for_name`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trust tier a method requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Public. No caller identity is resolved.
    None,
    /// Bearer negotiation token.
    Negotiation,
    /// Bearer session token.
    Session,
    /// Permanent secret in the request body (login only).
    Special,
}

impl Tier {
    /// Tier for a raw method name. Unknown names get the most restrictive
    /// bearer tier, never `None`.
    pub fn for_name(name: &str) -> Tier {
        Method::from_name(name)
            .map(|m| m.tier())
            .unwrap_or(Tier::Session)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::None => write!(f, "none"),
            Tier::Negotiation => write!(f, "negotiation"),
            Tier::Session => write!(f, "session"),
            Tier::Special => write!(f, "special"),
        }
    }
}

/// Groups of methods sharing a rate-limit budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodClass {
    Public,
    FriendshipRequest,
    Negotiation,
    Login,
    MessageSend,
    SessionRead,
}

impl MethodClass {
    pub const ALL: [MethodClass; 6] = [
        MethodClass::Public,
        MethodClass::FriendshipRequest,
        MethodClass::Negotiation,
        MethodClass::Login,
        MethodClass::MessageSend,
        MethodClass::SessionRead,
    ];

    /// Class for a raw method name. Unknown names are charged to the
    /// strictest budget.
    pub fn for_name(name: &str) -> MethodClass {
        Method::from_name(name)
            .map(|m| m.class())
            .unwrap_or(MethodClass::FriendshipRequest)
    }
}

impl fmt::Display for MethodClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MethodClass::Public => "public",
            MethodClass::FriendshipRequest => "friendship_request",
            MethodClass::Negotiation => "negotiation",
            MethodClass::Login => "login",
            MethodClass::MessageSend => "message_send",
            MethodClass::SessionRead => "session_read",
        };
        f.write_str(s)
    }
}

/// Every method the node answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    PeerHealth,
    PeerProfile,
    FriendshipRequest,
    FriendshipStatus,
    ChallengeRequest,
    ChallengeRespond,
    Login,
    Logout,
    MessageSend,
    MessageCheck,
    GossipExchange,
    FriendshipList,
    FriendshipRemove,
}

impl Method {
    pub const ALL: [Method; 13] = [
        Method::PeerHealth,
        Method::PeerProfile,
        Method::FriendshipRequest,
        Method::FriendshipStatus,
        Method::ChallengeRequest,
        Method::ChallengeRespond,
        Method::Login,
        Method::Logout,
        Method::MessageSend,
        Method::MessageCheck,
        Method::GossipExchange,
        Method::FriendshipList,
        Method::FriendshipRemove,
    ];

    /// Wire name of the method.
    pub fn name(self) -> &'static str {
        match self {
            Method::PeerHealth => "peer.health",
            Method::PeerProfile => "peer.profile",
            Method::FriendshipRequest => "friendship.request",
            Method::FriendshipStatus => "friendship.status",
            Method::ChallengeRequest => "challenge.request",
            Method::ChallengeRespond => "challenge.respond",
            Method::Login => "login",
            Method::Logout => "logout",
            Method::MessageSend => "message.send",
            Method::MessageCheck => "message.check",
            Method::GossipExchange => "gossip.exchange",
            Method::FriendshipList => "friendship.list",
            Method::FriendshipRemove => "friendship.remove",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Tier the caller must reach before the handler runs.
    pub fn tier(self) -> Tier {
        match self {
            Method::PeerHealth | Method::PeerProfile | Method::FriendshipRequest => Tier::None,
            Method::FriendshipStatus | Method::ChallengeRequest | Method::ChallengeRespond => {
                Tier::Negotiation
            }
            Method::Logout
            | Method::MessageSend
            | Method::MessageCheck
            | Method::GossipExchange
            | Method::FriendshipList
            | Method::FriendshipRemove => Tier::Session,
            Method::Login => Tier::Special,
        }
    }

    /// Rate-limit budget the method draws from.
    pub fn class(self) -> MethodClass {
        match self {
            Method::PeerHealth | Method::PeerProfile => MethodClass::Public,
            Method::FriendshipRequest => MethodClass::FriendshipRequest,
            Method::FriendshipStatus | Method::ChallengeRequest | Method::ChallengeRespond => {
                MethodClass::Negotiation
            }
            Method::Login => MethodClass::Login,
            Method::MessageSend | Method::GossipExchange => MethodClass::MessageSend,
            Method::MessageCheck
            | Method::FriendshipList
            | Method::FriendshipRemove
            | Method::Logout => MethodClass::SessionRead,
        }
    }

    /// Session permission the method needs, if any.
    pub fn required_permission(self) -> Option<&'static str> {
        match self {
            Method::MessageSend | Method::MessageCheck => Some("message"),
            Method::GossipExchange => Some("gossip"),
            Method::FriendshipList => Some("friendship.read"),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Permissions granted to a freshly minted session.
pub const DEFAULT_SESSION_PERMISSIONS: [&str; 3] = ["message", "gossip", "friendship.read"];
