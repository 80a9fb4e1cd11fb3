//! Bearer token tiers and the records the token store keeps for them.
//!
//! Each tier has its own literal prefix. A raw bearer string is parsed once,
//! at the boundary, into a [`BearerToken`]; after that the tier is carried by
//! the type and one tier's token cannot be handed to another tier's
//! validator.

use crate::error::{BotNetError, BotNetResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of negotiation tokens.
pub const NEGOTIATION_PREFIX: &str = "neg_";
/// Prefix of permanent credential secrets.
pub const PERMANENT_PREFIX: &str = "perm_";
/// Prefix of session tokens.
pub const SESSION_PREFIX: &str = "sess_";

/// Random bytes behind every token (hex-encoded after the prefix).
pub const TOKEN_BYTES: usize = 32;

/// Token tier, in order of establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTier {
    Negotiation,
    Permanent,
    Session,
}

impl TokenTier {
    /// Literal prefix that marks a token of this tier.
    pub fn prefix(self) -> &'static str {
        match self {
            TokenTier::Negotiation => NEGOTIATION_PREFIX,
            TokenTier::Permanent => PERMANENT_PREFIX,
            TokenTier::Session => SESSION_PREFIX,
        }
    }
}

impl fmt::Display for TokenTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenTier::Negotiation => write!(f, "negotiation"),
            TokenTier::Permanent => write!(f, "permanent"),
            TokenTier::Session => write!(f, "session"),
        }
    }
}

/// Check `raw` is `prefix` followed by exactly `2 * TOKEN_BYTES` lowercase hex chars.
fn check_shape(raw: &str, tier: TokenTier) -> BotNetResult<()> {
    let body = raw
        .strip_prefix(tier.prefix())
        .ok_or_else(|| BotNetError::InvalidToken(format!("expected a {tier} token")))?;
    let well_formed = body.len() == TOKEN_BYTES * 2
        && body
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if well_formed {
        Ok(())
    } else {
        Err(BotNetError::InvalidToken(format!("malformed {tier} token")))
    }
}

/// Show the prefix and a few characters, never the whole secret.
fn redact(raw: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let shown: String = raw.chars().take(9).collect();
    write!(f, "{shown}…")
}

macro_rules! token_newtype {
    ($(#[$meta:meta])* $name:ident, $tier:expr) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse a raw string, checking the tier prefix and shape.
            pub fn parse(raw: &str) -> BotNetResult<Self> {
                check_shape(raw, $tier)?;
                Ok(Self(raw.to_string()))
            }

            /// Build a token from freshly generated random bytes.
            pub fn from_random_bytes(bytes: &[u8; TOKEN_BYTES]) -> Self {
                Self(format!("{}{}", $tier.prefix(), hex::encode(bytes)))
            }

            /// The full token string, prefix included.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The tier of this token.
            pub fn tier(&self) -> TokenTier {
                $tier
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                redact(&self.0, f)?;
                write!(f, ")")
            }
        }

        impl TryFrom<String> for $name {
            type Error = BotNetError;
            fn try_from(raw: String) -> BotNetResult<Self> {
                check_shape(&raw, $tier)?;
                Ok(Self(raw))
            }
        }

        impl From<$name> for String {
            fn from(token: $name) -> String {
                token.0
            }
        }
    };
}

token_newtype!(
    /// Short-lived token used only to poll a friendship request.
    NegotiationToken,
    TokenTier::Negotiation
);
token_newtype!(
    /// Long-lived secret proving an established friendship direction.
    PermanentSecret,
    TokenTier::Permanent
);
token_newtype!(
    /// Short-lived, renewable token for ordinary authenticated calls.
    SessionToken,
    TokenTier::Session
);

/// A bearer credential classified by tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerToken {
    Negotiation(NegotiationToken),
    Permanent(PermanentSecret),
    Session(SessionToken),
}

impl BearerToken {
    /// Classify a raw bearer string by its literal prefix.
    pub fn parse(raw: &str) -> BotNetResult<Self> {
        if raw.starts_with(NEGOTIATION_PREFIX) {
            NegotiationToken::parse(raw).map(BearerToken::Negotiation)
        } else if raw.starts_with(PERMANENT_PREFIX) {
            PermanentSecret::parse(raw).map(BearerToken::Permanent)
        } else if raw.starts_with(SESSION_PREFIX) {
            SessionToken::parse(raw).map(BearerToken::Session)
        } else {
            Err(BotNetError::InvalidToken("unrecognised token prefix".into()))
        }
    }

    pub fn tier(&self) -> TokenTier {
        match self {
            BearerToken::Negotiation(_) => TokenTier::Negotiation,
            BearerToken::Permanent(_) => TokenTier::Permanent,
            BearerToken::Session(_) => TokenTier::Session,
        }
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable string form, as stored in the database.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            /// Parse the stored string form.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.pad(self.as_str())
            }
        }
    };
}
pub(crate) use string_enum;

/// Lifecycle of a negotiation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

string_enum!(NegotiationStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Expired => "expired",
});

/// How a permanent credential came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeMethod {
    /// Local peer accepted without domain proof.
    Accepted,
    /// Federated peer proved control of its domain.
    ChallengeResponse,
}

string_enum!(ExchangeMethod {
    Accepted => "accepted",
    ChallengeResponse => "challenge_response",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Revoked,
}

string_enum!(CredentialStatus {
    Active => "active",
    Revoked => "revoked",
});

/// Stored negotiation token. The raw token is never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationRecord {
    pub token_hash: String,
    pub from_caller: String,
    /// Friendship id the token polls.
    pub related_request_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: NegotiationStatus,
}

/// One direction of an established friendship.
///
/// `owner_caller` presents `secret` to the node identified by `peer_caller`.
#[derive(Debug, Clone, PartialEq)]
pub struct PermanentCredential {
    pub id: String,
    pub owner_caller: String,
    pub peer_caller: String,
    pub secret: PermanentSecret,
    pub exchange_method: ExchangeMethod,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub status: CredentialStatus,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Stored session token. The raw token is never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub token_hash: String,
    pub owning_caller: String,
    /// Permanent credential this session was minted from.
    pub credential_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub permissions: Vec<String>,
}

/// Returned once, when a session is minted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionGrant {
    pub token: SessionToken,
    pub expires_at: DateTime<Utc>,
    pub permissions: Vec<String>,
}

/// Identity resolved from a valid session token.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub caller_id: String,
    pub expires_at: DateTime<Utc>,
    pub permissions: Vec<String>,
}

/// Outcome of polling a negotiation token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationCheck {
    pub status: NegotiationStatus,
    /// Secret the polling peer presents to this node at `login`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_secret: Option<PermanentSecret>,
    /// Secret this node will present when it calls the polling peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reciprocal_secret: Option<PermanentSecret>,
}
