//! Tier-based authentication in front of every protocol method.
//!
//! The gate maps the method name to its [`Tier`], parses the bearer once into
//! a tagged [`BearerToken`] and resolves it through the [`TokenStore`]. Only a
//! successful resolution produces an [`AuthenticatedPeer`]; a
//! [`ClaimedIdentity`] can never be turned into one.

use crate::tokens::TokenStore;
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::method::{Method, Tier};
use botnet_types::peer::ClaimedIdentity;
use botnet_types::token::{
    BearerToken, NegotiationToken, PermanentSecret, SessionToken, TokenTier,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// How an authenticated caller proved its identity.
#[derive(Debug, Clone)]
pub enum PeerCredential {
    /// Polling an open friendship request.
    Negotiation {
        token: NegotiationToken,
        friendship_id: String,
    },
    /// Presented its permanent secret (login).
    Permanent { credential_id: String },
    /// Holds a live session.
    Session {
        token: SessionToken,
        expires_at: DateTime<Utc>,
        permissions: Vec<String>,
    },
}

/// A caller whose identity was resolved from a credential this node issued.
#[derive(Debug, Clone)]
pub struct AuthenticatedPeer {
    caller_id: String,
    credential: PeerCredential,
}

impl AuthenticatedPeer {
    pub(crate) fn new(caller_id: impl Into<String>, credential: PeerCredential) -> Self {
        Self {
            caller_id: caller_id.into(),
            credential,
        }
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn credential(&self) -> &PeerCredential {
        &self.credential
    }

    pub fn tier(&self) -> TokenTier {
        match self.credential {
            PeerCredential::Negotiation { .. } => TokenTier::Negotiation,
            PeerCredential::Permanent { .. } => TokenTier::Permanent,
            PeerCredential::Session { .. } => TokenTier::Session,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        match &self.credential {
            PeerCredential::Session { permissions, .. } => {
                permissions.iter().any(|p| p == permission)
            }
            _ => false,
        }
    }
}

/// Who is calling, as far as the gate could establish.
#[derive(Debug, Clone)]
pub enum CallContext {
    /// Public method. The claimed identity, if any, is unverified.
    Public { claimed: Option<ClaimedIdentity> },
    Authenticated(AuthenticatedPeer),
}

impl CallContext {
    pub fn peer(&self) -> Option<&AuthenticatedPeer> {
        match self {
            CallContext::Authenticated(peer) => Some(peer),
            CallContext::Public { .. } => None,
        }
    }
}

/// Everything the gate looks at for one call.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub method: &'a str,
    /// Value of `Authorization: Bearer <token>`, if present.
    pub bearer: Option<&'a str>,
    /// Advisory identity from the transport, if any.
    pub claimed: Option<&'a ClaimedIdentity>,
    pub params: &'a serde_json::Value,
}

pub struct AuthGate {
    tokens: Arc<TokenStore>,
}

impl AuthGate {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self { tokens }
    }

    /// Authorize one call.
    ///
    /// Unknown method names are gated at the session tier first and only then
    /// reported as `MethodNotFound`, so probing the method table requires a
    /// session.
    pub fn authorize(&self, req: GateRequest<'_>) -> BotNetResult<(Method, CallContext)> {
        self.authorize_at(req, Utc::now())
    }

    pub fn authorize_at(
        &self,
        req: GateRequest<'_>,
        now: DateTime<Utc>,
    ) -> BotNetResult<(Method, CallContext)> {
        let method = Method::from_name(req.method);
        let tier = Tier::for_name(req.method);
        let mut ctx = match tier {
            Tier::None => CallContext::Public {
                claimed: req.claimed.cloned(),
            },
            Tier::Negotiation => {
                let token = match Self::bearer(req.bearer)? {
                    BearerToken::Negotiation(token) => token,
                    other => return Err(Self::wrong_tier(req.method, tier, other.tier())),
                };
                let record = self.tokens.resolve_negotiation_at(&token, now)?;
                CallContext::Authenticated(AuthenticatedPeer::new(
                    record.from_caller,
                    PeerCredential::Negotiation {
                        token,
                        friendship_id: record.related_request_id,
                    },
                ))
            }
            Tier::Session => {
                let token = match Self::bearer(req.bearer)? {
                    BearerToken::Session(token) => token,
                    other => return Err(Self::wrong_tier(req.method, tier, other.tier())),
                };
                let info = self.tokens.validate_session_at(&token, now)?;
                CallContext::Authenticated(AuthenticatedPeer::new(
                    info.caller_id,
                    PeerCredential::Session {
                        token,
                        expires_at: info.expires_at,
                        permissions: info.permissions,
                    },
                ))
            }
            Tier::Special => {
                let (caller_id, secret) = Self::login_params(&req)?;
                let cred = self.tokens.validate_permanent(&caller_id, &secret)?;
                CallContext::Authenticated(AuthenticatedPeer::new(
                    cred.owner_caller,
                    PeerCredential::Permanent {
                        credential_id: cred.id,
                    },
                ))
            }
        };

        let method = method
            .ok_or_else(|| BotNetError::MethodNotFound(req.method.to_string()))?;
        if let (Some(required), Some(peer)) = (method.required_permission(), ctx.peer()) {
            if !peer.has_permission(required) {
                debug!(caller = peer.caller_id(), method = %method, required, "Permission denied");
                return Err(BotNetError::PermissionDenied(format!(
                    "{method} requires '{required}'"
                )));
            }
        }
        // Only calls that will be dispatched keep a session alive.
        if let CallContext::Authenticated(AuthenticatedPeer {
            credential: PeerCredential::Session { token, expires_at, .. },
            ..
        }) = &mut ctx
        {
            *expires_at = self.tokens.renew_session_at(token, now)?.expires_at;
        }
        Ok((method, ctx))
    }

    fn bearer(raw: Option<&str>) -> BotNetResult<BearerToken> {
        let raw = raw
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BotNetError::AuthRequired("bearer token required".into()))?;
        BearerToken::parse(raw)
    }

    fn wrong_tier(method: &str, wanted: Tier, got: TokenTier) -> BotNetError {
        debug!(method, %wanted, %got, "Bearer of the wrong tier");
        BotNetError::InvalidToken(format!("{method} needs a {wanted} token, got {got}"))
    }

    /// `login` carries the permanent secret in its body.
    fn login_params(req: &GateRequest<'_>) -> BotNetResult<(String, PermanentSecret)> {
        let caller_id = req
            .params
            .get("caller_id")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .or_else(|| req.claimed.map(|c| c.as_str().to_string()))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BotNetError::AuthRequired("login needs caller_id".into()))?;
        let secret = req
            .params
            .get("secret")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BotNetError::AuthRequired("login needs a permanent secret".into()))?;
        Ok((caller_id, PermanentSecret::parse(secret)?))
    }
}
