//! Friendship lifecycle between this node and its peers.
//!
//! ```text
//! none ──outbound──▶ requested ──acceptance observed──▶ active ──unfriend──▶ terminated
//! none ──inbound───▶ pending ──local / verified──────▶ active
//!                    pending ──decline / failed proof─▶ rejected
//! rejected | terminated ──re-request──▶ requested (outbound) or pending (inbound)
//! requested ──inbound, our id sorts first──▶ pending
//! ```
//!
//! A request for a peer whose friendship is already requested, pending or
//! active changes nothing and returns the existing row.
//!
//! When both sides ask at once, each holds `requested` when the other's
//! request lands. The node whose identifier sorts first takes the accepting
//! side and moves to `pending`; the other keeps `requested` and completes
//! through its own negotiation poll. Only one side ever mints the credentials.
//!
//! At most one negotiation token per friendship can collect credentials:
//! issuing a token rejects every older pending one, and a repeated inbound
//! request is answered without a token.

use crate::tokens::TokenStore;
use botnet_memory::{friendship, negotiation, to_ms, truncate_ms, TrustSubstrate};
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::friendship::{Friendship, FriendshipState, TrustTier};
use botnet_types::peer::{ClaimedIdentity, PeerClass, PeerKind};
use botnet_types::token::NegotiationToken;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, info};

/// Classify a raw peer identifier against a federation prefix.
pub fn classify_with(federation_prefix: &str, raw: &str) -> PeerClass {
    let id = raw.trim();
    if id.is_empty() || id.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
        return PeerClass::Invalid;
    }
    if !id.contains('.') {
        return PeerClass::Local;
    }
    let federated = id
        .strip_prefix(federation_prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.split('.').all(|label| !label.is_empty()));
    if federated && !federation_prefix.is_empty() {
        PeerClass::Federated
    } else {
        PeerClass::Invalid
    }
}

/// Outcome of an inbound `friendship.request`.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub friendship: Friendship,
    /// Returned to the requester to poll the decision. `None` when the
    /// request changed nothing.
    pub negotiation_token: Option<NegotiationToken>,
}

/// Owns every friendship row and its transitions.
pub struct FriendshipStateMachine {
    db: TrustSubstrate,
    tokens: Arc<TokenStore>,
    federation_prefix: String,
}

impl FriendshipStateMachine {
    pub fn new(db: TrustSubstrate, tokens: Arc<TokenStore>, federation_prefix: impl Into<String>) -> Self {
        Self {
            db,
            tokens,
            federation_prefix: federation_prefix.into(),
        }
    }

    pub fn classify(&self, raw: &str) -> PeerClass {
        classify_with(&self.federation_prefix, raw)
    }

    /// Classify or fail with `DomainInvalid`. Nothing is persisted for invalid ids.
    fn require_kind(&self, raw: &str) -> BotNetResult<PeerKind> {
        self.classify(raw).kind().ok_or_else(|| {
            BotNetError::DomainInvalid(format!(
                "'{}' is outside the '{}' namespace",
                raw.trim(),
                self.federation_prefix
            ))
        })
    }

    /// Handle a request from a peer. Local peers are activated immediately;
    /// federated peers stay pending until their domain is verified.
    pub fn receive_request(&self, claimed: &ClaimedIdentity) -> BotNetResult<InboundRequest> {
        let kind = self.require_kind(claimed.as_str())?;
        let peer = claimed.as_str();
        let now = truncate_ms(Utc::now());
        self.db.with_transaction(|tx| {
            let opened = match friendship::get_by_peer(tx, peer)? {
                Some(ours) if ours.state == FriendshipState::Requested => {
                    if self.yields_to(peer) {
                        debug!(peer, "Crossed requests, peer accepts ours");
                        return Ok(InboundRequest {
                            friendship: ours,
                            negotiation_token: None,
                        });
                    }
                    Self::apply(tx, &ours, FriendshipState::Pending, TrustTier::Unverified, now)?;
                    info!(peer, "Crossed requests, accepting peer's");
                    Self::auto_activate(tx, &ours.id, kind, now)?
                }
                Some(existing) if existing.state.is_open() => {
                    debug!(peer, state = %existing.state, "Duplicate inbound request absorbed");
                    return Ok(InboundRequest {
                        friendship: existing,
                        negotiation_token: None,
                    });
                }
                Some(closed) => {
                    Self::apply(tx, &closed, FriendshipState::Pending, TrustTier::Unverified, now)?;
                    Self::auto_activate(tx, &closed.id, kind, now)?
                }
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    friendship::insert_if_absent(tx, &Self::fresh(&id, peer, kind, FriendshipState::Pending, now))?;
                    Self::auto_activate(tx, &id, kind, now)?
                }
            };
            let superseded = negotiation::reject_pending_for(tx, &opened.id)?;
            let token = self.tokens.insert_negotiation(tx, peer, &opened.id, now)?;
            info!(peer, kind = %kind, state = %opened.state, superseded, "Inbound friendship request");
            Ok(InboundRequest {
                friendship: opened,
                negotiation_token: Some(token),
            })
        })
    }

    /// On crossed requests the node whose identifier sorts first accepts.
    fn yields_to(&self, peer: &str) -> bool {
        self.tokens.node_id() > peer
    }

    fn auto_activate(
        conn: &Connection,
        id: &str,
        kind: PeerKind,
        now: DateTime<Utc>,
    ) -> BotNetResult<Friendship> {
        if kind == PeerKind::Local {
            friendship::transition(
                conn,
                id,
                FriendshipState::Pending,
                FriendshipState::Active,
                TrustTier::Local,
                to_ms(now),
            )?;
        }
        Self::load(conn, id)
    }

    /// Record that this node asked `peer` to be friends.
    pub fn send_request(&self, peer: &str) -> BotNetResult<Friendship> {
        let kind = self.require_kind(peer)?;
        let peer = peer.trim();
        let now = truncate_ms(Utc::now());
        self.db.with_transaction(|tx| match friendship::get_by_peer(tx, peer)? {
            Some(existing) if existing.state.is_open() => Ok(existing),
            Some(closed) => {
                Self::apply(tx, &closed, FriendshipState::Requested, TrustTier::Unverified, now)?;
                negotiation::reject_pending_for(tx, &closed.id)?;
                info!(peer, "Re-requested friendship");
                Self::load(tx, &closed.id)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                friendship::insert_if_absent(tx, &Self::fresh(&id, peer, kind, FriendshipState::Requested, now))?;
                info!(peer, kind = %kind, "Outbound friendship request recorded");
                Self::load(tx, &id)
            }
        })
    }

    /// The peer accepted our request (seen through its negotiation check).
    pub fn observe_acceptance(&self, peer: &str) -> BotNetResult<Friendship> {
        let now = truncate_ms(Utc::now());
        self.db.with_transaction(|tx| {
            let f = Self::require(tx, peer, "observe acceptance")?;
            match f.state {
                FriendshipState::Active => Ok(f),
                FriendshipState::Requested => {
                    let tier = match f.kind {
                        PeerKind::Local => TrustTier::Local,
                        PeerKind::Federated => TrustTier::Unverified,
                    };
                    Self::apply(tx, &f, FriendshipState::Active, tier, now)?;
                    info!(peer, "Friendship accepted by peer");
                    Self::load(tx, &f.id)
                }
                other => Err(BotNetError::conflict(other, "observe acceptance")),
            }
        })
    }

    /// Decline a pending request.
    pub fn decline(&self, peer: &str) -> BotNetResult<Friendship> {
        let now = truncate_ms(Utc::now());
        self.db.with_transaction(|tx| {
            let f = Self::require(tx, peer, "decline")?;
            if f.state != FriendshipState::Pending {
                return Err(BotNetError::conflict(f.state, "decline"));
            }
            Self::apply(tx, &f, FriendshipState::Rejected, TrustTier::Unverified, now)?;
            info!(peer, "Friendship request declined");
            Self::load(tx, &f.id)
        })
    }

    /// End an active friendship and revoke both credential directions.
    pub fn unfriend(&self, peer: &str) -> BotNetResult<Friendship> {
        let now = truncate_ms(Utc::now());
        self.db.with_transaction(|tx| {
            let f = Self::require(tx, peer, "unfriend")?;
            if f.state != FriendshipState::Active {
                return Err(BotNetError::conflict(f.state, "unfriend"));
            }
            Self::apply(tx, &f, FriendshipState::Terminated, TrustTier::Unverified, now)?;
            let revoked = self.tokens.revoke_peer_in(tx, &f.peer_identifier, now)?;
            info!(peer, revoked, "Friendship terminated");
            Self::load(tx, &f.id)
        })
    }

    /// Activate a pending federated friendship after its domain was verified.
    pub(crate) fn activate_verified_in(
        &self,
        conn: &Connection,
        friendship_id: &str,
        now: DateTime<Utc>,
    ) -> BotNetResult<Friendship> {
        let f = Self::load(conn, friendship_id)?;
        if f.state != FriendshipState::Pending {
            return Err(BotNetError::conflict(f.state, "activate"));
        }
        Self::apply(conn, &f, FriendshipState::Active, TrustTier::DomainVerified, now)?;
        info!(peer = %f.peer_identifier, "Friendship activated after domain verification");
        Self::load(conn, friendship_id)
    }

    /// Reject a pending friendship whose domain proof failed.
    pub(crate) fn reject_in(
        &self,
        conn: &Connection,
        friendship_id: &str,
        now: DateTime<Utc>,
    ) -> BotNetResult<()> {
        let f = Self::load(conn, friendship_id)?;
        if f.state == FriendshipState::Pending {
            Self::apply(conn, &f, FriendshipState::Rejected, TrustTier::Unverified, now)?;
            info!(peer = %f.peer_identifier, "Friendship rejected after failed domain proof");
        }
        Ok(())
    }

    pub fn get(&self, peer: &str) -> BotNetResult<Option<Friendship>> {
        self.db
            .with_connection(|conn| friendship::get_by_peer(conn, peer.trim()))
    }

    pub fn get_by_id(&self, id: &str) -> BotNetResult<Option<Friendship>> {
        self.db.with_connection(|conn| friendship::get_by_id(conn, id))
    }

    pub fn list(&self, state: Option<FriendshipState>) -> BotNetResult<Vec<Friendship>> {
        self.db.with_connection(|conn| friendship::list(conn, state))
    }

    /// Count an interaction with an active friend. Returns `false` otherwise.
    pub fn record_interaction(&self, peer: &str) -> BotNetResult<bool> {
        let now_ms = to_ms(Utc::now());
        self.db
            .with_connection(|conn| friendship::record_interaction(conn, peer, now_ms))
    }

    fn fresh(id: &str, peer: &str, kind: PeerKind, state: FriendshipState, now: DateTime<Utc>) -> Friendship {
        Friendship {
            id: id.to_string(),
            peer_identifier: peer.to_string(),
            kind,
            state,
            tier: TrustTier::Unverified,
            established_at: None,
            last_interaction_at: now,
            interaction_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(
        conn: &Connection,
        f: &Friendship,
        to: FriendshipState,
        tier: TrustTier,
        now: DateTime<Utc>,
    ) -> BotNetResult<()> {
        if friendship::transition(conn, &f.id, f.state, to, tier, to_ms(now))? {
            Ok(())
        } else {
            Err(BotNetError::conflict(f.state, format!("move to {to}")))
        }
    }

    fn load(conn: &Connection, id: &str) -> BotNetResult<Friendship> {
        friendship::get_by_id(conn, id)?
            .ok_or_else(|| BotNetError::Internal(format!("friendship {id} vanished")))
    }

    fn require(conn: &Connection, peer: &str, attempted: &str) -> BotNetResult<Friendship> {
        friendship::get_by_peer(conn, peer.trim())?
            .ok_or_else(|| BotNetError::conflict("none", attempted))
    }
}
