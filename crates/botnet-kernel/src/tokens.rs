//! Three-tier token lifecycle: negotiation token, permanent credential, session.
//!
//! Negotiation and session tokens are persisted by their SHA-256 only; the raw
//! value is handed out once, at issuance. Permanent secrets are kept in clear
//! because issuing one is idempotent and must return the same secret.
//!
//! Every method takes the current instant through an `_at` variant so expiry
//! boundaries can be exercised deterministically.

use botnet_memory::{credential, friendship, negotiation, session, to_ms, truncate_ms};
use botnet_memory::TrustSubstrate;
use botnet_types::config::TokenConfig;
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::friendship::{FriendshipState, TrustTier};
use botnet_types::method::DEFAULT_SESSION_PERMISSIONS;
use botnet_types::peer::ClaimedIdentity;
use botnet_types::token::{
    CredentialStatus, ExchangeMethod, NegotiationCheck, NegotiationRecord, NegotiationStatus,
    NegotiationToken, PermanentCredential, PermanentSecret, SessionGrant, SessionInfo,
    SessionRecord, SessionToken, TOKEN_BYTES,
};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

/// Rows removed by one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub negotiation_tokens: usize,
    pub sessions: usize,
}

/// Fresh bytes from the OS CSPRNG.
pub(crate) fn random_bytes() -> [u8; TOKEN_BYTES] {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Storage key of a bearer token.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Constant-time string equality.
pub(crate) fn secrets_match(stored: &str, provided: &str) -> bool {
    let stored = stored.as_bytes();
    let provided = provided.as_bytes();
    if stored.len() != provided.len() {
        return false;
    }
    stored.ct_eq(provided).into()
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(u32::MAX as u64) as i64)
}

/// Issues, validates, renews and revokes tokens of all three tiers.
pub struct TokenStore {
    db: TrustSubstrate,
    /// This node's identifier: the peer side of credentials presented to us.
    node_id: String,
    config: TokenConfig,
}

impl TokenStore {
    pub fn new(db: TrustSubstrate, node_id: impl Into<String>, config: TokenConfig) -> Self {
        Self {
            db,
            node_id: node_id.into(),
            config,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    // ---- negotiation tier ----

    /// Issue a negotiation token for an inbound friendship request.
    pub fn issue_negotiation(
        &self,
        caller: &ClaimedIdentity,
        request_id: &str,
    ) -> BotNetResult<NegotiationToken> {
        self.db.with_connection(|conn| {
            self.insert_negotiation(conn, caller.as_str(), request_id, Utc::now())
        })
    }

    pub(crate) fn insert_negotiation(
        &self,
        conn: &Connection,
        caller: &str,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> BotNetResult<NegotiationToken> {
        let token = NegotiationToken::from_random_bytes(&random_bytes());
        let now = truncate_ms(now);
        negotiation::insert(
            conn,
            &NegotiationRecord {
                token_hash: hash_token(token.as_str()),
                from_caller: caller.to_string(),
                related_request_id: request_id.to_string(),
                issued_at: now,
                expires_at: now + seconds(self.config.negotiation_ttl_secs),
                status: NegotiationStatus::Pending,
            },
        )?;
        debug!(caller, request_id, "Issued negotiation token");
        Ok(token)
    }

    /// Resolve a negotiation token presented as a bearer.
    ///
    /// Consumed tokens are invalid; rejected ones still resolve so the caller
    /// can read the rejection.
    pub fn resolve_negotiation_at(
        &self,
        token: &NegotiationToken,
        now: DateTime<Utc>,
    ) -> BotNetResult<NegotiationRecord> {
        let record = self
            .db
            .with_connection(|conn| negotiation::get(conn, &hash_token(token.as_str())))?
            .ok_or_else(|| BotNetError::InvalidToken("unknown negotiation token".into()))?;
        if now >= record.expires_at || record.status == NegotiationStatus::Expired {
            return Err(BotNetError::TokenExpired("negotiation token expired".into()));
        }
        if record.status == NegotiationStatus::Accepted {
            return Err(BotNetError::InvalidToken(
                "negotiation token already consumed".into(),
            ));
        }
        Ok(record)
    }

    /// Poll the decision behind a negotiation token.
    ///
    /// When the friendship is active, both credential directions are minted
    /// (or fetched, if they already exist) and the token is consumed, all in
    /// one transaction. A second poll of the same token fails.
    pub fn check_negotiation(&self, token: &NegotiationToken) -> BotNetResult<NegotiationCheck> {
        self.check_negotiation_at(token, Utc::now())
    }

    pub fn check_negotiation_at(
        &self,
        token: &NegotiationToken,
        now: DateTime<Utc>,
    ) -> BotNetResult<NegotiationCheck> {
        let hash = hash_token(token.as_str());
        self.db.with_transaction(|tx| {
            let record = negotiation::get(tx, &hash)?
                .ok_or_else(|| BotNetError::InvalidToken("unknown negotiation token".into()))?;
            if now >= record.expires_at {
                return Err(BotNetError::TokenExpired("negotiation token expired".into()));
            }
            match record.status {
                NegotiationStatus::Accepted => {
                    return Err(BotNetError::InvalidToken(
                        "negotiation token already consumed".into(),
                    ))
                }
                NegotiationStatus::Expired => {
                    return Err(BotNetError::TokenExpired("negotiation token expired".into()))
                }
                NegotiationStatus::Rejected => return Ok(Self::bare(NegotiationStatus::Rejected)),
                NegotiationStatus::Pending => {}
            }

            let f = friendship::get_by_id(tx, &record.related_request_id)?
                .ok_or_else(|| BotNetError::InvalidToken("request no longer exists".into()))?;
            match f.state {
                FriendshipState::Requested | FriendshipState::Pending => {
                    Ok(Self::bare(NegotiationStatus::Pending))
                }
                FriendshipState::Rejected | FriendshipState::Terminated => {
                    negotiation::transition(
                        tx,
                        &hash,
                        NegotiationStatus::Pending,
                        NegotiationStatus::Rejected,
                    )?;
                    Ok(Self::bare(NegotiationStatus::Rejected))
                }
                FriendshipState::Active => {
                    let method = match f.tier {
                        TrustTier::DomainVerified => ExchangeMethod::ChallengeResponse,
                        TrustTier::Local | TrustTier::Unverified => ExchangeMethod::Accepted,
                    };
                    let peer = f.peer_identifier.as_str();
                    let credential_secret =
                        self.ensure_credential(tx, peer, &self.node_id, method, now)?;
                    let reciprocal_secret =
                        self.ensure_credential(tx, &self.node_id, peer, method, now)?;
                    if !negotiation::transition(
                        tx,
                        &hash,
                        NegotiationStatus::Pending,
                        NegotiationStatus::Accepted,
                    )? {
                        return Err(BotNetError::InvalidToken(
                            "negotiation token already consumed".into(),
                        ));
                    }
                    info!(peer, method = %method, "Negotiation accepted, credentials delivered");
                    Ok(NegotiationCheck {
                        status: NegotiationStatus::Accepted,
                        credential_secret: Some(credential_secret),
                        reciprocal_secret: Some(reciprocal_secret),
                    })
                }
            }
        })
    }

    fn bare(status: NegotiationStatus) -> NegotiationCheck {
        NegotiationCheck {
            status,
            credential_secret: None,
            reciprocal_secret: None,
        }
    }

    // ---- permanent tier ----

    /// Return the active secret for `(owner, peer)`, minting one if absent.
    pub(crate) fn ensure_credential(
        &self,
        conn: &Connection,
        owner: &str,
        peer: &str,
        method: ExchangeMethod,
        now: DateTime<Utc>,
    ) -> BotNetResult<PermanentSecret> {
        if let Some(existing) = credential::find_active(conn, owner, peer)? {
            return Ok(existing.secret);
        }
        let secret = PermanentSecret::from_random_bytes(&random_bytes());
        credential::insert(
            conn,
            &PermanentCredential {
                id: uuid::Uuid::new_v4().to_string(),
                owner_caller: owner.to_string(),
                peer_caller: peer.to_string(),
                secret: secret.clone(),
                exchange_method: method,
                created_at: truncate_ms(now),
                last_used_at: None,
                status: CredentialStatus::Active,
                revoked_at: None,
            },
        )?;
        debug!(owner, peer, method = %method, "Minted permanent credential");
        Ok(secret)
    }

    /// Issue the secret `owner` presents to `peer`. Idempotent while active.
    pub fn issue_permanent(
        &self,
        owner: &str,
        peer: &str,
        method: ExchangeMethod,
    ) -> BotNetResult<PermanentSecret> {
        self.db
            .with_transaction(|tx| self.ensure_credential(tx, owner, peer, method, Utc::now()))
    }

    /// Record a credential minted by a remote node.
    ///
    /// Importing the same secret twice is a no-op; a different secret for a
    /// pair that already has an active one is a conflict.
    pub fn import_permanent(
        &self,
        owner: &str,
        peer: &str,
        secret: &PermanentSecret,
        method: ExchangeMethod,
    ) -> BotNetResult<()> {
        let now = truncate_ms(Utc::now());
        self.db.with_transaction(|tx| {
            if let Some(existing) = credential::find_active(tx, owner, peer)? {
                if secrets_match(existing.secret.as_str(), secret.as_str()) {
                    return Ok(());
                }
                return Err(BotNetError::conflict(
                    "active",
                    "import a different credential for the same pair",
                ));
            }
            credential::insert(
                tx,
                &PermanentCredential {
                    id: uuid::Uuid::new_v4().to_string(),
                    owner_caller: owner.to_string(),
                    peer_caller: peer.to_string(),
                    secret: secret.clone(),
                    exchange_method: method,
                    created_at: now,
                    last_used_at: None,
                    status: CredentialStatus::Active,
                    revoked_at: None,
                },
            )
        })
    }

    /// The secret this node presents when calling `peer`, if it holds one.
    pub fn outbound_secret(&self, peer: &str) -> BotNetResult<Option<PermanentSecret>> {
        self.db.with_connection(|conn| {
            Ok(credential::find_active(conn, &self.node_id, peer)?.map(|c| c.secret))
        })
    }

    /// Check the secret `caller_id` presents to this node.
    pub fn validate_permanent(
        &self,
        caller_id: &str,
        secret: &PermanentSecret,
    ) -> BotNetResult<PermanentCredential> {
        let now = Utc::now();
        self.db.with_connection(|conn| {
            let cred = credential::find_active(conn, caller_id, &self.node_id)?
                .filter(|c| secrets_match(c.secret.as_str(), secret.as_str()))
                .ok_or_else(|| BotNetError::InvalidToken("authentication failed".into()))?;
            credential::touch_last_used(conn, &cred.id, to_ms(now))?;
            Ok(cred)
        })
    }

    /// Revoke one credential by id, cascading to its sessions if configured.
    pub fn revoke_credential(&self, credential_id: &str) -> BotNetResult<bool> {
        let now_ms = to_ms(Utc::now());
        self.db.with_transaction(|tx| {
            let revoked = credential::revoke(tx, credential_id, now_ms)?;
            if revoked && self.config.cascade_session_revocation {
                session::delete_for_credentials(tx, &[credential_id.to_string()])?;
            }
            Ok(revoked)
        })
    }

    /// Revoke both credential directions between this node and `peer`.
    pub(crate) fn revoke_peer_in(
        &self,
        conn: &Connection,
        peer: &str,
        now: DateTime<Utc>,
    ) -> BotNetResult<usize> {
        let ids = credential::revoke_between(conn, &self.node_id, peer, to_ms(now))?;
        if self.config.cascade_session_revocation && !ids.is_empty() {
            let sessions = session::delete_for_credentials(conn, &ids)?;
            debug!(peer, sessions, "Cascaded credential revocation to sessions");
        }
        Ok(ids.len())
    }

    // ---- session tier ----

    /// Mint a session from a credential validated by [`Self::validate_permanent`].
    pub fn issue_session(&self, caller_id: &str, credential_id: &str) -> BotNetResult<SessionGrant> {
        self.issue_session_at(caller_id, credential_id, Utc::now())
    }

    pub fn issue_session_at(
        &self,
        caller_id: &str,
        credential_id: &str,
        now: DateTime<Utc>,
    ) -> BotNetResult<SessionGrant> {
        let now = truncate_ms(now);
        let token = SessionToken::from_random_bytes(&random_bytes());
        let permissions: Vec<String> = DEFAULT_SESSION_PERMISSIONS
            .iter()
            .map(|p| p.to_string())
            .collect();
        let expires_at = now + seconds(self.config.session_ttl_secs).min(self.max_lifetime());
        self.db.with_transaction(|tx| {
            let cred = credential::get(tx, credential_id)?
                .filter(|c| c.status == CredentialStatus::Active && c.owner_caller == caller_id)
                .ok_or_else(|| BotNetError::InvalidToken("credential revoked".into()))?;
            session::insert(
                tx,
                &SessionRecord {
                    token_hash: hash_token(token.as_str()),
                    owning_caller: cred.owner_caller,
                    credential_id: cred.id,
                    issued_at: now,
                    expires_at,
                    last_activity_at: now,
                    permissions: permissions.clone(),
                },
            )
        })?;
        info!(caller = caller_id, expires_at = %expires_at, "Session issued");
        Ok(SessionGrant {
            token,
            expires_at,
            permissions,
        })
    }

    fn max_lifetime(&self) -> Duration {
        seconds(self.config.session_max_lifetime_secs)
    }

    fn live_session(
        conn: &Connection,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> BotNetResult<SessionRecord> {
        let record = session::get(conn, &hash_token(token.as_str()))?
            .ok_or_else(|| BotNetError::InvalidToken("unknown session token".into()))?;
        // Valid strictly before expiry; the expiry instant itself is expired.
        if now >= record.expires_at {
            return Err(BotNetError::TokenExpired("session expired".into()));
        }
        Ok(record)
    }

    pub fn validate_session(&self, token: &SessionToken) -> BotNetResult<SessionInfo> {
        self.validate_session_at(token, Utc::now())
    }

    pub fn validate_session_at(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> BotNetResult<SessionInfo> {
        let record = self
            .db
            .with_connection(|conn| Self::live_session(conn, token, now))?;
        Ok(SessionInfo {
            caller_id: record.owning_caller,
            expires_at: record.expires_at,
            permissions: record.permissions,
        })
    }

    /// Extend a live session to `now + ttl`, never past `issued_at + max lifetime`.
    pub fn renew_session(&self, token: &SessionToken) -> BotNetResult<SessionInfo> {
        self.renew_session_at(token, Utc::now())
    }

    pub fn renew_session_at(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> BotNetResult<SessionInfo> {
        let now = truncate_ms(now);
        self.db.with_transaction(|tx| {
            let record = Self::live_session(tx, token, now)?;
            let cap = record.issued_at + self.max_lifetime();
            let renewed = (now + seconds(self.config.session_ttl_secs))
                .min(cap)
                .max(record.expires_at);
            session::renew(tx, &record.token_hash, to_ms(renewed), to_ms(now))?;
            Ok(SessionInfo {
                caller_id: record.owning_caller,
                expires_at: renewed,
                permissions: record.permissions,
            })
        })
    }

    /// Delete a session. Returns `false` if it did not exist.
    pub fn revoke_session(&self, token: &SessionToken) -> BotNetResult<bool> {
        let hash = hash_token(token.as_str());
        self.db.with_connection(|conn| session::delete(conn, &hash))
    }

    // ---- maintenance ----

    /// Delete expired negotiation tokens and sessions in one transaction.
    pub fn sweep_expired(&self) -> BotNetResult<SweepReport> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> BotNetResult<SweepReport> {
        let now_ms = to_ms(now);
        self.db.with_transaction(|tx| {
            Ok(SweepReport {
                negotiation_tokens: negotiation::delete_expired(tx, now_ms)?,
                sessions: session::delete_expired(tx, now_ms)?,
            })
        })
    }

    pub fn active_session_count(&self) -> BotNetResult<usize> {
        let now_ms = to_ms(Utc::now());
        self.db.with_connection(|conn| session::count_live(conn, now_ms))
    }

    pub fn active_credential_count(&self) -> BotNetResult<usize> {
        self.db.with_connection(credential::count_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botnet_types::friendship::Friendship;
    use botnet_types::peer::PeerKind;
    use std::collections::HashSet;
    use std::sync::Arc;

    const NODE: &str = "botnet.home.example";

    fn store_with(cascade: bool) -> TokenStore {
        let db = TrustSubstrate::open_in_memory().unwrap();
        let config = TokenConfig {
            cascade_session_revocation: cascade,
            ..Default::default()
        };
        TokenStore::new(db, NODE, config)
    }

    fn store() -> TokenStore {
        store_with(true)
    }

    fn add_friendship(store: &TokenStore, id: &str, peer: &str, state: FriendshipState) {
        let now = truncate_ms(Utc::now());
        store
            .db
            .with_connection(|conn| {
                friendship::insert_if_absent(
                    conn,
                    &Friendship {
                        id: id.to_string(),
                        peer_identifier: peer.to_string(),
                        kind: PeerKind::Local,
                        state,
                        tier: if state == FriendshipState::Active {
                            TrustTier::Local
                        } else {
                            TrustTier::Unverified
                        },
                        established_at: None,
                        last_interaction_at: now,
                        interaction_count: 0,
                        created_at: now,
                        updated_at: now,
                    },
                )
            })
            .unwrap();
    }

    fn login(store: &TokenStore, peer: &str) -> SessionGrant {
        let secret = store
            .issue_permanent(peer, NODE, ExchangeMethod::Accepted)
            .unwrap();
        let cred = store.validate_permanent(peer, &secret).unwrap();
        store.issue_session(peer, &cred.id).unwrap()
    }

    #[test]
    fn test_tokens_are_unpredictable() {
        let store = store();
        let mut seen = HashSet::new();
        for i in 0..200 {
            let token = store
                .issue_negotiation(&ClaimedIdentity::new("TestBot"), &format!("r{i}"))
                .unwrap();
            assert!(token.as_str().starts_with("neg_"));
            assert!(seen.insert(token.as_str().to_string()));
        }
    }

    #[test]
    fn test_raw_tokens_are_not_stored() {
        let store = store();
        let token = store
            .issue_negotiation(&ClaimedIdentity::new("TestBot"), "f1")
            .unwrap();
        store
            .db
            .with_connection(|conn| {
                assert!(negotiation::get(conn, token.as_str())?.is_none());
                assert!(negotiation::get(conn, &hash_token(token.as_str()))?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_check_negotiation_follows_friendship() {
        let store = store();
        add_friendship(&store, "f1", "TestBot", FriendshipState::Pending);
        let token = store
            .issue_negotiation(&ClaimedIdentity::new("TestBot"), "f1")
            .unwrap();

        let check = store.check_negotiation(&token).unwrap();
        assert_eq!(check.status, NegotiationStatus::Pending);
        assert!(check.credential_secret.is_none());

        store
            .db
            .with_connection(|conn| {
                friendship::transition(
                    conn,
                    "f1",
                    FriendshipState::Pending,
                    FriendshipState::Active,
                    TrustTier::Local,
                    1,
                )
            })
            .unwrap();

        let check = store.check_negotiation(&token).unwrap();
        assert_eq!(check.status, NegotiationStatus::Accepted);
        let presented = check.credential_secret.unwrap();
        let reciprocal = check.reciprocal_secret.unwrap();
        assert_ne!(presented, reciprocal);
        assert_eq!(
            store.validate_permanent("TestBot", &presented).unwrap().owner_caller,
            "TestBot"
        );
        assert_eq!(store.outbound_secret("TestBot").unwrap(), Some(reciprocal));

        // Consumed exactly once.
        let err = store.check_negotiation(&token).unwrap_err();
        assert!(matches!(err, BotNetError::InvalidToken(_)));
    }

    #[test]
    fn test_check_negotiation_rejected() {
        let store = store();
        add_friendship(&store, "f1", "TestBot", FriendshipState::Rejected);
        let token = store
            .issue_negotiation(&ClaimedIdentity::new("TestBot"), "f1")
            .unwrap();
        assert_eq!(
            store.check_negotiation(&token).unwrap().status,
            NegotiationStatus::Rejected
        );
        // Stays rejected on later polls.
        assert_eq!(
            store.check_negotiation(&token).unwrap().status,
            NegotiationStatus::Rejected
        );
        assert_eq!(store.active_credential_count().unwrap(), 0);
    }

    #[test]
    fn test_negotiation_expiry() {
        let store = store();
        add_friendship(&store, "f1", "TestBot", FriendshipState::Active);
        let token = store
            .issue_negotiation(&ClaimedIdentity::new("TestBot"), "f1")
            .unwrap();
        let later = Utc::now() + Duration::hours(25);
        let err = store.check_negotiation_at(&token, later).unwrap_err();
        assert!(matches!(err, BotNetError::TokenExpired(_)));
        assert!(matches!(
            store.resolve_negotiation_at(&token, later).unwrap_err(),
            BotNetError::TokenExpired(_)
        ));
    }

    #[test]
    fn test_concurrent_checks_mint_once() {
        let store = Arc::new(store());
        add_friendship(&store, "f1", "TestBot", FriendshipState::Active);
        let token = store
            .issue_negotiation(&ClaimedIdentity::new("TestBot"), "f1")
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let token = token.clone();
                std::thread::spawn(move || store.check_negotiation(&token))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let accepted = results
            .iter()
            .filter(|r| matches!(r, Ok(c) if c.status == NegotiationStatus::Accepted))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(store.active_credential_count().unwrap(), 2);
    }

    #[test]
    fn test_issue_permanent_is_idempotent() {
        let store = store();
        let a = store
            .issue_permanent("TestBot", NODE, ExchangeMethod::Accepted)
            .unwrap();
        let b = store
            .issue_permanent("TestBot", NODE, ExchangeMethod::Accepted)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(store.active_credential_count().unwrap(), 1);
    }

    #[test]
    fn test_import_permanent() {
        let store = store();
        let secret = PermanentSecret::from_random_bytes(&[9; TOKEN_BYTES]);
        store
            .import_permanent(NODE, "botnet.peer.example", &secret, ExchangeMethod::ChallengeResponse)
            .unwrap();
        // Same secret again is fine.
        store
            .import_permanent(NODE, "botnet.peer.example", &secret, ExchangeMethod::ChallengeResponse)
            .unwrap();
        let other = PermanentSecret::from_random_bytes(&[8; TOKEN_BYTES]);
        let err = store
            .import_permanent(NODE, "botnet.peer.example", &other, ExchangeMethod::ChallengeResponse)
            .unwrap_err();
        assert!(matches!(err, BotNetError::FriendshipConflict { .. }));
        assert_eq!(store.outbound_secret("botnet.peer.example").unwrap(), Some(secret));
    }

    #[test]
    fn test_validate_permanent_rejects_wrong_secret_and_caller() {
        let store = store();
        let secret = store
            .issue_permanent("TestBot", NODE, ExchangeMethod::Accepted)
            .unwrap();
        let wrong = PermanentSecret::from_random_bytes(&[1; TOKEN_BYTES]);
        assert!(matches!(
            store.validate_permanent("TestBot", &wrong).unwrap_err(),
            BotNetError::InvalidToken(_)
        ));
        assert!(store.validate_permanent("OtherBot", &secret).is_err());
        let cred = store.validate_permanent("TestBot", &secret).unwrap();
        let stored = store
            .db
            .with_connection(|conn| credential::get(conn, &cred.id))
            .unwrap()
            .unwrap();
        assert!(stored.last_used_at.is_some());
    }

    #[test]
    fn test_session_expiry_boundary_is_exact() {
        let store = store();
        let secret = store
            .issue_permanent("TestBot", NODE, ExchangeMethod::Accepted)
            .unwrap();
        let cred = store.validate_permanent("TestBot", &secret).unwrap();
        let t0 = truncate_ms(Utc::now());
        let grant = store.issue_session_at("TestBot", &cred.id, t0).unwrap();
        assert_eq!(grant.expires_at, t0 + Duration::hours(4));

        let just_before = grant.expires_at - Duration::milliseconds(1);
        let info = store.validate_session_at(&grant.token, just_before).unwrap();
        assert_eq!(info.caller_id, "TestBot");

        let err = store
            .validate_session_at(&grant.token, grant.expires_at)
            .unwrap_err();
        assert!(matches!(err, BotNetError::TokenExpired(_)));
    }

    #[test]
    fn test_renewal_is_capped_by_max_lifetime() {
        let store = store();
        let secret = store
            .issue_permanent("TestBot", NODE, ExchangeMethod::Accepted)
            .unwrap();
        let cred = store.validate_permanent("TestBot", &secret).unwrap();
        let t0 = truncate_ms(Utc::now());
        let grant = store.issue_session_at("TestBot", &cred.id, t0).unwrap();

        let info = store
            .renew_session_at(&grant.token, t0 + Duration::hours(3))
            .unwrap();
        assert_eq!(info.expires_at, t0 + Duration::hours(7));

        let mut now = t0 + Duration::hours(3);
        for _ in 0..10 {
            now += Duration::hours(3);
            if store.renew_session_at(&grant.token, now).is_err() {
                break;
            }
        }
        let info = store
            .validate_session_at(&grant.token, t0 + Duration::hours(23))
            .unwrap();
        assert_eq!(info.expires_at, t0 + Duration::hours(24));
        assert!(store
            .validate_session_at(&grant.token, t0 + Duration::hours(24))
            .is_err());
    }

    #[test]
    fn test_revoked_credential_blocks_login_and_cascades() {
        let store = store_with(true);
        let grant = login(&store, "TestBot");
        let n = store
            .db
            .with_transaction(|tx| store.revoke_peer_in(tx, "TestBot", Utc::now()))
            .unwrap();
        assert_eq!(n, 1);
        assert!(matches!(
            store.validate_session(&grant.token).unwrap_err(),
            BotNetError::InvalidToken(_)
        ));
        let active = store
            .db
            .with_connection(|conn| credential::list_active_for_owner(conn, "TestBot"))
            .unwrap();
        assert!(active.is_empty());
    }

    #[test]
    fn test_revocation_without_cascade_keeps_sessions() {
        let store = store_with(false);
        let grant = login(&store, "TestBot");
        let secret = store
            .issue_permanent("TestBot", NODE, ExchangeMethod::Accepted)
            .unwrap();
        let cred = store.validate_permanent("TestBot", &secret).unwrap();
        assert!(store.revoke_credential(&cred.id).unwrap());

        // Login is refused, but the existing session lives out its TTL.
        assert!(store.validate_permanent("TestBot", &secret).is_err());
        assert!(store.issue_session("TestBot", &cred.id).is_err());
        assert!(store.validate_session(&grant.token).is_ok());
    }

    #[test]
    fn test_revoke_session() {
        let store = store();
        let grant = login(&store, "TestBot");
        assert_eq!(store.active_session_count().unwrap(), 1);
        assert!(store.revoke_session(&grant.token).unwrap());
        assert!(!store.revoke_session(&grant.token).unwrap());
        assert!(store.validate_session(&grant.token).is_err());
    }

    #[test]
    fn test_sweep_removes_only_expired_rows() {
        let store = store();
        add_friendship(&store, "f1", "TestBot", FriendshipState::Pending);
        store
            .issue_negotiation(&ClaimedIdentity::new("TestBot"), "f1")
            .unwrap();
        let grant = login(&store, "TestBot");

        let report = store.sweep_expired().unwrap();
        assert_eq!(report, SweepReport::default());

        let report = store
            .sweep_expired_at(grant.expires_at + Duration::hours(24))
            .unwrap();
        assert_eq!(report.negotiation_tokens, 1);
        assert_eq!(report.sessions, 1);
    }
}
