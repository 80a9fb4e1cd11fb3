//! Domain challenges: proving a federated peer controls the domain it claims.
//!
//! The peer is asked to publish `hex(HMAC-SHA256(secret, domain ":" id))` at
//! `<scheme>://<domain><well_known_path>/<id>`. The secret never leaves this
//! node. On a successful fetch the friendship is activated and both
//! credential directions are minted; each failure costs one attempt, and the
//! last one rejects the friendship.

use crate::friendship::FriendshipStateMachine;
use crate::tokens::{random_bytes, secrets_match, TokenStore};
use async_trait::async_trait;
use botnet_memory::{challenge, friendship, to_ms, truncate_ms, TrustSubstrate};
use botnet_types::challenge::{
    ChallengeOutcome, ChallengeStatus, DomainChallenge, IssuedChallenge, ProofInstructions,
};
use botnet_types::config::ChallengeConfig;
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::friendship::FriendshipState;
use botnet_types::peer::PeerKind;
use botnet_types::token::ExchangeMethod;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fetches the proof a peer published under its domain.
#[async_trait]
pub trait DomainFetcher: Send + Sync {
    /// Body served at `path` on `domain`. Any failure is an error.
    async fn fetch(&self, domain: &str, path: &str) -> BotNetResult<String>;
}

/// [`DomainFetcher`] over HTTP(S).
pub struct HttpDomainFetcher {
    client: reqwest::Client,
    scheme: String,
}

impl HttpDomainFetcher {
    pub fn new(config: &ChallengeConfig) -> BotNetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| BotNetError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            scheme: config.scheme.clone(),
        })
    }
}

#[async_trait]
impl DomainFetcher for HttpDomainFetcher {
    async fn fetch(&self, domain: &str, path: &str) -> BotNetResult<String> {
        let url = format!("{}://{}{}", self.scheme, domain, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BotNetError::ChallengeFailed(format!("fetch {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BotNetError::ChallengeFailed(format!(
                "fetch {url}: HTTP {}",
                status.as_u16()
            )));
        }
        resp.text()
            .await
            .map_err(|e| BotNetError::ChallengeFailed(format!("read {url}: {e}")))
    }
}

/// `hex(HMAC-SHA256(secret, domain ":" challenge_id))`.
pub fn expected_proof(secret: &str, domain: &str, challenge_id: &str) -> BotNetResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| BotNetError::Internal(format!("hmac key: {e}")))?;
    mac.update(domain.as_bytes());
    mac.update(b":");
    mac.update(challenge_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Issues and verifies domain challenges for federated friendships.
pub struct DomainChallengeService {
    db: TrustSubstrate,
    tokens: Arc<TokenStore>,
    friendships: Arc<FriendshipStateMachine>,
    config: ChallengeConfig,
    fetcher: Arc<dyn DomainFetcher>,
}

impl DomainChallengeService {
    pub fn new(
        db: TrustSubstrate,
        tokens: Arc<TokenStore>,
        friendships: Arc<FriendshipStateMachine>,
        config: ChallengeConfig,
        fetcher: Arc<dyn DomainFetcher>,
    ) -> Self {
        Self {
            db,
            tokens,
            friendships,
            config,
            fetcher,
        }
    }

    /// Path under the peer's domain where the proof for `challenge_id` lives.
    pub fn proof_path(&self, challenge_id: &str) -> String {
        format!(
            "{}/{}",
            self.config.well_known_path.trim_end_matches('/'),
            challenge_id
        )
    }

    fn issued(&self, domain: &str, c: &DomainChallenge) -> IssuedChallenge {
        let path = self.proof_path(&c.id);
        IssuedChallenge {
            challenge_id: c.id.clone(),
            proof_instructions: ProofInstructions {
                domain: domain.to_string(),
                url: format!("{}://{}{}", self.config.scheme, domain, path),
                path,
                value: c.expected_proof.clone(),
            },
            expires_at: c.expires_at,
        }
    }

    /// Issue a challenge for a pending federated friendship.
    ///
    /// A live pending challenge is returned as is, so re-issuing cannot reset
    /// the attempt counter.
    pub fn issue(&self, friendship_id: &str) -> BotNetResult<IssuedChallenge> {
        self.issue_at(friendship_id, Utc::now())
    }

    pub fn issue_at(&self, friendship_id: &str, now: DateTime<Utc>) -> BotNetResult<IssuedChallenge> {
        let now = truncate_ms(now);
        self.db.with_transaction(|tx| {
            let f = friendship::get_by_id(tx, friendship_id)?
                .ok_or_else(|| BotNetError::InvalidToken("unknown friendship".into()))?;
            if f.kind == PeerKind::Local {
                return Err(BotNetError::conflict(
                    f.state,
                    "issue a domain challenge for a local peer",
                ));
            }
            if f.state != FriendshipState::Pending {
                return Err(BotNetError::conflict(f.state, "issue a domain challenge"));
            }

            if let Some(existing) = challenge::find_pending(tx, friendship_id)? {
                if now < existing.expires_at {
                    return Ok(self.issued(&f.peer_identifier, &existing));
                }
                challenge::record_attempt(tx, &existing.id, existing.attempts, ChallengeStatus::Expired)?;
            }

            let id = uuid::Uuid::new_v4().to_string();
            let secret = hex::encode(random_bytes());
            let c = DomainChallenge {
                expected_proof: expected_proof(&secret, &f.peer_identifier, &id)?,
                id,
                for_friendship_id: friendship_id.to_string(),
                challenge_secret: secret,
                issued_at: now,
                expires_at: now + Duration::seconds(self.config.ttl_secs.min(u32::MAX as u64) as i64),
                attempts: 0,
                status: ChallengeStatus::Pending,
            };
            challenge::insert(tx, &c)?;
            info!(peer = %f.peer_identifier, challenge = %c.id, "Issued domain challenge");
            Ok(self.issued(&f.peer_identifier, &c))
        })
    }

    /// Verify a challenge by fetching the published proof.
    ///
    /// The fetch runs without holding the database; the outcome is applied in
    /// a transaction that re-checks the challenge is still pending, so two
    /// concurrent verifies cannot both count or both activate.
    pub async fn verify(
        &self,
        friendship_id: &str,
        challenge_id: &str,
        submitted_proof: &str,
    ) -> BotNetResult<ChallengeOutcome> {
        self.verify_at(friendship_id, challenge_id, submitted_proof, Utc::now())
            .await
    }

    pub async fn verify_at(
        &self,
        friendship_id: &str,
        challenge_id: &str,
        submitted_proof: &str,
        now: DateTime<Utc>,
    ) -> BotNetResult<ChallengeOutcome> {
        let now = truncate_ms(now);
        let (c, f) = self.db.with_connection(|conn| {
            let c = challenge::get(conn, challenge_id)?
                .filter(|c| c.for_friendship_id == friendship_id)
                .ok_or_else(|| BotNetError::ChallengeFailed("unknown challenge".into()))?;
            let f = friendship::get_by_id(conn, friendship_id)?
                .ok_or_else(|| BotNetError::ChallengeFailed("unknown friendship".into()))?;
            Ok((c, f))
        })?;
        if c.status != ChallengeStatus::Pending {
            return Err(BotNetError::ChallengeFailed(format!("challenge is {}", c.status)));
        }
        if now >= c.expires_at {
            self.db.with_connection(|conn| {
                challenge::record_attempt(conn, &c.id, c.attempts, ChallengeStatus::Expired)
            })?;
            return Err(BotNetError::ChallengeFailed("challenge expired".into()));
        }

        let domain = f.peer_identifier.as_str();
        let proved = if !secrets_match(&c.expected_proof, submitted_proof) {
            debug!(peer = domain, "Submitted proof does not match, skipping fetch");
            false
        } else {
            let path = self.proof_path(&c.id);
            let fetch = self.fetcher.fetch(domain, &path);
            match tokio::time::timeout(self.config.fetch_timeout(), fetch).await {
                Ok(Ok(body)) => secrets_match(&c.expected_proof, &body),
                Ok(Err(e)) => {
                    warn!(peer = domain, error = %e, "Domain proof fetch failed");
                    false
                }
                Err(_) => {
                    warn!(peer = domain, "Domain proof fetch timed out");
                    false
                }
            }
        };

        self.db.with_transaction(|tx| {
            let current = challenge::get(tx, &c.id)?
                .filter(|c| c.status == ChallengeStatus::Pending)
                .ok_or_else(|| BotNetError::ChallengeFailed("challenge no longer pending".into()))?;
            let attempts = current.attempts + 1;

            if proved {
                challenge::record_attempt(tx, &c.id, attempts, ChallengeStatus::Verified)?;
                self.friendships.activate_verified_in(tx, friendship_id, now)?;
                let node = self.tokens.node_id();
                let method = ExchangeMethod::ChallengeResponse;
                self.tokens.ensure_credential(tx, domain, node, method, now)?;
                self.tokens.ensure_credential(tx, node, domain, method, now)?;
                info!(peer = domain, attempts, "Domain challenge verified");
                return Ok(ChallengeOutcome::Verified);
            }

            let max = self.config.max_attempts.max(1);
            if attempts >= max {
                challenge::record_attempt(tx, &c.id, attempts, ChallengeStatus::Failed)?;
                self.friendships.reject_in(tx, friendship_id, now)?;
                info!(peer = domain, attempts, "Domain challenge failed, no attempts left");
                Ok(ChallengeOutcome::Failed { attempts_left: 0 })
            } else {
                challenge::record_attempt(tx, &c.id, attempts, ChallengeStatus::Pending)?;
                debug!(peer = domain, attempts, "Domain challenge attempt failed");
                Ok(ChallengeOutcome::Failed {
                    attempts_left: max - attempts,
                })
            }
        })
    }

    /// Mark unanswered challenges past their expiry as expired.
    pub fn sweep(&self) -> BotNetResult<usize> {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> BotNetResult<usize> {
        let now_ms = to_ms(now);
        self.db
            .with_transaction(|tx| challenge::expire_due(tx, now_ms))
    }

    pub fn pending_count(&self) -> BotNetResult<usize> {
        self.db.with_connection(challenge::count_pending)
    }
}
