//! Outbound half of the protocol: this node calling a peer.
//!
//! [`PeerClient`] keeps the local trust state in step with what the remote
//! node tells it. A request is recorded before it is sent, credentials
//! delivered by a negotiation poll are imported before the friendship is
//! marked active, and a challenge proof is published only while the remote
//! node is checking it.

use crate::routes::BOT_ID_HEADER;
use crate::rpc::{remote_error, RpcRequest, RpcResponse};
use botnet_kernel::BotNetKernel;
use botnet_types::challenge::{ChallengeOutcome, IssuedChallenge};
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::friendship::FriendshipState;
use botnet_types::method::Method;
use botnet_types::peer::{PeerClass, PeerKind};
use botnet_types::token::{
    ExchangeMethod, NegotiationCheck, NegotiationStatus, NegotiationToken, SessionGrant,
    SessionToken,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What the remote node answered to `friendship.request`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboundRequest {
    /// Friendship id on the remote node.
    pub friendship_id: String,
    pub status: FriendshipState,
    pub kind: PeerKind,
    /// Absent when the remote node already had a request on record, or
    /// when our request crossed its own and it takes the requesting side.
    #[serde(default)]
    pub negotiation_token: Option<NegotiationToken>,
    #[serde(default)]
    pub challenge_required: bool,
}

/// JSON-RPC client bound to this node's identity and trust state.
pub struct PeerClient {
    http: reqwest::Client,
    kernel: Arc<BotNetKernel>,
}

impl PeerClient {
    pub fn new(kernel: Arc<BotNetKernel>) -> BotNetResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| BotNetError::Internal(format!("http client: {e}")))?;
        Ok(Self { http, kernel })
    }

    fn node_id(&self) -> &str {
        &self.kernel.config.node_id
    }

    /// Raw JSON-RPC call. Remote errors come back as their typed variant.
    pub async fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
        bearer: Option<&str>,
    ) -> BotNetResult<Value> {
        let request = RpcRequest::new(method, params);
        let mut builder = self
            .http
            .post(endpoint)
            .header(BOT_ID_HEADER, self.node_id())
            .json(&request);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| BotNetError::Internal(format!("{method} to {endpoint}: {e}")))?;
        let status = resp.status();
        let body: RpcResponse = resp.json().await.map_err(|e| {
            BotNetError::Internal(format!("{method} to {endpoint}: HTTP {status}, bad body: {e}"))
        })?;
        match (body.error, body.result) {
            (Some(err), _) => {
                debug!(method, code = err.code, "Remote refused call");
                Err(remote_error(err))
            }
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: Method,
        params: Value,
        bearer: Option<&str>,
    ) -> BotNetResult<T> {
        let value = self.call(endpoint, method.name(), params, bearer).await?;
        serde_json::from_value(value)
            .map_err(|e| BotNetError::Internal(format!("{method} reply: {e}")))
    }

    /// Ask `peer` to be friends.
    ///
    /// Nothing is sent when `peer` already asked us: that request is pending
    /// or active here and settles on this side.
    pub async fn request_friendship(
        &self,
        peer: &str,
        endpoint: &str,
    ) -> BotNetResult<OutboundRequest> {
        let local = self.kernel.friendships.send_request(peer)?;
        if local.state != FriendshipState::Requested {
            return Err(BotNetError::conflict(local.state, "send a friendship request"));
        }
        let out: OutboundRequest = self
            .call_as(
                endpoint,
                Method::FriendshipRequest,
                json!({ "from": self.node_id() }),
                None,
            )
            .await?;
        info!(peer, remote_status = %out.status, challenge = out.challenge_required, "Friendship request sent");
        Ok(out)
    }

    /// Poll a pending request. On acceptance both credential directions are
    /// imported and the local friendship becomes active.
    pub async fn poll_friendship(
        &self,
        peer: &str,
        endpoint: &str,
        token: &NegotiationToken,
    ) -> BotNetResult<NegotiationCheck> {
        let check: NegotiationCheck = self
            .call_as(endpoint, Method::FriendshipStatus, json!({}), Some(token.as_str()))
            .await?;
        if check.status != NegotiationStatus::Accepted {
            return Ok(check);
        }
        let (Some(ours), Some(theirs)) = (&check.credential_secret, &check.reciprocal_secret)
        else {
            return Err(BotNetError::Internal(format!(
                "{peer} accepted without delivering credentials"
            )));
        };
        let method = match self.kernel.friendships.classify(self.node_id()) {
            PeerClass::Federated => ExchangeMethod::ChallengeResponse,
            PeerClass::Local | PeerClass::Invalid => ExchangeMethod::Accepted,
        };
        let tokens = &self.kernel.tokens;
        tokens.import_permanent(self.node_id(), peer, ours, method)?;
        tokens.import_permanent(peer, self.node_id(), theirs, method)?;
        self.kernel.friendships.observe_acceptance(peer)?;
        info!(peer, method = %method, "Friendship accepted, credentials imported");
        Ok(check)
    }

    /// Answer the remote node's domain challenge.
    ///
    /// The proof is served from this node's well-known route for as long as
    /// the remote node may still fetch it.
    pub async fn answer_challenge(
        &self,
        endpoint: &str,
        token: &NegotiationToken,
    ) -> BotNetResult<ChallengeOutcome> {
        let issued: IssuedChallenge = self
            .call_as(endpoint, Method::ChallengeRequest, json!({}), Some(token.as_str()))
            .await?;
        let instructions = &issued.proof_instructions;
        if instructions.domain != self.node_id() {
            warn!(
                domain = %instructions.domain,
                node_id = %self.node_id(),
                "Challenged for a domain other than our node id"
            );
        }
        self.kernel
            .proofs
            .publish(&issued.challenge_id, &instructions.value, issued.expires_at);

        let outcome: ChallengeOutcome = self
            .call_as(
                endpoint,
                Method::ChallengeRespond,
                json!({ "challenge_id": issued.challenge_id, "proof": instructions.value }),
                Some(token.as_str()),
            )
            .await?;
        let finished = match outcome {
            ChallengeOutcome::Verified => true,
            ChallengeOutcome::Failed { attempts_left } => attempts_left == 0,
        };
        if finished {
            self.kernel.proofs.withdraw(&issued.challenge_id);
        }
        info!(challenge = %issued.challenge_id, ?outcome, "Domain challenge answered");
        Ok(outcome)
    }

    /// Trade our permanent secret for `peer` for a session.
    pub async fn login(&self, peer: &str, endpoint: &str) -> BotNetResult<SessionGrant> {
        let secret = self
            .kernel
            .tokens
            .outbound_secret(peer)?
            .ok_or_else(|| BotNetError::AuthRequired(format!("no credential held for {peer}")))?;
        self.call_as(
            endpoint,
            Method::Login,
            json!({ "caller_id": self.node_id(), "secret": secret.as_str() }),
            None,
        )
        .await
    }

    /// Any session-tier call.
    pub async fn call_with_session(
        &self,
        endpoint: &str,
        session: &SessionToken,
        method: Method,
        params: Value,
    ) -> BotNetResult<Value> {
        self.call(endpoint, method.name(), params, Some(session.as_str()))
            .await
    }

    pub async fn logout(&self, endpoint: &str, session: &SessionToken) -> BotNetResult<bool> {
        let reply = self
            .call_with_session(endpoint, session, Method::Logout, json!({}))
            .await?;
        Ok(reply.get("revoked").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}
