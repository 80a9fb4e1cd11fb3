//! Route handlers for the node's HTTP surface.
//!
//! Every `POST /rpc` call goes through the same order: rate limit, then the
//! auth gate, then the method handler. Nothing touches trust state before
//! the limiter has admitted the call.

use crate::node::NodeHandle;
use crate::rate_limiter::ClassRateLimiter;
use crate::rpc::{http_status, retry_after_secs, RpcRequest, RpcResponse, JSONRPC_VERSION};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use botnet_kernel::auth::{AuthenticatedPeer, CallContext, GateRequest, PeerCredential};
use botnet_kernel::BotNetKernel;
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::friendship::{Friendship, FriendshipState};
use botnet_types::method::{Method, MethodClass};
use botnet_types::token::NegotiationToken;
use botnet_types::peer::{ClaimedIdentity, PeerKind};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error};

/// Header carrying the caller's claimed (unverified) identity.
pub const BOT_ID_HEADER: &str = "x-bot-id";

/// Shared state for all route handlers.
pub struct AppState {
    pub kernel: Arc<BotNetKernel>,
    pub limiter: Arc<ClassRateLimiter>,
    pub node: Arc<dyn NodeHandle>,
}

impl AppState {
    pub fn new(kernel: Arc<BotNetKernel>, node: Arc<dyn NodeHandle>) -> Self {
        let limiter = Arc::new(ClassRateLimiter::new(&kernel.config.rate_limits));
        Self {
            kernel,
            limiter,
            node,
        }
    }
}

/// POST /rpc: the JSON-RPC 2.0 entry point.
pub async fn rpc(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            // Unparseable bodies still spend the strictest budget.
            let outcome = state
                .limiter
                .admit(remote.ip(), MethodClass::FriendshipRequest)
                .and(Err(BotNetError::MalformedRequest(format!(
                    "invalid JSON-RPC body: {e}"
                ))));
            return reply("-", Value::Null, outcome);
        }
    };
    let outcome = handle(&state, remote.ip(), &headers, &req).await;
    reply(&req.method, req.id, outcome)
}

async fn handle(
    state: &AppState,
    ip: IpAddr,
    headers: &HeaderMap,
    req: &RpcRequest,
) -> BotNetResult<Value> {
    state.limiter.admit(ip, MethodClass::for_name(&req.method))?;
    if req.jsonrpc != JSONRPC_VERSION {
        return Err(BotNetError::MalformedRequest(format!(
            "jsonrpc must be \"{JSONRPC_VERSION}\""
        )));
    }

    let claimed = claimed_identity(headers);
    let (method, ctx) = state.kernel.gate.authorize(GateRequest {
        method: &req.method,
        bearer: bearer_token(headers),
        claimed: claimed.as_ref(),
        params: &req.params,
    })?;
    dispatch(state, method, ctx, &req.params).await
}

async fn dispatch(
    state: &AppState,
    method: Method,
    ctx: CallContext,
    params: &Value,
) -> BotNetResult<Value> {
    let kernel = &state.kernel;
    match method {
        Method::PeerHealth => Ok(json!({
            "status": "ok",
            "node_id": kernel.config.node_id,
            "timestamp": Utc::now(),
        })),
        Method::PeerProfile => Ok(state.node.profile()),
        Method::FriendshipRequest => {
            let claimed = match ctx {
                CallContext::Public { claimed } => claimed,
                CallContext::Authenticated(_) => None,
            }
            .or_else(|| str_param(params, "from").map(ClaimedIdentity::new))
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                BotNetError::MalformedRequest(
                    "friendship.request needs an X-Bot-Id header or params.from".into(),
                )
            })?;
            let inbound = kernel.friendships.receive_request(&claimed)?;
            let f = &inbound.friendship;
            Ok(json!({
                "friendship_id": f.id,
                "status": f.state,
                "kind": f.kind,
                "tier": f.tier,
                "negotiation_token": inbound.negotiation_token,
                "challenge_required": f.kind == PeerKind::Federated
                    && f.state == FriendshipState::Pending,
            }))
        }
        Method::FriendshipStatus => {
            let (_, token, _) = negotiation(&ctx)?;
            to_json(&kernel.tokens.check_negotiation(token)?)
        }
        Method::ChallengeRequest => {
            let (_, _, friendship_id) = negotiation(&ctx)?;
            to_json(&kernel.challenges.issue(friendship_id)?)
        }
        Method::ChallengeRespond => {
            let (_, _, friendship_id) = negotiation(&ctx)?;
            let challenge_id = required_param(params, "challenge_id")?;
            let proof = required_param(params, "proof")?;
            let outcome = kernel
                .challenges
                .verify(friendship_id, challenge_id, proof)
                .await?;
            to_json(&outcome)
        }
        Method::Login => {
            let peer = authenticated(&ctx)?;
            let PeerCredential::Permanent { credential_id } = peer.credential() else {
                return Err(BotNetError::Internal("login without a permanent credential".into()));
            };
            to_json(&kernel.tokens.issue_session(peer.caller_id(), credential_id)?)
        }
        Method::Logout => {
            let peer = authenticated(&ctx)?;
            let PeerCredential::Session { token, .. } = peer.credential() else {
                return Err(BotNetError::Internal("logout without a session".into()));
            };
            let revoked = kernel.tokens.revoke_session(token)?;
            Ok(json!({ "revoked": revoked }))
        }
        Method::MessageSend => {
            let caller = authenticated(&ctx)?.caller_id();
            let out = state.node.deliver_message(caller, params).await?;
            kernel.friendships.record_interaction(caller)?;
            Ok(out)
        }
        Method::MessageCheck => {
            let caller = authenticated(&ctx)?.caller_id();
            state.node.check_messages(caller, params).await
        }
        Method::GossipExchange => {
            let caller = authenticated(&ctx)?.caller_id();
            let out = state.node.exchange_gossip(caller, params).await?;
            kernel.friendships.record_interaction(caller)?;
            Ok(out)
        }
        Method::FriendshipList => {
            let friends: Vec<Value> = kernel
                .friendships
                .list(Some(FriendshipState::Active))?
                .iter()
                .map(friend_summary)
                .collect();
            Ok(json!({ "friends": friends }))
        }
        Method::FriendshipRemove => {
            let caller = authenticated(&ctx)?.caller_id();
            let f = kernel.friendships.unfriend(caller)?;
            Ok(json!({ "status": f.state }))
        }
    }
}

/// GET {well_known_path}/{challenge_id}: proofs this node is publishing.
pub async fn challenge_proof(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path(challenge_id): Path<String>,
) -> Response {
    if let Err(err) = state.limiter.admit(remote.ip(), MethodClass::Public) {
        return reply("well-known", Value::Null, Err(err));
    }
    match state.kernel.proofs.get(&challenge_id) {
        Some(value) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            value,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn reply(method: &str, id: Value, outcome: BotNetResult<Value>) -> Response {
    match outcome {
        Ok(result) => (StatusCode::OK, Json(RpcResponse::success(id, result))).into_response(),
        Err(err) => {
            if err.is_internal() {
                error!(method, error = %err, "RPC call failed");
            } else {
                debug!(method, code = err.code(), error = %err, "RPC call refused");
            }
            let status = http_status(&err);
            let body = Json(RpcResponse::failure(id, &err));
            match err {
                BotNetError::RateLimited { retry_after } => (
                    status,
                    [(RETRY_AFTER, retry_after_secs(retry_after).to_string())],
                    body,
                )
                    .into_response(),
                _ => (status, body).into_response(),
            }
        }
    }
}

/// `Authorization: Bearer <token>`, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn claimed_identity(headers: &HeaderMap) -> Option<ClaimedIdentity> {
    headers
        .get(BOT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ClaimedIdentity::new)
        .filter(|c| !c.is_empty())
}

fn authenticated(ctx: &CallContext) -> BotNetResult<&AuthenticatedPeer> {
    ctx.peer()
        .ok_or_else(|| BotNetError::Internal("handler reached without a resolved caller".into()))
}

fn negotiation(ctx: &CallContext) -> BotNetResult<(&str, &NegotiationToken, &str)> {
    let peer = authenticated(ctx)?;
    match peer.credential() {
        PeerCredential::Negotiation {
            token,
            friendship_id,
        } => Ok((peer.caller_id(), token, friendship_id.as_str())),
        _ => Err(BotNetError::Internal("expected a negotiation credential".into())),
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

fn required_param<'a>(params: &'a Value, key: &str) -> BotNetResult<&'a str> {
    str_param(params, key)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BotNetError::MalformedRequest(format!("missing params.{key}")))
}

fn friend_summary(f: &Friendship) -> Value {
    json!({
        "peer_identifier": f.peer_identifier,
        "kind": f.kind,
        "tier": f.tier,
        "established_at": f.established_at,
        "interaction_count": f.interaction_count,
    })
}

fn to_json<T: Serialize>(value: &T) -> BotNetResult<Value> {
    serde_json::to_value(value).map_err(|e| BotNetError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sess_abc "));
        assert_eq!(bearer_token(&headers), Some("sess_abc"));
    }

    #[test]
    fn test_blank_claimed_identity_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(BOT_ID_HEADER, HeaderValue::from_static("   "));
        assert!(claimed_identity(&headers).is_none());

        headers.insert(BOT_ID_HEADER, HeaderValue::from_static(" TestBot "));
        assert_eq!(claimed_identity(&headers).unwrap().as_str(), "TestBot");
    }

    #[test]
    fn test_rate_limited_reply_sets_retry_after() {
        let resp = reply(
            "login",
            Value::from(7),
            Err(BotNetError::RateLimited {
                retry_after: std::time::Duration::from_millis(2500),
            }),
        );
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(RETRY_AFTER).unwrap(), "3");
    }
}
