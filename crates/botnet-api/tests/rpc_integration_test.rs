//! Integration tests for the node's HTTP surface.
//!
//! Each test boots real kernels over in-memory databases and serves them on
//! ephemeral localhost ports. Nodes talk to each other over HTTP through
//! `PeerClient`; domain proofs are fetched from the answering node's own
//! well-known route through a loopback fetcher, so no DNS is involved.

use async_trait::async_trait;
use botnet_api::client::PeerClient;
use botnet_api::node::InMemoryNode;
use botnet_api::routes::AppState;
use botnet_api::server::serve;
use botnet_kernel::challenge::DomainFetcher;
use botnet_kernel::BotNetKernel;
use botnet_memory::TrustSubstrate;
use botnet_types::challenge::ChallengeOutcome;
use botnet_types::config::NodeConfig;
use botnet_types::error::{codes, BotNetError, BotNetResult};
use botnet_types::friendship::{FriendshipState, TrustTier};
use botnet_types::method::Method;
use botnet_types::token::NegotiationStatus;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Loopback fetcher: resolves peer domains to test listeners
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LoopbackFetcher {
    hosts: DashMap<String, SocketAddr>,
}

#[async_trait]
impl DomainFetcher for LoopbackFetcher {
    async fn fetch(&self, domain: &str, path: &str) -> BotNetResult<String> {
        let addr = self
            .hosts
            .get(domain)
            .map(|a| *a)
            .ok_or_else(|| BotNetError::ChallengeFailed(format!("unknown host {domain}")))?;
        let resp = reqwest::get(format!("http://{addr}{path}"))
            .await
            .map_err(|e| BotNetError::ChallengeFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BotNetError::ChallengeFailed(format!("HTTP {}", resp.status())));
        }
        resp.text()
            .await
            .map_err(|e| BotNetError::ChallengeFailed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Test node harness
// ---------------------------------------------------------------------------

struct TestNode {
    kernel: Arc<BotNetKernel>,
    node: Arc<InMemoryNode>,
    client: PeerClient,
    addr: SocketAddr,
    endpoint: String,
    server: JoinHandle<std::io::Result<()>>,
}

async fn start_node(
    node_id: &str,
    fetcher: Arc<LoopbackFetcher>,
    tweak: impl FnOnce(&mut NodeConfig),
) -> TestNode {
    let mut config = NodeConfig {
        node_id: node_id.to_string(),
        federation_prefix: "botnet.".to_string(),
        ..NodeConfig::default()
    };
    tweak(&mut config);
    let db = TrustSubstrate::open_in_memory().unwrap();
    let kernel = Arc::new(BotNetKernel::boot_with(config, db, fetcher.clone()).unwrap());
    let node = Arc::new(InMemoryNode::new(node_id));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    fetcher.hosts.insert(node_id.to_string(), addr);

    let state = Arc::new(AppState::new(kernel.clone(), node.clone()));
    let server = tokio::spawn(serve(state, listener));
    TestNode {
        client: PeerClient::new(kernel.clone()).unwrap(),
        kernel,
        node,
        addr,
        endpoint: format!("http://{addr}/rpc"),
        server,
    }
}

/// Send a raw JSON-RPC body; returns (HTTP status, body, Retry-After).
async fn raw_call(
    endpoint: &str,
    body: Value,
    headers: &[(&str, &str)],
) -> (u16, Value, Option<String>) {
    let mut req = reqwest::Client::new().post(endpoint).json(&body);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    let resp = req.send().await.unwrap();
    let status = resp.status().as_u16();
    let retry = resp
        .headers()
        .get("retry-after")
        .map(|v| v.to_str().unwrap().to_string());
    (status, resp.json().await.unwrap(), retry)
}

fn rpc(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 })
}

/// Local requester `alice` befriends `home` and imports credentials.
async fn befriend_locally(alice: &TestNode, home: &TestNode) {
    let out = alice
        .client
        .request_friendship("HomeBot", &home.endpoint)
        .await
        .unwrap();
    let token = out.negotiation_token.clone().unwrap();
    assert_eq!(out.status, FriendshipState::Active);
    let check = alice
        .client
        .poll_friendship("HomeBot", &home.endpoint, &token)
        .await
        .unwrap();
    assert_eq!(check.status, NegotiationStatus::Accepted);
}

// ---------------------------------------------------------------------------
// Local peers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_local_friendship_end_to_end() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("HomeBot", fetcher.clone(), |_| {}).await;
    let alice = start_node("alice", fetcher, |_| {}).await;

    let out = alice
        .client
        .request_friendship("HomeBot", &home.endpoint)
        .await
        .unwrap();
    let token = out.negotiation_token.clone().unwrap();
    assert_eq!(out.status, FriendshipState::Active);
    assert!(!out.challenge_required);

    let check = alice
        .client
        .poll_friendship("HomeBot", &home.endpoint, &token)
        .await
        .unwrap();
    assert_eq!(check.status, NegotiationStatus::Accepted);

    // The token was consumed by the accepting poll.
    let again = alice
        .client
        .poll_friendship("HomeBot", &home.endpoint, &token)
        .await
        .unwrap_err();
    assert!(matches!(again, BotNetError::InvalidToken(_)));

    let mine = alice.kernel.friendships.get("HomeBot").unwrap().unwrap();
    assert_eq!(mine.state, FriendshipState::Active);
    assert_eq!(mine.tier, TrustTier::Local);
    assert!(alice.kernel.tokens.outbound_secret("HomeBot").unwrap().is_some());

    let grant = alice.client.login("HomeBot", &home.endpoint).await.unwrap();

    alice
        .client
        .call_with_session(
            &home.endpoint,
            &grant.token,
            Method::MessageSend,
            json!({"content": "hello"}),
        )
        .await
        .unwrap();
    let inbox = home.node.inbox();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].author_id, "alice");
    let theirs = home.kernel.friendships.get("alice").unwrap().unwrap();
    assert_eq!(theirs.interaction_count, 1);

    home.node.queue_for("alice", "welcome");
    let checked = alice
        .client
        .call_with_session(&home.endpoint, &grant.token, Method::MessageCheck, json!({}))
        .await
        .unwrap();
    assert_eq!(checked["messages"][0]["content"], "welcome");

    let listed = alice
        .client
        .call_with_session(&home.endpoint, &grant.token, Method::FriendshipList, json!({}))
        .await
        .unwrap();
    assert_eq!(listed["friends"][0]["peer_identifier"], "alice");

    assert!(alice.client.logout(&home.endpoint, &grant.token).await.unwrap());
    let err = alice
        .client
        .call_with_session(&home.endpoint, &grant.token, Method::MessageCheck, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, BotNetError::InvalidToken(_)));
}

#[tokio::test]
async fn test_unfriend_blocks_login_and_sessions() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("HomeBot", fetcher.clone(), |_| {}).await;
    let alice = start_node("alice", fetcher, |_| {}).await;
    befriend_locally(&alice, &home).await;

    let grant = alice.client.login("HomeBot", &home.endpoint).await.unwrap();
    let removed = alice
        .client
        .call_with_session(&home.endpoint, &grant.token, Method::FriendshipRemove, json!({}))
        .await
        .unwrap();
    assert_eq!(removed["status"], "terminated");

    let err = alice.client.login("HomeBot", &home.endpoint).await.unwrap_err();
    assert!(matches!(err, BotNetError::InvalidToken(_)));

    // Sessions die with the credential.
    let err = alice
        .client
        .call_with_session(&home.endpoint, &grant.token, Method::MessageCheck, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, BotNetError::InvalidToken(_)));
}

#[tokio::test]
async fn test_repeat_request_is_answered_without_a_token() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("HomeBot", fetcher.clone(), |_| {}).await;
    let alice = start_node("alice", fetcher, |_| {}).await;
    befriend_locally(&alice, &home).await;

    // Anyone can claim "alice"; an active friendship hands them nothing.
    let (status, body, _) = raw_call(
        &home.endpoint,
        rpc("friendship.request", json!({})),
        &[("X-Bot-Id", "alice")],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["status"], "active");
    assert!(body["result"]["negotiation_token"].is_null());

    // The accepting side does not send a request of its own.
    let err = home
        .client
        .request_friendship("alice", &alice.endpoint)
        .await
        .unwrap_err();
    assert!(matches!(err, BotNetError::FriendshipConflict { .. }));
}

#[tokio::test]
async fn test_crossed_requests_become_friends() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let alice = start_node("alice", fetcher.clone(), |_| {}).await;
    let bob = start_node("bob", fetcher, |_| {}).await;

    // Both record their request before either reaches the other.
    alice.kernel.friendships.send_request("bob").unwrap();
    bob.kernel.friendships.send_request("alice").unwrap();

    let to_bob = alice
        .client
        .request_friendship("bob", &bob.endpoint)
        .await
        .unwrap();
    assert_eq!(to_bob.status, FriendshipState::Requested);
    assert!(to_bob.negotiation_token.is_none());

    let to_alice = bob
        .client
        .request_friendship("alice", &alice.endpoint)
        .await
        .unwrap();
    assert_eq!(to_alice.status, FriendshipState::Active);
    let token = to_alice.negotiation_token.clone().unwrap();
    let check = bob
        .client
        .poll_friendship("alice", &alice.endpoint, &token)
        .await
        .unwrap();
    assert_eq!(check.status, NegotiationStatus::Accepted);

    for (node, peer) in [(&alice, "bob"), (&bob, "alice")] {
        let f = node.kernel.friendships.get(peer).unwrap().unwrap();
        assert_eq!(f.state, FriendshipState::Active);
        assert_eq!(node.kernel.tokens.active_credential_count().unwrap(), 2);
    }
    alice.client.login("bob", &bob.endpoint).await.unwrap();
    bob.client.login("alice", &alice.endpoint).await.unwrap();
}

// ---------------------------------------------------------------------------
// Federated peers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_federated_friendship_requires_domain_proof() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("botnet.home.test", fetcher.clone(), |_| {}).await;
    let alice = start_node("botnet.alice.test", fetcher, |_| {}).await;

    let out = alice
        .client
        .request_friendship("botnet.home.test", &home.endpoint)
        .await
        .unwrap();
    let token = out.negotiation_token.clone().unwrap();
    assert_eq!(out.status, FriendshipState::Pending);
    assert!(out.challenge_required);

    let check = alice
        .client
        .poll_friendship("botnet.home.test", &home.endpoint, &token)
        .await
        .unwrap();
    assert_eq!(check.status, NegotiationStatus::Pending);
    let err = alice
        .client
        .login("botnet.home.test", &home.endpoint)
        .await
        .unwrap_err();
    assert!(matches!(err, BotNetError::AuthRequired(_)));

    let outcome = alice
        .client
        .answer_challenge(&home.endpoint, &token)
        .await
        .unwrap();
    assert_eq!(outcome, ChallengeOutcome::Verified);
    assert!(alice.kernel.proofs.is_empty());

    let theirs = home
        .kernel
        .friendships
        .get("botnet.alice.test")
        .unwrap()
        .unwrap();
    assert_eq!(theirs.state, FriendshipState::Active);
    assert_eq!(theirs.tier, TrustTier::DomainVerified);

    let check = alice
        .client
        .poll_friendship("botnet.home.test", &home.endpoint, &token)
        .await
        .unwrap();
    assert_eq!(check.status, NegotiationStatus::Accepted);
    alice
        .client
        .login("botnet.home.test", &home.endpoint)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_wrong_proofs_reject_the_request() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("botnet.home.test", fetcher.clone(), |_| {}).await;
    let alice = start_node("botnet.alice.test", fetcher, |_| {}).await;

    let out = alice
        .client
        .request_friendship("botnet.home.test", &home.endpoint)
        .await
        .unwrap();
    let token = out.negotiation_token.clone().unwrap();
    let bearer = token.as_str();
    let issued = alice
        .client
        .call(&home.endpoint, "challenge.request", json!({}), Some(bearer))
        .await
        .unwrap();
    let challenge_id = issued["challenge_id"].as_str().unwrap().to_string();

    let params = json!({ "challenge_id": challenge_id, "proof": "00" });
    let first = alice
        .client
        .call(&home.endpoint, "challenge.respond", params.clone(), Some(bearer))
        .await
        .unwrap();
    assert_eq!(first, json!({"status": "failed", "attempts_left": 1}));
    let last = alice
        .client
        .call(&home.endpoint, "challenge.respond", params, Some(bearer))
        .await
        .unwrap();
    assert_eq!(last, json!({"status": "failed", "attempts_left": 0}));

    let theirs = home
        .kernel
        .friendships
        .get("botnet.alice.test")
        .unwrap()
        .unwrap();
    assert_eq!(theirs.state, FriendshipState::Rejected);

    let check = alice
        .client
        .poll_friendship("botnet.home.test", &home.endpoint, &token)
        .await
        .unwrap();
    assert_eq!(check.status, NegotiationStatus::Rejected);
}

#[tokio::test]
async fn test_foreign_domain_is_refused_without_a_row() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("HomeBot", fetcher, |_| {}).await;

    let (status, body, _) = raw_call(
        &home.endpoint,
        rpc("friendship.request", json!({})),
        &[("X-Bot-Id", "external.example.com")],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], codes::DOMAIN_INVALID);
    assert!(home
        .kernel
        .friendships
        .get("external.example.com")
        .unwrap()
        .is_none());
}

// ---------------------------------------------------------------------------
// Gate, limiter and transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rate_limit_refuses_call_past_budget() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("HomeBot", fetcher, |c| c.rate_limits.public = 3).await;

    for _ in 0..3 {
        let (status, body, _) = raw_call(&home.endpoint, rpc("peer.health", json!({})), &[]).await;
        assert_eq!(status, 200);
        assert_eq!(body["result"]["status"], "ok");
    }
    let (status, body, retry) = raw_call(&home.endpoint, rpc("peer.health", json!({})), &[]).await;
    assert_eq!(status, 429);
    assert_eq!(body["error"]["code"], codes::RATE_LIMITED);
    assert!(body["error"]["data"]["retry_after_secs"].as_u64().unwrap() >= 1);
    assert!(retry.unwrap().parse::<u64>().unwrap() >= 1);

    // Other classes keep their own budget.
    let (status, _, _) = raw_call(
        &home.endpoint,
        rpc("friendship.request", json!({})),
        &[("X-Bot-Id", "alice")],
    )
    .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_gate_errors_on_the_wire() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("HomeBot", fetcher, |_| {}).await;

    // Unknown methods are gated like session methods before being reported.
    let (status, body, _) = raw_call(&home.endpoint, rpc("admin.shutdown", json!({})), &[]).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], codes::AUTH_REQUIRED);

    let (status, body, _) = raw_call(
        &home.endpoint,
        rpc("message.check", json!({})),
        &[("Authorization", "Bearer sess_not-a-token")],
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], codes::INVALID_TOKEN);

    // A claimed identity alone never authenticates.
    let (status, _, _) = raw_call(
        &home.endpoint,
        rpc("message.check", json!({})),
        &[("X-Bot-Id", "alice")],
    )
    .await;
    assert_eq!(status, 401);

    let resp = reqwest::Client::new()
        .post(&home.endpoint)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], codes::MALFORMED_REQUEST);
}

#[tokio::test]
async fn test_well_known_route_serves_published_proofs() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let alice = start_node("botnet.alice.test", fetcher, |_| {}).await;
    let expires = chrono::Utc::now() + chrono::Duration::minutes(5);
    alice.kernel.proofs.publish("c-1", "deadbeef", expires);

    let base = format!(
        "http://{}{}",
        alice.addr, alice.kernel.config.challenge.well_known_path
    );
    let resp = reqwest::get(format!("{base}/c-1")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "deadbeef");

    let resp = reqwest::get(format!("{base}/c-2")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn test_shutdown_stops_the_server() {
    let fetcher = Arc::new(LoopbackFetcher::default());
    let home = start_node("HomeBot", fetcher, |_| {}).await;
    home.kernel.shutdown().await;
    let joined = tokio::time::timeout(Duration::from_secs(5), home.server)
        .await
        .expect("server did not stop");
    assert!(joined.unwrap().is_ok());
}
