//! The collaborators behind authenticated calls.
//!
//! The trust layer decides *who* may call; what a message or a gossip
//! exchange actually does belongs to the node. [`NodeHandle`] is that seam.

use async_trait::async_trait;
use botnet_types::error::{BotNetError, BotNetResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Messages returned by one `message.check` unless the caller asks for fewer.
const DEFAULT_CHECK_LIMIT: usize = 50;
/// Received messages retained; oldest go first.
const INBOX_CAPACITY: usize = 1000;
/// Gossip items retained; oldest go first.
const GOSSIP_CAPACITY: usize = 500;
/// Items returned by one exchange.
const GOSSIP_REPLY_LIMIT: usize = 100;

/// Node-side behaviour reached through authenticated calls.
///
/// `caller` is always an identity the gate resolved from a credential.
#[async_trait]
pub trait NodeHandle: Send + Sync {
    /// Public profile served by `peer.profile`.
    fn profile(&self) -> Value;

    /// A friend sent us a message.
    async fn deliver_message(&self, caller: &str, params: &Value) -> BotNetResult<Value>;

    /// A friend collects the messages we queued for it.
    async fn check_messages(&self, caller: &str, params: &Value) -> BotNetResult<Value>;

    /// Swap gossip with a friend.
    async fn exchange_gossip(&self, caller: &str, params: &Value) -> BotNetResult<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipItem {
    pub origin: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Mailboxes and a gossip buffer held in memory.
pub struct InMemoryNode {
    node_id: String,
    description: String,
    /// Messages received from friends.
    inbox: Mutex<VecDeque<Message>>,
    /// Messages waiting for a friend to collect, keyed by friend.
    outbox: DashMap<String, VecDeque<Message>>,
    gossip: Mutex<VecDeque<GossipItem>>,
}

impl InMemoryNode {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            description: String::new(),
            inbox: Mutex::new(VecDeque::new()),
            outbox: DashMap::new(),
            gossip: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Queue a message for `peer` to pick up with `message.check`.
    pub fn queue_for(&self, peer: &str, content: impl Into<String>) -> Message {
        let msg = Message {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: self.node_id.clone(),
            recipient_id: Some(peer.to_string()),
            content: content.into(),
            timestamp: Utc::now(),
        };
        self.outbox
            .entry(peer.to_string())
            .or_default()
            .push_back(msg.clone());
        msg
    }

    /// Everything friends have sent us so far.
    pub fn inbox(&self) -> Vec<Message> {
        self.inbox
            .lock()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn gossip(&self) -> Vec<GossipItem> {
        self.gossip
            .lock()
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn poisoned<T>(e: std::sync::PoisonError<T>) -> BotNetError {
        BotNetError::Internal(format!("node state poisoned: {e}"))
    }
}

#[async_trait]
impl NodeHandle for InMemoryNode {
    fn profile(&self) -> Value {
        json!({
            "node_id": self.node_id,
            "description": self.description,
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    async fn deliver_message(&self, caller: &str, params: &Value) -> BotNetResult<Value> {
        let content = params
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| BotNetError::MalformedRequest("message.send needs content".into()))?;
        let msg = Message {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: caller.to_string(),
            recipient_id: params
                .get("recipient_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        let reply = json!({ "message_id": msg.id, "received_at": msg.timestamp });
        let mut inbox = self.inbox.lock().map_err(Self::poisoned)?;
        inbox.push_back(msg);
        while inbox.len() > INBOX_CAPACITY {
            inbox.pop_front();
        }
        drop(inbox);
        debug!(from = caller, "Message delivered");
        Ok(reply)
    }

    async fn check_messages(&self, caller: &str, params: &Value) -> BotNetResult<Value> {
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_CHECK_LIMIT);
        let (messages, remaining) = match self.outbox.get_mut(caller) {
            Some(mut queue) => {
                let take = limit.min(queue.len());
                let batch: Vec<Message> = queue.drain(..take).collect();
                (batch, queue.len())
            }
            None => (Vec::new(), 0),
        };
        Ok(json!({ "messages": messages, "remaining": remaining }))
    }

    async fn exchange_gossip(&self, caller: &str, params: &Value) -> BotNetResult<Value> {
        let incoming = match params.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(BotNetError::MalformedRequest(
                    "gossip.exchange items must be an array".into(),
                ))
            }
        };
        let now = Utc::now();
        let mut gossip = self.gossip.lock().map_err(Self::poisoned)?;

        let reply: Vec<Value> = gossip
            .iter()
            .rev()
            .filter(|g| g.origin != caller)
            .take(GOSSIP_REPLY_LIMIT)
            .map(|g| json!({ "origin": g.origin, "payload": g.payload }))
            .collect();

        let mut accepted = 0usize;
        for payload in incoming {
            if gossip.iter().any(|g| g.payload == payload) {
                continue;
            }
            gossip.push_back(GossipItem {
                origin: caller.to_string(),
                payload,
                received_at: now,
            });
            accepted += 1;
        }
        while gossip.len() > GOSSIP_CAPACITY {
            gossip.pop_front();
        }
        debug!(from = caller, accepted, "Gossip exchanged");
        Ok(json!({ "accepted": accepted, "items": reply }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_requires_content() {
        let node = InMemoryNode::new("HomeBot");
        let err = node.deliver_message("TestBot", &json!({})).await.unwrap_err();
        assert!(matches!(err, BotNetError::MalformedRequest(_)));

        node.deliver_message("TestBot", &json!({"content": "hi"}))
            .await
            .unwrap();
        let inbox = node.inbox();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].author_id, "TestBot");
    }

    #[tokio::test]
    async fn test_inbox_drops_oldest_past_capacity() {
        let node = InMemoryNode::new("HomeBot");
        for i in 0..INBOX_CAPACITY + 5 {
            node.deliver_message("TestBot", &json!({"content": format!("m{i}")}))
                .await
                .unwrap();
        }
        let inbox = node.inbox();
        assert_eq!(inbox.len(), INBOX_CAPACITY);
        assert_eq!(inbox[0].content, "m5");
        assert_eq!(inbox[INBOX_CAPACITY - 1].content, format!("m{}", INBOX_CAPACITY + 4));
    }

    #[tokio::test]
    async fn test_check_drains_only_the_callers_queue() {
        let node = InMemoryNode::new("HomeBot");
        node.queue_for("TestBot", "one");
        node.queue_for("TestBot", "two");
        node.queue_for("OtherBot", "three");

        let first = node
            .check_messages("TestBot", &json!({"limit": 1}))
            .await
            .unwrap();
        assert_eq!(first["messages"][0]["content"], "one");
        assert_eq!(first["remaining"], 1);

        let rest = node.check_messages("TestBot", &json!({})).await.unwrap();
        assert_eq!(rest["messages"][0]["content"], "two");
        assert_eq!(rest["remaining"], 0);

        let empty = node.check_messages("Nobody", &json!({})).await.unwrap();
        assert_eq!(empty["messages"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_gossip_dedupes_and_skips_own_items() {
        let node = InMemoryNode::new("HomeBot");
        let r = node
            .exchange_gossip("A", &json!({"items": [{"k": 1}, {"k": 1}]}))
            .await
            .unwrap();
        assert_eq!(r["accepted"], 1);
        assert_eq!(r["items"].as_array().unwrap().len(), 0);

        let r = node
            .exchange_gossip("B", &json!({"items": [{"k": 1}, {"k": 2}]}))
            .await
            .unwrap();
        assert_eq!(r["accepted"], 1);
        assert_eq!(r["items"][0]["origin"], "A");

        let r = node.exchange_gossip("A", &json!({})).await.unwrap();
        let items = r["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["origin"], "B");
    }

    #[tokio::test]
    async fn test_gossip_rejects_non_array() {
        let node = InMemoryNode::new("HomeBot");
        assert!(node
            .exchange_gossip("A", &json!({"items": "nope"}))
            .await
            .is_err());
    }
}
