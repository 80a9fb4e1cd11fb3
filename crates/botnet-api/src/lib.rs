//! HTTP surface of a BotNet node.
//!
//! Exposes the JSON-RPC endpoint and the proof-publication route on top of
//! [`botnet_kernel::BotNetKernel`], and provides [`client::PeerClient`] for the
//! outbound half of the protocol.

pub mod client;
pub mod node;
pub mod rate_limiter;
pub mod routes;
pub mod rpc;
pub mod server;
