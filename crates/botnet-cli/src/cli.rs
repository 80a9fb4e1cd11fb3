//! Clap CLI definitions for the BotNet node.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// BotNet, the trust layer for peer-to-peer bot networks.
#[derive(Parser)]
#[command(name = "botnet", version, about = "Run and manage a BotNet node")]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config file.
    Init {
        /// Identifier this node presents to peers.
        #[arg(long)]
        node_id: String,
        /// Overwrite an existing config.
        #[arg(long)]
        force: bool,
    },
    /// Start the node (RPC server and expiry sweeps).
    Start,
    /// Show config and trust-state counters.
    Status,
    /// List friendships.
    Friends {
        /// Only show this state (requested, pending, active, rejected, terminated).
        #[arg(long)]
        state: Option<String>,
    },
    /// Ask a peer to be friends.
    Request {
        /// Peer identifier.
        peer: String,
        /// Peer RPC endpoint, e.g. https://botnet.example.com/rpc
        #[arg(long)]
        endpoint: String,
    },
    /// Poll a friendship request and import credentials once accepted.
    Poll {
        peer: String,
        #[arg(long)]
        endpoint: String,
        /// Negotiation token returned by `request`.
        #[arg(long)]
        token: String,
    },
    /// Answer a peer's domain challenge, serving the proof on the listen address.
    Prove {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        token: String,
    },
    /// Decline a pending request.
    Decline { peer: String },
    /// End an active friendship and revoke its credentials.
    Unfriend { peer: String },
    /// Run one expiry sweep now.
    Sweep,
}
