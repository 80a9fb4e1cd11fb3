//! Trust services for the BotNet peer protocol.
//!
//! The kernel owns the token lifecycle, the friendship state machine, domain
//! challenges and the authentication gate, all over one SQLite substrate.
//! Transport concerns (JSON-RPC, rate limiting) live in `botnet-api`.

pub mod auth;
pub mod challenge;
pub mod config;
pub mod error;
pub mod friendship;
pub mod kernel;
pub mod proofs;
pub mod sweeper;
pub mod tokens;

pub use kernel::BotNetKernel;
