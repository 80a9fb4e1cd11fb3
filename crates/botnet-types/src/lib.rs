//! Core types for the BotNet peer trust layer.
//!
//! This crate defines the shared data structures used by the persistence
//! layer, the kernel services and the JSON-RPC API: token tiers, friendship
//! and challenge records, the method table and the error taxonomy. It
//! contains no business logic.

pub mod challenge;
pub mod config;
pub mod error;
pub mod friendship;
pub mod method;
pub mod peer;
pub mod token;
