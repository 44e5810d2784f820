//! Shared types for the network score service.
//!
//! This crate contains:
//! - **Data models**: network keys, scored networks, provider and endpoint identity
//! - **Protocol messages**: JSON envelopes exchanged over the agent control socket
//! - **ID generation**: prefixed UUIDv7 helpers (`nsc_`, `msg_`)

pub mod ids;
pub mod models;
pub mod protocol;
