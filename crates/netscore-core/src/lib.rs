//! # Network Score Service Core
//!
//! Arbitrates which external network scorer is authoritative, keeps a
//! single live link to its recommendation service, and relays incoming
//! scores to in-process score caches registered per network type.
//!
//! The pieces, leaves first:
//! - [`registry`]: per network type sets of registered score caches
//! - [`dispatch`]: fans an action out over a registry snapshot
//! - [`connection`]: zero-or-one link to the active scorer's endpoint
//! - [`monitor`]: package and settings watchers that trigger rebinds
//! - [`service`]: the orchestrator composing all of the above
//! - [`api`]: caller-checked facade over the orchestrator

pub mod api;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod scorer;
pub mod service;

pub use api::{Caller, NetworkScoreApi};
pub use config::ServiceConfig;
pub use connection::{ConnectionManager, ConnectionNotifier, ConnectionState, ServiceBinder};
pub use error::ScoreError;
pub use registry::{CacheRegistry, ScoreCache};
pub use scorer::{ConfiguredResolver, ScorerResolver};
pub use service::NetworkScoreService;
