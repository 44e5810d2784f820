//! Control socket messages between local clients and the score agent.
//!
//! All messages are newline-delimited JSON and follow a common envelope
//! format. Every request envelope is answered by exactly one envelope whose
//! type is the request type with a `.response` suffix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;
use crate::models::{NetworkKey, ScoredNetwork};

// ── Envelope ────────────────────────────────────────────────────────

/// The outer envelope for all control socket messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message ID (`msg_<uuid7>`, time-ordered).
    pub id: String,
    /// Message type (dotted namespace, e.g. "scores.update").
    #[serde(rename = "type")]
    pub msg_type: String,
    /// ISO 8601 timestamp.
    pub ts: DateTime<Utc>,
    /// Type-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create a new envelope with a fresh message ID and current timestamp.
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            id: ids::message_id(),
            msg_type: msg_type.into(),
            ts: Utc::now(),
            payload: serde_json::to_value(payload).expect("payload serialization"),
        }
    }

    /// Parse the payload into a concrete type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Build the response envelope for this request.
    pub fn respond(&self, payload: ResponsePayload) -> Envelope {
        Envelope::new(format!("{}.response", self.msg_type), payload)
    }
}

// ── Message types ───────────────────────────────────────────────────

pub const PACKAGE_EVENT: &str = "package.event";
pub const SETTING_CHANGED: &str = "setting.changed";
pub const USER_UNLOCKED: &str = "user.unlocked";
pub const SCORES_UPDATE: &str = "scores.update";
pub const SCORES_CLEAR: &str = "scores.clear";
pub const SCORES_REQUEST: &str = "scores.request";
pub const RECOMMENDATION_REQUEST: &str = "recommendation.request";
pub const DUMP: &str = "dump";
pub const CACHES_LIST: &str = "caches.list";
pub const NETWORK_CURRENT: &str = "network.current";
pub const NETWORK_SCAN: &str = "network.scan";

// ── Callers ─────────────────────────────────────────────────────────

/// A capability a caller may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// May register score caches and flush scores.
    BroadcastNetworkPrivileged,
    /// May act as (or select) a network scorer.
    ScoreNetworks,
    /// May read diagnostic dumps.
    Dump,
}

/// Caller identity as asserted by the socket client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    pub uid: u32,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
}

// ── Client → Agent ──────────────────────────────────────────────────

/// A change to an installed package that may affect the active scorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageEvent {
    Added { package: String },
    Removed { package: String },
    Modified { package: String },
    UpdateFinished { package: String },
    /// `executed` is false when the stop was only queried, not performed.
    ForceStopped {
        packages: Vec<String>,
        executed: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingChangedPayload {
    pub recommendations_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUnlockedPayload {
    pub user_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoresUpdatePayload {
    pub caller: CallerInfo,
    pub networks: Vec<ScoredNetwork>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoresRequestPayload {
    pub networks: Vec<NetworkKey>,
}

/// Payload for requests that only carry the caller (clear, dump).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerPayload {
    pub caller: CallerInfo,
}

/// The network the device is attached to, or none when detached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCurrentPayload {
    #[serde(default)]
    pub network: Option<NetworkKey>,
}

/// Networks seen in the latest scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkScanPayload {
    pub networks: Vec<NetworkKey>,
}

// ── Agent → Client ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl ResponsePayload {
    pub fn ok(request_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            error: None,
            data,
        }
    }

    pub fn err(request_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            error: Some(error.to_string()),
            data: serde_json::Value::Null,
        }
    }
}
