//! Prefixed ID generation.
//!
//! IDs use a `prefix_` followed by a UUIDv7 (time-ordered), so a score
//! cache or message can be told apart at a glance in logs and dumps.

use uuid::Uuid;

/// Generate a prefixed ID using UUIDv7.
fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a score cache ID: `nsc_<uuid7>`
pub fn cache_id() -> String {
    prefixed_id("nsc")
}

/// Generate a control message ID: `msg_<uuid7>`
pub fn message_id() -> String {
    prefixed_id("msg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        assert!(cache_id().starts_with("nsc_"));
        assert!(message_id().starts_with("msg_"));
    }

    #[test]
    fn message_ids_increase() {
        let ids: Vec<String> = (0..8).map(|_| message_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "{ids:?}");
    }
}
