//! # Broadcast Dispatcher
//!
//! Fans an action out over a registry snapshot. Each listener set is
//! broadcast under its own per-type lock, so two broadcasts to the same
//! network type run one after the other while different types proceed
//! independently. A cache that errors or panics is logged and skipped; the
//! remaining caches and types still receive the action.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::ScoreError;
use crate::registry::{ListenerSet, Registration};

/// Delivery counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn total(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Invoke `action` once for every registration in `sets`.
pub fn broadcast<F>(sets: &[ListenerSet], mut action: F) -> BroadcastReport
where
    F: FnMut(&Registration) -> anyhow::Result<()>,
{
    let mut report = BroadcastReport::default();

    for set in sets {
        let _guard = set.lock_broadcast();
        for registration in set.iter() {
            match deliver(registration, &mut action) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(error = %e, "score cache broadcast failed");
                }
            }
        }
    }

    report
}

fn deliver<F>(registration: &Registration, action: &mut F) -> Result<(), ScoreError>
where
    F: FnMut(&Registration) -> anyhow::Result<()>,
{
    let outcome = catch_unwind(AssertUnwindSafe(|| action(registration)))
        .unwrap_or_else(|_| Err(anyhow::anyhow!("score cache panicked")));
    outcome.map_err(|source| ScoreError::ListenerUnreachable {
        cache: registration.cache.id().to_string(),
        network_type: registration.network_type,
        source,
    })
}
