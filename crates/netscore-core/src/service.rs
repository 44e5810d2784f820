//! # Network Score Service
//!
//! Top-level coordinator. On every trigger it asks the [`ScorerResolver`]
//! for the current active scorer and makes the [`ConnectionManager`]
//! reflect the answer; score ingestion and cache registration compose the
//! [`CacheRegistry`] with the broadcast dispatcher.
//!
//! Lifecycle hooks, in the order a host calls them:
//! 1. [`NetworkScoreService::system_ready`] registers the change monitors.
//! 2. [`NetworkScoreService::system_running`] performs the first bind.
//! 3. [`NetworkScoreService::on_user_unlocked`] re-registers the package
//!    monitor and re-evaluates the binding.
//!
//! [`NetworkScoreService::shutdown`] tears everything down.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Weak};

use netscore_common::models::{
    CacheFilter, NetworkKey, NetworkType, ProviderDescriptor, RecommendationRequest,
    RecommendationResult, ScoredNetwork,
};
use netscore_common::protocol::PackageEvent;

use crate::connection::{ConnectionManager, ConnectionState, ServiceBinder};
use crate::dispatch::{self, BroadcastReport};
use crate::error::ScoreError;
use crate::monitor::{BindingEvaluator, MonitorSet};
use crate::registry::{CacheRegistry, RegisterOutcome, ScoreCache, UnregisterOutcome};
use crate::scorer::ScorerResolver;

/// Handle to the service. Cheap to clone; all clones share one instance.
#[derive(Clone)]
pub struct NetworkScoreService {
    inner: Arc<Inner>,
}

struct Inner {
    resolver: Arc<dyn ScorerResolver>,
    registry: CacheRegistry,
    connection: ConnectionManager,
    monitors: MonitorSet,
}

impl NetworkScoreService {
    pub fn new(resolver: Arc<dyn ScorerResolver>, binder: Arc<dyn ServiceBinder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                registry: CacheRegistry::new(),
                connection: ConnectionManager::new(binder),
                monitors: MonitorSet::new(),
            }),
        }
    }

    fn evaluator(&self) -> Weak<dyn BindingEvaluator> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        weak
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Register the change monitors. Nothing is watched when no package
    /// could ever become the scorer.
    pub fn system_ready(&self) {
        tracing::debug!("system ready");
        let candidates = self.inner.resolver.candidate_packages();
        if candidates.is_empty() {
            tracing::info!("no candidate scorer packages, monitors not registered");
            return;
        }
        self.inner
            .monitors
            .register_package_monitor(candidates, self.evaluator());
        self.inner
            .monitors
            .register_settings_observer(self.evaluator());
    }

    /// Perform the initial bind evaluation.
    pub fn system_running(&self) {
        tracing::debug!("system running");
        self.inner.bind_to_active_scorer();
    }

    pub fn on_user_unlocked(&self, user_id: u32) {
        tracing::debug!(user_id, "user unlocked");
        let candidates = self.inner.resolver.candidate_packages();
        self.inner
            .monitors
            .register_package_monitor(candidates, self.evaluator());
        self.inner.bind_to_active_scorer();
    }

    /// Unbind, stop the connection worker and drop the monitors.
    pub fn shutdown(&self) {
        self.inner.monitors.clear();
        self.inner.connection.shutdown();
    }

    // ─── Triggers ───────────────────────────────────────────────────────

    /// Route a package event through the registered package monitor.
    pub fn handle_package_event(&self, event: &PackageEvent) -> usize {
        self.inner.monitors.dispatch_package_event(event)
    }

    /// Route a setting change through the registered settings observer.
    pub fn handle_setting_changed(&self) -> bool {
        self.inner.monitors.dispatch_setting_change()
    }

    pub fn on_candidate_package_event(&self, package: &str, force_disconnect: bool) {
        self.inner.on_candidate_package_event(package, force_disconnect);
    }

    pub fn on_setting_changed(&self) {
        self.inner.on_setting_changed();
    }

    // ─── Scores ─────────────────────────────────────────────────────────

    /// Deliver `networks` to the caches registered for their types.
    ///
    /// Types nobody listens to are dropped. Cache failures never reach the
    /// caller. The caller must already be verified as the active scorer.
    pub fn update_scores(&self, networks: &[ScoredNetwork]) -> bool {
        let mut by_type: BTreeMap<NetworkType, Vec<ScoredNetwork>> = BTreeMap::new();
        for network in networks {
            by_type
                .entry(network.network_type())
                .or_default()
                .push(network.clone());
        }

        for (network_type, batch) in by_type {
            let Some(set) = self.inner.registry.snapshot(network_type) else {
                tracing::trace!(
                    %network_type,
                    count = batch.len(),
                    "no score cache registered, discarding"
                );
                continue;
            };
            let report = dispatch::broadcast(&[set], |r| r.cache.update_scores(&batch));
            tracing::trace!(
                %network_type,
                delivered = report.delivered,
                failed = report.failed,
                "scores updated"
            );
        }
        true
    }

    /// Tell every registered cache to drop its scores.
    pub fn clear_scores(&self) -> bool {
        self.inner.clear_all();
        true
    }

    pub fn register_score_cache(
        &self,
        network_type: NetworkType,
        cache: Arc<dyn ScoreCache>,
        filter: CacheFilter,
    ) -> RegisterOutcome {
        let id = cache.id().to_string();
        let outcome = self.inner.registry.register(network_type, cache, filter);
        match outcome {
            RegisterOutcome::Registered => {
                tracing::debug!(
                    cache = %id,
                    %network_type,
                    filter = filter.as_str(),
                    "score cache registered"
                )
            }
            RegisterOutcome::AlreadyRegistered => {
                tracing::debug!(cache = %id, %network_type, "score cache already registered")
            }
        }
        outcome
    }

    pub fn unregister_score_cache(
        &self,
        network_type: NetworkType,
        cache_id: &str,
    ) -> UnregisterOutcome {
        let outcome = self.inner.registry.unregister(network_type, cache_id);
        if outcome == UnregisterOutcome::NotFound {
            tracing::debug!(cache = %cache_id, %network_type, "unable to unregister score cache");
        }
        outcome
    }

    // ─── Not implemented ────────────────────────────────────────────────

    /// Recommendations are not computed yet: the result echoes the
    /// request's current selection.
    pub fn request_recommendation(
        &self,
        request: Option<&RecommendationRequest>,
    ) -> RecommendationResult {
        tracing::debug!("recommendation requested; echoing current selection");
        RecommendationResult {
            wifi_configuration: request.and_then(|r| r.current_selected.clone()),
        }
    }

    /// On-demand scoring is not supported.
    pub fn request_scores(&self, networks: &[NetworkKey]) -> Result<bool, ScoreError> {
        tracing::debug!(count = networks.len(), "score request rejected");
        Err(ScoreError::UnsupportedOperation("requesting scores"))
    }

    /// Scorers are selected by the resolver, never set directly.
    pub fn set_active_scorer(&self, package: &str) -> bool {
        tracing::debug!(package, "ignoring request to set active scorer");
        false
    }

    /// Accepted for compatibility; scoring stays governed by the setting.
    pub fn disable_scoring(&self) {
        tracing::debug!("disable scoring requested");
    }

    // ─── Introspection ──────────────────────────────────────────────────

    pub fn active_scorer(&self) -> Option<ProviderDescriptor> {
        self.inner.resolver.active_scorer()
    }

    pub fn is_caller_active_scorer(&self, uid: u32) -> bool {
        self.inner.resolver.is_caller_active_scorer(uid)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.inner.registry
    }

    pub fn watched_packages(&self) -> Vec<String> {
        self.inner.monitors.watched_packages()
    }

    pub fn has_settings_observer(&self) -> bool {
        self.inner.monitors.has_settings_observer()
    }

    /// Write a diagnostic snapshot: the active scorer, every registered
    /// cache's own dump, and the connection state. Read-only.
    pub fn dump(&self, out: &mut dyn Write) -> std::io::Result<()> {
        match self.inner.resolver.active_scorer() {
            Some(scorer) => writeln!(out, "Current scorer: {}", scorer.package_name)?,
            None => writeln!(out, "Scoring is disabled.")?,
        }

        // Sink failures are kept apart from cache failures and reported.
        let mut sink_error: Option<std::io::Error> = None;
        let sets = self.inner.registry.snapshot_all();
        dispatch::broadcast(&sets, |r| {
            if sink_error.is_some() {
                return Ok(());
            }
            let header = writeln!(
                out,
                "ScoreCache {} [{}] filter={}",
                r.cache.id(),
                r.network_type,
                r.filter.as_str()
            );
            let written = header.and_then(|()| match r.cache.dump(&mut *out) {
                Ok(()) => Ok(()),
                Err(e) => writeln!(out, "Failed to dump score cache: {e}"),
            });
            if let Err(e) = written {
                sink_error = Some(e);
            }
            Ok(())
        });
        if let Some(e) = sink_error {
            return Err(e);
        }

        self.inner.connection.dump(out)?;
        out.flush()
    }
}

impl Inner {
    fn bind_to_active_scorer(&self) {
        let scorer = self.resolver.active_scorer();
        self.bind_if_needed(scorer.as_ref());
    }

    fn bind_if_needed(&self, scorer: Option<&ProviderDescriptor>) {
        let Some(endpoint) = scorer.and_then(ProviderDescriptor::endpoint) else {
            self.unbind_if_needed();
            return;
        };

        // A different endpoint means a different authority: drop its scores.
        if self
            .connection
            .state()
            .endpoint()
            .is_some_and(|current| *current != endpoint)
        {
            self.unbind_if_needed();
        }

        // Failure is logged by the manager; the next trigger retries.
        let _ = self.connection.connect(&endpoint);
    }

    fn unbind_if_needed(&self) {
        self.connection.disconnect();
        self.clear_all();
    }

    fn clear_all(&self) -> BroadcastReport {
        let sets = self.registry.snapshot_all();
        dispatch::broadcast(&sets, |r| r.cache.clear_scores())
    }
}

impl BindingEvaluator for Inner {
    fn on_candidate_package_event(&self, package: &str, force_disconnect: bool) {
        if !self
            .resolver
            .candidate_packages()
            .iter()
            .any(|p| p == package)
        {
            return;
        }

        match self.resolver.active_scorer() {
            None => {
                tracing::debug!(package, "no active scorer after package change");
                self.unbind_if_needed();
            }
            Some(active) if active.package_name == package => {
                tracing::debug!(
                    package,
                    force_disconnect,
                    "possible change to the active scorer"
                );
                if force_disconnect {
                    self.unbind_if_needed();
                }
                self.bind_if_needed(Some(&active));
            }
            Some(active) => {
                // Another candidate may have taken over from a removed scorer.
                self.bind_if_needed(Some(&active));
            }
        }
    }

    fn on_setting_changed(&self) {
        self.bind_to_active_scorer();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use netscore_common::models::WifiConfiguration;

    use super::*;
    use crate::connection::ConnectionNotifier;

    struct FixedResolver(Mutex<Option<ProviderDescriptor>>);

    impl ScorerResolver for FixedResolver {
        fn active_scorer(&self) -> Option<ProviderDescriptor> {
            self.0.lock().unwrap().clone()
        }
        fn candidate_packages(&self) -> Vec<String> {
            Vec::new()
        }
    }

    struct NoopBinder;

    impl ServiceBinder for NoopBinder {
        fn bind(
            &self,
            _: &netscore_common::models::EndpointId,
            _: ConnectionNotifier,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        fn unbind(&self, _: &netscore_common::models::EndpointId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn service(active: Option<ProviderDescriptor>) -> NetworkScoreService {
        NetworkScoreService::new(
            Arc::new(FixedResolver(Mutex::new(active))),
            Arc::new(NoopBinder),
        )
    }

    #[test]
    fn recommendation_echoes_current_selection() {
        let svc = service(None);
        let req = RecommendationRequest {
            current_selected: Some(WifiConfiguration {
                ssid: "home".into(),
                bssid: None,
            }),
            candidates: Vec::new(),
        };
        let res = svc.request_recommendation(Some(&req));
        assert_eq!(res.wifi_configuration, req.current_selected);
        assert_eq!(svc.request_recommendation(None), RecommendationResult::default());
    }

    #[test]
    fn request_scores_is_unsupported() {
        let svc = service(None);
        assert!(matches!(
            svc.request_scores(&[]),
            Err(ScoreError::UnsupportedOperation(_))
        ));
        assert!(!svc.set_active_scorer("anything"));
    }

    #[test]
    fn no_candidates_registers_no_monitors() {
        let svc = service(None);
        svc.system_ready();
        assert!(svc.watched_packages().is_empty());
        assert!(!svc.has_settings_observer());
    }

    #[test]
    fn provider_without_service_stays_unbound() {
        let svc = service(Some(ProviderDescriptor {
            package_name: "p".into(),
            uid: 10001,
            recommendation_service: None,
        }));
        svc.system_running();
        assert_eq!(svc.connection_state(), ConnectionState::Unbound);
    }

    #[test]
    fn dump_when_disabled() {
        let svc = service(None);
        let mut out = Vec::new();
        svc.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Scoring is disabled.\n"));
        assert!(text.contains("ScorerConnection: none"));
    }
}
