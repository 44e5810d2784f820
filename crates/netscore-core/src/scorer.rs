//! Resolution of the active network scorer.
//!
//! The service never caches the answer: every trigger asks the resolver
//! again and acts on a fresh [`ProviderDescriptor`].

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use netscore_common::models::ProviderDescriptor;

use crate::config::{ProviderConfig, ServiceConfig};

/// Answers "who is the scorer right now?".
pub trait ScorerResolver: Send + Sync {
    /// The provider currently authorized to supply scores, if any.
    fn active_scorer(&self) -> Option<ProviderDescriptor>;
    /// Every package that could become the active scorer.
    fn candidate_packages(&self) -> Vec<String>;
    fn is_caller_active_scorer(&self, uid: u32) -> bool {
        self.active_scorer().is_some_and(|s| s.uid == uid)
    }
}

struct ResolverState {
    installed: HashSet<String>,
    recommendations_enabled: bool,
}

/// Resolver backed by the configured provider list.
///
/// The active scorer is the first installed provider, in config order,
/// that exposes a recommendation service. Nothing is active while
/// recommendations are disabled.
pub struct ConfiguredResolver {
    providers: Vec<ProviderConfig>,
    state: Mutex<ResolverState>,
}

impl ConfiguredResolver {
    pub fn new(config: &ServiceConfig) -> Self {
        let installed = config
            .providers
            .iter()
            .filter(|p| p.installed)
            .map(|p| p.package.clone())
            .collect();
        Self {
            providers: config.providers.clone(),
            state: Mutex::new(ResolverState {
                installed,
                recommendations_enabled: config.recommendations_enabled,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mirror a package install or removal. Unknown packages are ignored.
    pub fn set_installed(&self, package: &str, installed: bool) {
        if !self.providers.iter().any(|p| p.package == package) {
            return;
        }
        let mut state = self.lock();
        if installed {
            state.installed.insert(package.to_string());
        } else {
            state.installed.remove(package);
        }
    }

    pub fn set_recommendations_enabled(&self, enabled: bool) {
        self.lock().recommendations_enabled = enabled;
    }

    pub fn recommendations_enabled(&self) -> bool {
        self.lock().recommendations_enabled
    }
}

impl ScorerResolver for ConfiguredResolver {
    fn active_scorer(&self) -> Option<ProviderDescriptor> {
        let state = self.lock();
        if !state.recommendations_enabled {
            return None;
        }
        self.providers
            .iter()
            .find(|p| p.recommendation_service.is_some() && state.installed.contains(&p.package))
            .map(|p| ProviderDescriptor {
                package_name: p.package.clone(),
                uid: p.uid,
                recommendation_service: p.recommendation_service.clone(),
            })
    }

    fn candidate_packages(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.package.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ConfiguredResolver {
        let cfg = ServiceConfig::from_toml_str(
            r#"
            [[providers]]
            package = "no.service"
            [[providers]]
            package = "primary"
            uid = 10100
            recommendation_service = "Svc"
            [[providers]]
            package = "fallback"
            uid = 10200
            recommendation_service = "Svc"
            "#,
        )
        .unwrap();
        ConfiguredResolver::new(&cfg)
    }

    #[test]
    fn first_installed_provider_with_service_wins() {
        let r = resolver();
        assert_eq!(r.active_scorer().unwrap().package_name, "primary");

        r.set_installed("primary", false);
        assert_eq!(r.active_scorer().unwrap().package_name, "fallback");
        assert!(r.is_caller_active_scorer(10200));
        assert!(!r.is_caller_active_scorer(10100));
    }

    #[test]
    fn disabled_setting_hides_scorer() {
        let r = resolver();
        r.set_recommendations_enabled(false);
        assert!(r.active_scorer().is_none());
        assert!(!r.is_caller_active_scorer(10100));
    }

    #[test]
    fn unknown_packages_are_not_tracked() {
        let r = resolver();
        r.set_installed("stranger", true);
        assert_eq!(
            r.candidate_packages(),
            vec!["no.service", "primary", "fallback"]
        );
    }
}
