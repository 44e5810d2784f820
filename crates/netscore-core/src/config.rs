use std::collections::HashSet;
use std::time::Duration;

use netscore_common::models::{CacheFilter, NetworkType};
use serde::Deserialize;

use crate::error::ScoreError;

pub const CONFIG_VERSION: u32 = 1;

/// First UID handed to providers that don't configure one.
const FIRST_APPLICATION_UID: u32 = 10_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfigInput {
    pub version: u32,
    pub recommendations_enabled: Option<bool>,
    pub providers: Vec<ProviderConfigInput>,
    pub caches: CachesConfigInput,
    pub binder: BinderConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfigInput {
    pub package: String,
    pub uid: Option<u32>,
    pub recommendation_service: Option<String>,
    pub service_addr: Option<String>,
    pub installed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CachesConfigInput {
    pub network_types: Vec<String>,
    pub filter: Option<CacheFilter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BinderConfigInput {
    pub connect_timeout_ms: Option<u64>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

/// A package that may act as the network scorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub package: String,
    pub uid: u32,
    pub recommendation_service: Option<String>,
    /// Where the agent's binder reaches the recommendation service.
    pub service_addr: Option<String>,
    pub installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderConfig {
    pub connect_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub version: u32,
    pub recommendations_enabled: bool,
    pub providers: Vec<ProviderConfig>,
    /// Network types the agent registers a memory cache for at startup.
    pub cache_types: Vec<NetworkType>,
    pub cache_filter: CacheFilter,
    pub binder: BinderConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            recommendations_enabled: true,
            providers: Vec::new(),
            cache_types: Vec::new(),
            cache_filter: CacheFilter::None,
            binder: BinderConfig::default(),
        }
    }
}

impl ServiceConfigInput {
    pub fn resolve(self) -> Result<ServiceConfig, ScoreError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ScoreError::Config(format!(
                "unsupported config version {}",
                version
            )));
        }

        let defaults = BinderConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        let initial_backoff = ms(self.binder.initial_backoff_ms, defaults.initial_backoff);
        let binder = BinderConfig {
            connect_timeout: ms(self.binder.connect_timeout_ms, defaults.connect_timeout),
            initial_backoff,
            max_backoff: ms(self.binder.max_backoff_ms, defaults.max_backoff).max(initial_backoff),
        };

        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for (idx, p) in self.providers.into_iter().enumerate() {
            let package = p.package.trim().to_string();
            if package.is_empty() || !seen.insert(package.clone()) {
                continue;
            }
            kept.push((idx, package, p));
        }

        // Explicit uids are claimed first; defaults skip over them.
        let mut taken = HashSet::new();
        for (_, package, p) in &kept {
            if let Some(uid) = p.uid
                && !taken.insert(uid)
            {
                return Err(ScoreError::Config(format!(
                    "uid {uid} of provider {package} is already in use"
                )));
            }
        }

        let mut providers = Vec::new();
        for (idx, package, p) in kept {
            let uid = match p.uid {
                Some(uid) => uid,
                None => {
                    let mut uid = FIRST_APPLICATION_UID + idx as u32;
                    while !taken.insert(uid) {
                        uid += 1;
                    }
                    uid
                }
            };
            providers.push(ProviderConfig {
                package,
                uid,
                recommendation_service: non_blank(p.recommendation_service),
                service_addr: non_blank(p.service_addr),
                installed: p.installed.unwrap_or(true),
            });
        }

        let mut cache_types = Vec::new();
        for raw in self.caches.network_types {
            let t: NetworkType = raw.parse().map_err(ScoreError::Config)?;
            if !cache_types.contains(&t) {
                cache_types.push(t);
            }
        }

        Ok(ServiceConfig {
            version,
            recommendations_enabled: self.recommendations_enabled.unwrap_or(true),
            providers,
            cache_types,
            cache_filter: self.caches.filter.unwrap_or_default(),
            binder,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl ServiceConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ScoreError> {
        if input.trim().is_empty() {
            return Ok(ServiceConfig::default());
        }
        let parsed: ServiceConfigInput = toml::from_str(input)
            .map_err(|e| ScoreError::Config(format!("invalid config TOML: {}", e)))?;
        parsed.resolve()
    }

    pub fn provider(&self, package: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.package == package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            version = 1
            recommendations_enabled = false

            [[providers]]
            package = "com.example.scorer"
            uid = 10100
            recommendation_service = "RecommendationService"
            service_addr = "127.0.0.1:7400"

            [[providers]]
            package = "com.example.backup"
            installed = false

            [caches]
            network_types = ["wifi", "cell"]
            filter = "scan_results"

            [binder]
            connect_timeout_ms = 250
            initial_backoff_ms = 100
            max_backoff_ms = 2000
        "#;

        let cfg = ServiceConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert!(!cfg.recommendations_enabled);
        assert_eq!(cfg.providers.len(), 2);
        assert_eq!(cfg.providers[0].uid, 10100);
        assert_eq!(
            cfg.providers[0].recommendation_service.as_deref(),
            Some("RecommendationService")
        );
        assert_eq!(cfg.providers[1].uid, 10_001);
        assert!(!cfg.providers[1].installed);
        assert!(cfg.providers[1].recommendation_service.is_none());
        assert_eq!(
            cfg.cache_types,
            vec![NetworkType::Wifi, NetworkType::Cellular]
        );
        assert_eq!(cfg.cache_filter, CacheFilter::ScanResults);
        assert_eq!(cfg.binder.connect_timeout, Duration::from_millis(250));
        assert_eq!(cfg.binder.max_backoff, Duration::from_secs(2));
    }

    #[test]
    fn parse_toml_config_dedup() {
        let toml = r#"
            [[providers]]
            package = "a"
            recommendation_service = "First"
            [[providers]]
            package = " a "
            recommendation_service = "Second"
            [[providers]]
            package = "  "
        "#;
        let cfg = ServiceConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.providers[0].recommendation_service.as_deref(), Some("First"));
    }

    #[test]
    fn default_uids_skip_explicit_ones() {
        let toml = r#"
            [[providers]]
            package = "a"
            [[providers]]
            package = "b"
            uid = 10000
        "#;
        let cfg = ServiceConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.provider("b").unwrap().uid, 10_000);
        assert_eq!(cfg.provider("a").unwrap().uid, 10_001);

        let clash = r#"
            [[providers]]
            package = "a"
            uid = 1
            [[providers]]
            package = "b"
            uid = 1
        "#;
        assert!(matches!(
            ServiceConfig::from_toml_str(clash),
            Err(ScoreError::Config(_))
        ));
    }

    #[test]
    fn empty_input_is_default() {
        let cfg = ServiceConfig::from_toml_str("  \n").unwrap();
        assert!(cfg.recommendations_enabled);
        assert!(cfg.providers.is_empty());
        assert_eq!(cfg.cache_filter, CacheFilter::None);
        assert_eq!(cfg.binder, BinderConfig::default());
    }

    #[test]
    fn rejects_unknown_version_and_network_type() {
        assert!(matches!(
            ServiceConfig::from_toml_str("version = 7"),
            Err(ScoreError::Config(_))
        ));
        assert!(matches!(
            ServiceConfig::from_toml_str("[caches]\nnetwork_types = [\"zigbee\"]"),
            Err(ScoreError::Config(_))
        ));
    }
}
