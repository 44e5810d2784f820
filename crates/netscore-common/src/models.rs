//! Data models for the network score service.
//!
//! These types cross every boundary of the service: scorers submit
//! [`ScoredNetwork`] records, score caches receive them partitioned by
//! [`NetworkType`], and the active provider is described by a
//! [`ProviderDescriptor`] resolved fresh on every query.

use serde::{Deserialize, Serialize};

// ── Network identity ────────────────────────────────────────────────

/// Classification key used to partition scores and cache registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Wifi,
    Cellular,
    Ethernet,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Wifi => "wifi",
            NetworkType::Cellular => "cellular",
            NetworkType::Ethernet => "ethernet",
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wifi" => Ok(NetworkType::Wifi),
            "cellular" | "cell" => Ok(NetworkType::Cellular),
            "ethernet" => Ok(NetworkType::Ethernet),
            other => Err(format!("unknown network type: {other}")),
        }
    }
}

/// Identifies a single network within its type (SSID/BSSID, cell ID, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkKey {
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    pub id: String,
}

impl NetworkKey {
    pub fn new(network_type: NetworkType, id: impl Into<String>) -> Self {
        Self {
            network_type,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.network_type, self.id)
    }
}

/// A score record submitted by the active scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNetwork {
    pub key: NetworkKey,
    /// Quality score, 0 (unusable) to 100 (excellent).
    pub score: u8,
    #[serde(default)]
    pub metered: bool,
}

impl ScoredNetwork {
    pub fn new(key: NetworkKey, score: u8) -> Self {
        Self {
            key,
            score,
            metered: false,
        }
    }

    pub fn network_type(&self) -> NetworkType {
        self.key.network_type
    }
}

/// Which networks a score cache wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFilter {
    /// Every score of the registered type.
    #[default]
    None,
    /// Only the network the device is currently attached to.
    CurrentNetwork,
    /// Only networks seen in the latest scan.
    ScanResults,
}

impl CacheFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheFilter::None => "none",
            CacheFilter::CurrentNetwork => "current_network",
            CacheFilter::ScanResults => "scan_results",
        }
    }
}

// ── Provider identity ───────────────────────────────────────────────

/// Identity of a bindable recommendation service: `(package, component)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId {
    pub package: String,
    pub component: String,
}

impl EndpointId {
    pub fn new(package: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            component: component.into(),
        }
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.package, self.component)
    }
}

/// The provider currently authorized to supply scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub package_name: String,
    pub uid: u32,
    /// Component of the provider's recommendation service, if it has one.
    pub recommendation_service: Option<String>,
}

impl ProviderDescriptor {
    /// Endpoint to bind, or `None` when the provider exposes no service.
    pub fn endpoint(&self) -> Option<EndpointId> {
        self.recommendation_service
            .as_ref()
            .map(|component| EndpointId::new(self.package_name.clone(), component.clone()))
    }
}

// ── Recommendations ─────────────────────────────────────────────────

/// A Wi-Fi configuration as seen by the recommendation API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfiguration {
    pub ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bssid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default)]
    pub current_selected: Option<WifiConfiguration>,
    #[serde(default)]
    pub candidates: Vec<WifiConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub wifi_configuration: Option<WifiConfiguration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_type_round_trips_through_str() {
        for t in [NetworkType::Wifi, NetworkType::Cellular, NetworkType::Ethernet] {
            assert_eq!(t.as_str().parse::<NetworkType>().unwrap(), t);
        }
        assert_eq!("CELL".parse::<NetworkType>().unwrap(), NetworkType::Cellular);
        assert!("bluetooth".parse::<NetworkType>().is_err());
    }

    #[test]
    fn provider_without_service_has_no_endpoint() {
        let p = ProviderDescriptor {
            package_name: "com.example.scorer".into(),
            uid: 10042,
            recommendation_service: None,
        };
        assert!(p.endpoint().is_none());
    }

    #[test]
    fn endpoint_display_is_package_slash_component() {
        let p = ProviderDescriptor {
            package_name: "com.example.scorer".into(),
            uid: 10042,
            recommendation_service: Some("RecommendationService".into()),
        };
        let ep = p.endpoint().unwrap();
        assert_eq!(ep.to_string(), "com.example.scorer/RecommendationService");
    }

    #[test]
    fn scored_network_json_shape() {
        let json = r#"{"key":{"type":"wifi","id":"home-ap"},"score":80}"#;
        let n: ScoredNetwork = serde_json::from_str(json).unwrap();
        assert_eq!(n.network_type(), NetworkType::Wifi);
        assert_eq!(n.score, 80);
        assert!(!n.metered);
    }
}
