//! In-process score cache the agent registers for each configured
//! network type.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::Mutex;

use netscore_common::ids;
use netscore_common::models::{CacheFilter, NetworkKey, NetworkType, ScoredNetwork};
use netscore_core::ScoreCache;
use serde::Serialize;

#[derive(Default)]
struct CacheState {
    scores: BTreeMap<String, ScoredNetwork>,
    current: Option<NetworkKey>,
    scan_results: HashSet<NetworkKey>,
    updates: u64,
}

/// Summary of a cache, as reported by `caches.list`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub id: String,
    pub network_type: NetworkType,
    pub filter: CacheFilter,
    pub scores: Vec<ScoredNetwork>,
}

/// Latest score per network, restricted by the cache's [`CacheFilter`].
pub struct MemoryScoreCache {
    id: String,
    network_type: NetworkType,
    filter: CacheFilter,
    state: Mutex<CacheState>,
}

impl MemoryScoreCache {
    pub fn new(network_type: NetworkType, filter: CacheFilter) -> Self {
        Self {
            id: ids::cache_id(),
            network_type,
            filter,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn filter(&self) -> CacheFilter {
        self.filter
    }

    /// Network the device is attached to, used by [`CacheFilter::CurrentNetwork`].
    pub fn set_current_network(&self, key: Option<NetworkKey>) {
        self.lock().current = key;
    }

    /// Networks from the latest scan, used by [`CacheFilter::ScanResults`].
    pub fn set_scan_results(&self, keys: impl IntoIterator<Item = NetworkKey>) {
        self.lock().scan_results = keys.into_iter().collect();
    }

    pub fn score(&self, id: &str) -> Option<ScoredNetwork> {
        self.lock().scores.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            id: self.id.clone(),
            network_type: self.network_type,
            filter: self.filter,
            scores: self.lock().scores.values().cloned().collect(),
        }
    }
}

fn accepts(filter: CacheFilter, state: &CacheState, key: &NetworkKey) -> bool {
    match filter {
        CacheFilter::None => true,
        CacheFilter::CurrentNetwork => state.current.as_ref() == Some(key),
        CacheFilter::ScanResults => state.scan_results.contains(key),
    }
}

impl ScoreCache for MemoryScoreCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn update_scores(&self, networks: &[ScoredNetwork]) -> anyhow::Result<()> {
        let mut state = self.lock();
        state.updates += 1;
        let mut kept = 0usize;
        for network in networks {
            if network.network_type() != self.network_type {
                anyhow::bail!(
                    "{} score delivered to {} cache",
                    network.network_type(),
                    self.network_type
                );
            }
            if !accepts(self.filter, &state, &network.key) {
                continue;
            }
            state.scores.insert(network.key.id.clone(), network.clone());
            kept += 1;
        }
        tracing::trace!(cache = %self.id, kept, offered = networks.len(), "scores cached");
        Ok(())
    }

    fn clear_scores(&self) -> anyhow::Result<()> {
        self.lock().scores.clear();
        Ok(())
    }

    fn dump(&self, out: &mut dyn Write) -> anyhow::Result<()> {
        let state = self.lock();
        writeln!(
            out,
            "  {} networks, {} updates",
            state.scores.len(),
            state.updates
        )?;
        for network in state.scores.values() {
            writeln!(
                out,
                "  {} score={} metered={}",
                network.key, network.score, network.metered
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wifi(id: &str, score: u8) -> ScoredNetwork {
        ScoredNetwork::new(NetworkKey::new(NetworkType::Wifi, id), score)
    }

    #[test]
    fn keeps_latest_score_per_network() {
        let cache = MemoryScoreCache::new(NetworkType::Wifi, CacheFilter::None);
        cache.update_scores(&[wifi("a", 10), wifi("b", 20)]).unwrap();
        cache.update_scores(&[wifi("a", 90)]).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.score("a").unwrap().score, 90);

        cache.clear_scores().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn current_network_filter_drops_other_networks() {
        let cache = MemoryScoreCache::new(NetworkType::Wifi, CacheFilter::CurrentNetwork);
        cache.update_scores(&[wifi("a", 10)]).unwrap();
        assert!(cache.is_empty());

        cache.set_current_network(Some(NetworkKey::new(NetworkType::Wifi, "a")));
        cache.update_scores(&[wifi("a", 10), wifi("b", 20)]).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.score("b").is_none());
    }

    #[test]
    fn scan_results_filter() {
        let cache = MemoryScoreCache::new(NetworkType::Wifi, CacheFilter::ScanResults);
        cache.set_scan_results([
            NetworkKey::new(NetworkType::Wifi, "a"),
            NetworkKey::new(NetworkType::Wifi, "c"),
        ]);
        cache
            .update_scores(&[wifi("a", 1), wifi("b", 2), wifi("c", 3)])
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn rejects_scores_of_another_type() {
        let cache = MemoryScoreCache::new(NetworkType::Cellular, CacheFilter::None);
        assert!(cache.update_scores(&[wifi("a", 1)]).is_err());
    }

    #[test]
    fn dump_lists_cached_networks() {
        let cache = MemoryScoreCache::new(NetworkType::Wifi, CacheFilter::None);
        cache.update_scores(&[wifi("home", 75)]).unwrap();
        let mut out = Vec::new();
        cache.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("1 networks, 1 updates"));
        assert!(text.contains("score=75"));
    }
}
