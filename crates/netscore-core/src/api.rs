//! Caller-checked public surface.
//!
//! Every operation verifies the [`Caller`] before delegating to the
//! [`NetworkScoreService`]. The service itself trusts its callers.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use netscore_common::models::{
    CacheFilter, NetworkKey, NetworkType, RecommendationRequest, RecommendationResult,
    ScoredNetwork,
};
use netscore_common::protocol::{CallerInfo, Privilege};

use crate::error::ScoreError;
use crate::registry::ScoreCache;
use crate::service::NetworkScoreService;

/// UID of the system itself.
pub const SYSTEM_UID: u32 = 1000;

/// Identity and capabilities of whoever invoked an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    privileges: HashSet<Privilege>,
}

impl Caller {
    pub fn new(uid: u32, privileges: impl IntoIterator<Item = Privilege>) -> Self {
        Self {
            uid,
            privileges: privileges.into_iter().collect(),
        }
    }

    /// The system, holding every privilege.
    pub fn system() -> Self {
        Self::new(
            SYSTEM_UID,
            [
                Privilege::BroadcastNetworkPrivileged,
                Privilege::ScoreNetworks,
                Privilege::Dump,
            ],
        )
    }

    pub fn has(&self, privilege: Privilege) -> bool {
        self.privileges.contains(&privilege)
    }
}

impl From<&CallerInfo> for Caller {
    fn from(info: &CallerInfo) -> Self {
        Caller::new(info.uid, info.privileges.iter().copied())
    }
}

/// Public operations of the network score service.
#[derive(Clone)]
pub struct NetworkScoreApi {
    service: NetworkScoreService,
}

impl NetworkScoreApi {
    pub fn new(service: NetworkScoreService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &NetworkScoreService {
        &self.service
    }

    fn enforce(&self, caller: &Caller, privilege: Privilege) -> Result<(), ScoreError> {
        if caller.has(privilege) {
            Ok(())
        } else {
            Err(ScoreError::PermissionDenied(format!(
                "uid {} lacks {:?}",
                caller.uid, privilege
            )))
        }
    }

    fn enforce_scorer_or_privileged(&self, caller: &Caller) -> Result<(), ScoreError> {
        if self.service.is_caller_active_scorer(caller.uid)
            || caller.has(Privilege::BroadcastNetworkPrivileged)
        {
            Ok(())
        } else {
            Err(ScoreError::PermissionDenied(format!(
                "uid {} is neither the active scorer nor the scorer manager",
                caller.uid
            )))
        }
    }

    pub fn update_scores(
        &self,
        caller: &Caller,
        networks: &[ScoredNetwork],
    ) -> Result<bool, ScoreError> {
        if !self.service.is_caller_active_scorer(caller.uid) {
            return Err(ScoreError::PermissionDenied(format!(
                "uid {} is not the active scorer",
                caller.uid
            )));
        }
        Ok(self.service.update_scores(networks))
    }

    pub fn clear_scores(&self, caller: &Caller) -> Result<bool, ScoreError> {
        self.enforce_scorer_or_privileged(caller)?;
        Ok(self.service.clear_scores())
    }

    pub fn set_active_scorer(&self, caller: &Caller, package: &str) -> Result<bool, ScoreError> {
        self.enforce(caller, Privilege::ScoreNetworks)?;
        Ok(self.service.set_active_scorer(package))
    }

    pub fn disable_scoring(&self, caller: &Caller) -> Result<(), ScoreError> {
        self.enforce_scorer_or_privileged(caller)?;
        self.service.disable_scoring();
        Ok(())
    }

    pub fn register_network_score_cache(
        &self,
        caller: &Caller,
        network_type: NetworkType,
        cache: Arc<dyn ScoreCache>,
        filter: CacheFilter,
    ) -> Result<(), ScoreError> {
        self.enforce(caller, Privilege::BroadcastNetworkPrivileged)?;
        self.service.register_score_cache(network_type, cache, filter);
        Ok(())
    }

    pub fn unregister_network_score_cache(
        &self,
        caller: &Caller,
        network_type: NetworkType,
        cache_id: &str,
    ) -> Result<(), ScoreError> {
        self.enforce(caller, Privilege::BroadcastNetworkPrivileged)?;
        self.service.unregister_score_cache(network_type, cache_id);
        Ok(())
    }

    pub fn request_recommendation(
        &self,
        request: Option<&RecommendationRequest>,
    ) -> RecommendationResult {
        self.service.request_recommendation(request)
    }

    pub fn request_scores(&self, networks: &[NetworkKey]) -> Result<bool, ScoreError> {
        self.service.request_scores(networks)
    }

    pub fn dump(&self, caller: &Caller, out: &mut dyn Write) -> Result<(), ScoreError> {
        self.enforce(caller, Privilege::Dump)?;
        self.service.dump(out)?;
        Ok(())
    }
}
