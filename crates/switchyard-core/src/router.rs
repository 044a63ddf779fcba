use std::collections::HashSet;
use std::sync::Arc;

use switchyard_provider_core::{
    CanonicalRequest, Candidate, CandidateOrdering, HealthSnapshot, ProviderRegistry,
    RoutingPolicy,
};
use tracing::debug;

use crate::error::{DispatchError, Exclusion, ExclusionReason};

/// Orders candidates for one request. Reads health, never changes it.
#[derive(Clone)]
pub struct Router {
    registry: Arc<ProviderRegistry>,
}

impl Router {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Primary first, then fallbacks; duplicates dropped, unusable providers
    /// filtered out. Fails with `NoRouteAvailable` when nothing is left.
    pub fn route(
        &self,
        request: &CanonicalRequest,
        policy: &RoutingPolicy,
        health: &HealthSnapshot,
    ) -> Result<Vec<Candidate>, DispatchError> {
        let ordered = ordered_candidates(request, policy);
        let mut routed = Vec::with_capacity(ordered.len());
        let mut exclusions = Vec::new();

        for candidate in ordered {
            match self.exclusion_reason(request, &candidate, health) {
                Some(reason) => {
                    debug!(
                        request_id = %request.id,
                        candidate = %candidate,
                        reason = %reason,
                        "candidate excluded"
                    );
                    exclusions.push(Exclusion { candidate, reason });
                }
                None => routed.push(candidate),
            }
        }

        if routed.is_empty() {
            return Err(DispatchError::NoRouteAvailable { exclusions });
        }
        debug!(
            request_id = %request.id,
            candidates = routed.len(),
            excluded = exclusions.len(),
            "route resolved"
        );
        Ok(routed)
    }

    fn exclusion_reason(
        &self,
        request: &CanonicalRequest,
        candidate: &Candidate,
        health: &HealthSnapshot,
    ) -> Option<ExclusionReason> {
        let Some(descriptor) = self.registry.descriptor(&candidate.provider) else {
            return Some(ExclusionReason::UnknownProvider);
        };
        if !descriptor.supports(request.operation) {
            return Some(ExclusionReason::UnsupportedOperation);
        }
        if health.available_count(&candidate.provider) == 0 {
            return Some(ExclusionReason::NoHealthyCredential);
        }
        None
    }
}

fn ordered_candidates(request: &CanonicalRequest, policy: &RoutingPolicy) -> Vec<Candidate> {
    let mut policy_list = policy.candidates.clone();
    if policy.ordering == CandidateOrdering::Weighted && policy_list.len() > 1 {
        // Primary stays first; stable, so equal weights keep declared order.
        policy_list[1..].sort_by(|a, b| b.weight.cmp(&a.weight));
    }

    let mut ordered = Vec::with_capacity(policy_list.len() + 1);
    let mut declared = policy_list.into_iter().map(|c| c.candidate);
    match &request.preferences.provider {
        Some(provider) => ordered.push(Candidate::new(provider.clone(), request.model.clone())),
        None => ordered.extend(declared.next()),
    }
    match &request.preferences.fallbacks {
        Some(fallbacks) => ordered.extend(fallbacks.iter().cloned()),
        None => ordered.extend(declared),
    }

    let mut seen = HashSet::with_capacity(ordered.len());
    ordered.retain(|candidate| seen.insert(candidate.clone()));
    ordered
}
