//! Stale member reclamation
//!
//! After a scale-down or instance replacement, the replaced instances stay
//! in the cluster's membership until someone removes them. Ordinals only
//! grow, so on the leader every member with a smaller ordinal is a
//! predecessor that never left cleanly. The pass is best-effort: it never
//! fails the run and never retries an individual eviction.

use crate::common::{poll_until, ClusterConfig, NodeIdentity, PollPolicy, ReclaimConfig};
use crate::coordinator::client::{ClusterApi, Membership};
use crate::coordinator::identity::{resolve_role, Role};
use serde::Serialize;

/// Why a pass ended without evicting anything it was supposed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotLeader,
    MembershipUnavailable,
    /// The leader's own ordinal was missing from the listing
    SelfNotListed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub evicted: Vec<u64>,
    pub failed: Vec<u64>,
    pub retained: Vec<u64>,
    pub skipped: Option<SkipReason>,
}

impl ReclaimReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// Ordinals strictly below `own`, ascending.
pub fn stale_ordinals(own: u64, members: &Membership) -> Vec<u64> {
    members.keys().copied().filter(|o| *o < own).collect()
}

pub struct StaleMemberReclaimer<'a, A: ClusterApi + ?Sized> {
    api: &'a A,
    readiness: PollPolicy,
    membership: PollPolicy,
}

impl<'a, A: ClusterApi + ?Sized> StaleMemberReclaimer<'a, A> {
    pub fn new(api: &'a A, config: &ReclaimConfig) -> Self {
        Self {
            api,
            readiness: PollPolicy::unbounded(config.readiness_interval()),
            membership: PollPolicy::bounded(
                config.membership_interval(),
                config.membership_attempts,
            ),
        }
    }

    /// Run one reclamation pass for `identity`.
    ///
    /// Blocks until the local daemon reports ready, however long that takes.
    pub async fn reclaim(
        &self,
        identity: &NodeIdentity,
        cluster: &ClusterConfig,
    ) -> ReclaimReport {
        if resolve_role(identity, cluster) != Role::Leader {
            tracing::debug!(ordinal = identity.ordinal, "not the leader, skipping reclamation");
            return ReclaimReport::skipped(SkipReason::NotLeader);
        }

        let api = self.api;
        match poll_until(self.readiness, "local daemon", |_| api.ready()).await {
            Ok((_, attempts)) => tracing::info!(attempts, "local daemon ready"),
            // Unbounded polls only return on success.
            Err(e) => {
                tracing::error!("readiness wait ended unexpectedly: {}", e);
                return ReclaimReport::skipped(SkipReason::MembershipUnavailable);
            }
        }

        let listing = poll_until(self.membership, "membership listing", |_| api.members()).await;
        let members = match listing {
            Ok((members, _)) => members,
            Err(e) => {
                tracing::error!("cannot list cluster membership, nothing reclaimed: {}", e);
                return ReclaimReport::skipped(SkipReason::MembershipUnavailable);
            }
        };

        if !members.contains_key(&identity.ordinal) {
            tracing::error!(
                ordinal = identity.ordinal,
                members = ?members.keys().collect::<Vec<_>>(),
                "leader missing from its own cluster listing, refusing to evict"
            );
            return ReclaimReport::skipped(SkipReason::SelfNotListed);
        }

        let mut report = ReclaimReport {
            retained: members
                .keys()
                .copied()
                .filter(|o| *o >= identity.ordinal)
                .collect(),
            ..Default::default()
        };

        for ordinal in stale_ordinals(identity.ordinal, &members) {
            let record = &members[&ordinal];
            match self.api.evict(ordinal).await {
                Ok(()) => {
                    tracing::info!(
                        ordinal,
                        address = record.address.as_deref().unwrap_or("-"),
                        "evicted stale member"
                    );
                    report.evicted.push(ordinal);
                }
                Err(e) => {
                    tracing::warn!(ordinal, "failed to evict stale member: {}", e);
                    report.failed.push(ordinal);
                }
            }
        }

        tracing::info!(
            evicted = report.evicted.len(),
            failed = report.failed.len(),
            retained = report.retained.len(),
            "reclamation pass complete"
        );
        report
    }
}
