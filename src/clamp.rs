// SIMPLE-THERMAL FREQUENCY CLAMP
// RUNS INSIDE EVERY POLICY RECALCULATION, ON WHATEVER THREAD ASKED FOR IT.
// READS TWO ATOMICS AND IMMUTABLE DATA. NO LOCKS, NO ALLOCATION, NO ERRORS.

use std::sync::Arc;

use crate::control::SharedState;
use crate::platform::{ClusterMap, PolicyAdjuster, PolicyLimits};
use crate::zone::{Cluster, ZoneDefinition, ZoneTable};

// CEILING FOR ONE CPU UNDER ONE ZONE
pub fn throttle_freq(zone: &ZoneDefinition, cluster: Cluster) -> u32 {
    zone.ceilings.for_cluster(cluster)
}

// PURE CLAMP DECISION. None = NO MITIGATION: BACK TO THE USER MAXIMUM.
// NEVER LEAVES min ABOVE max.
pub fn clamp_policy(zone: Option<&ZoneDefinition>, cluster: Cluster, policy: &mut PolicyLimits) {
    policy.max_khz = match zone {
        Some(z) => throttle_freq(z, cluster),
        None => policy.user_max_khz,
    };

    if policy.max_khz < policy.min_khz {
        policy.min_khz = policy.max_khz;
    }
}

pub struct FrequencyClamp {
    table: Arc<ZoneTable>,
    shared: Arc<SharedState>,
    clusters: Arc<ClusterMap>,
}

impl FrequencyClamp {
    pub fn new(table: Arc<ZoneTable>, shared: Arc<SharedState>, clusters: Arc<ClusterMap>) -> Self {
        Self { table, shared, clusters }
    }

    // THE ZONE THE CLAMP WOULD ENFORCE RIGHT NOW, IF ANY
    pub fn effective_zone(&self) -> Option<&ZoneDefinition> {
        if !self.shared.enabled() {
            return None;
        }
        self.shared.active_zone().and_then(|z| self.table.get(z))
    }
}

impl PolicyAdjuster for FrequencyClamp {
    fn adjust(&self, policy: &mut PolicyLimits) {
        let cluster = self.clusters.cluster_of(policy.cpu);
        clamp_policy(self.effective_zone(), cluster, policy);
    }
}
