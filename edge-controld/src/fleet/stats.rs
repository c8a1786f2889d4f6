use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use shared::types::{RegionStats, StatsSnapshot, Utilization};
use super::registry::{EdgeServerRegistry, Liveness};
use super::routing::StreamRoutingTable;

/// Roll up fleet counters. Totals and regions cover every registered server,
/// including stale ones the sweep has not removed yet.
pub fn compute_stats(
    registry: &EdgeServerRegistry,
    routes: &StreamRoutingTable,
    liveness: &Liveness,
    now: DateTime<Utc>,
) -> StatsSnapshot {
    let mut active_servers = 0;
    let mut total_capacity: u64 = 0;
    let mut total_active_streams: u64 = 0;
    let mut regions: BTreeMap<String, RegionStats> = BTreeMap::new();

    for server in registry.iter() {
        if liveness.is_fresh(server, now) {
            active_servers += 1;
        }
        total_capacity += u64::from(server.capacity);
        total_active_streams += u64::from(server.active_streams);

        let region = regions.entry(server.region.clone()).or_default();
        region.servers += 1;
        region.active_streams += u64::from(server.active_streams);
    }

    StatsSnapshot {
        total_servers: registry.len(),
        active_servers,
        total_streams: routes.len(),
        total_capacity,
        total_active_streams,
        utilization: Utilization::from_counts(total_active_streams, total_capacity),
        regions,
    }
}
