use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::EdgeServer;

/// Fields that describe membership. Heartbeat-driven values (load, streams,
/// status, lastHeartbeat) are left out so the fingerprint only moves when a
/// server joins, re-registers or is swept.
#[derive(Serialize)]
struct MembershipView<'a> {
    server_id: &'a str,
    server_name: &'a str,
    host: &'a str,
    region: &'a str,
    ports: &'a BTreeMap<String, u16>,
    capacity: u32,
    registered_at: &'a DateTime<Utc>,
}

/// SHA-256 over the membership of the fleet, independent of iteration order.
pub fn compute_fingerprint<'a>(servers: impl IntoIterator<Item = &'a EdgeServer>) -> String {
    let mut views: Vec<MembershipView<'_>> = servers
        .into_iter()
        .map(|s| MembershipView {
            server_id: &s.server_id,
            server_name: &s.server_name,
            host: &s.host,
            region: &s.region,
            ports: &s.ports,
            capacity: s.capacity,
            registered_at: &s.registered_at,
        })
        .collect();
    views.sort_by(|a, b| a.server_id.cmp(b.server_id));

    let json = serde_json::to_string(&views)
        .expect("Failed to serialize fleet membership for hashing");

    hex::encode(Sha256::digest(json.as_bytes()))
}
