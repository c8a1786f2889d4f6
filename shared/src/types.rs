use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// A media-delivery node known to the control plane.
/// This is the canonical record returned by every endpoint that exposes a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeServer {
    /// Caller-supplied unique key
    pub server_id: String,

    pub server_name: String,

    /// Hostname or address clients connect to
    pub host: String,

    pub region: String,

    /// Port per logical role, e.g. "hls" -> 8080
    pub ports: BTreeMap<String, u16>,

    /// Declared maximum number of concurrent streams
    pub capacity: u32,

    /// Free-text state; only "active" servers are eligible for routing
    pub status: String,

    /// Last stream count reported by heartbeat
    pub active_streams: u32,

    /// Last load reported by heartbeat, 0-100 percent
    pub load: f64,

    pub registered_at: DateTime<Utc>,

    pub last_heartbeat: DateTime<Utc>,
}

/// Assignment of a stream to the edge server that serves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRoute {
    pub stream_id: String,
    pub server_id: String,
    pub routed_at: DateTime<Utc>,
}

/// A route joined with the server it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingInfo {
    pub stream_id: String,
    pub server_id: String,
    pub routed_at: DateTime<Utc>,
    pub server: EdgeServer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionStats {
    pub servers: usize,
    pub active_streams: u64,
}

/// Share of declared capacity in use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Utilization {
    /// Percentage formatted with two decimals, e.g. "7.33"
    Percent(String),
    /// The number 0, reported when the fleet declares no capacity
    NoCapacity(u8),
}

impl Utilization {
    pub fn from_counts(active_streams: u64, capacity: u64) -> Self {
        if capacity == 0 {
            return Utilization::NoCapacity(0);
        }
        Utilization::Percent(format!("{:.2}", active_streams as f64 / capacity as f64 * 100.0))
    }
}

/// Fleet-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_servers: usize,
    pub active_servers: usize,
    pub total_streams: usize,
    pub total_capacity: u64,
    pub total_active_streams: u64,
    pub utilization: Utilization,
    pub regions: BTreeMap<String, RegionStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_server_uses_camel_case() {
        let now = Utc::now();
        let server = EdgeServer {
            server_id: "edge-1".to_string(),
            server_name: "Edge 1".to_string(),
            host: "10.0.0.1".to_string(),
            region: "eu".to_string(),
            ports: BTreeMap::from([("hls".to_string(), 8080)]),
            capacity: 100,
            status: "active".to_string(),
            active_streams: 3,
            load: 12.5,
            registered_at: now,
            last_heartbeat: now,
        };

        let json = serde_json::to_value(&server).unwrap();
        assert_eq!(json["serverId"], "edge-1");
        assert_eq!(json["activeStreams"], 3);
        assert_eq!(json["ports"]["hls"], 8080);
        assert!(json.get("lastHeartbeat").is_some());
    }

    #[test]
    fn test_utilization_wire_format() {
        assert_eq!(
            serde_json::to_value(Utilization::from_counts(11, 150)).unwrap(),
            serde_json::json!("7.33")
        );
        assert_eq!(
            serde_json::to_value(Utilization::from_counts(0, 0)).unwrap(),
            serde_json::json!(0)
        );

        let parsed: Utilization = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, Utilization::NoCapacity(0));
        let parsed: Utilization = serde_json::from_str("\"66.67\"").unwrap();
        assert_eq!(parsed, Utilization::Percent("66.67".to_string()));
    }
}
