use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

/// Default mount point of the edge API
pub const API_PREFIX: &str = "/edge";

/// Status value that makes a server eligible for routing
pub const STATUS_ACTIVE: &str = "active";

/// Logical port roles with built-in defaults
pub const PORT_HLS: &str = "hls";
pub const PORT_WEBRTC: &str = "webrtc";
pub const PORT_API: &str = "api";

/// Body of `POST /register`, sent once by an edge node at startup.
///
/// Every field is optional on the wire so that missing values surface as a
/// validation error rather than a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub host: Option<String>,
    pub ports: Option<BTreeMap<String, u16>>,
    pub capacity: Option<u32>,
    pub region: Option<String>,
}

/// Body of `POST /heartbeat`, sent periodically by an edge node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub server_id: Option<String>,
    pub active_streams: Option<u32>,
    pub load: Option<f64>,
    pub status: Option<String>,
}

/// Body of `POST /route-stream`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStreamRequest {
    pub stream_id: Option<String>,
    pub server_id: Option<String>,
    #[serde(default)]
    pub force: bool,
}
