use std::collections::BTreeMap;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use shared::protocol::{HeartbeatRequest, RegisterRequest, STATUS_ACTIVE};
use shared::types::EdgeServer;
use crate::error::{FleetError, Result};

/// Heartbeat age thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    pub fresh_after: Duration,
    pub expire_after: Duration,
}

impl Liveness {
    /// Routable: marked active and heard from recently.
    pub fn is_fresh(&self, server: &EdgeServer, now: DateTime<Utc>) -> bool {
        server.status == STATUS_ACTIVE && now - server.last_heartbeat < self.fresh_after
    }

    /// Due for removal regardless of status.
    pub fn is_expired(&self, server: &EdgeServer, now: DateTime<Utc>) -> bool {
        now - server.last_heartbeat >= self.expire_after
    }
}

/// Values filled in when a registration omits them.
#[derive(Debug, Clone)]
pub struct RegistrationDefaults {
    pub capacity: u32,
    pub region: String,
    pub ports: BTreeMap<String, u16>,
}

/// Membership table of edge servers.
///
/// Iteration follows first-registration order; a re-registration replaces the
/// record in place. Selection tie-breaks rely on this order.
#[derive(Debug, Default)]
pub struct EdgeServerRegistry {
    servers: IndexMap<String, EdgeServer>,
}

fn missing_fields() -> FleetError {
    FleetError::Validation("Missing required fields: serverId, serverName, host, ports".to_string())
}

fn required(value: Option<String>) -> Result<String> {
    value.filter(|v| !v.is_empty()).ok_or_else(missing_fields)
}

impl EdgeServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or fully replace the record for `serverId`.
    pub fn register(
        &mut self,
        request: RegisterRequest,
        defaults: &RegistrationDefaults,
        now: DateTime<Utc>,
    ) -> Result<EdgeServer> {
        let server_id = required(request.server_id)?;
        let server_name = required(request.server_name)?;
        let host = required(request.host)?;
        let declared_ports = request.ports.ok_or_else(missing_fields)?;

        let mut ports = defaults.ports.clone();
        ports.extend(declared_ports);

        let server = EdgeServer {
            server_id: server_id.clone(),
            server_name,
            host,
            region: request
                .region
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| defaults.region.clone()),
            ports,
            capacity: request
                .capacity
                .filter(|c| *c > 0)
                .unwrap_or(defaults.capacity),
            status: STATUS_ACTIVE.to_string(),
            active_streams: 0,
            load: 0.0,
            registered_at: now,
            last_heartbeat: now,
        };

        // replaces the value in its existing slot
        self.servers.insert(server_id, server.clone());

        Ok(server)
    }

    /// Record a heartbeat. Omitted fields keep their previous value; a
    /// reported zero is applied as zero.
    pub fn heartbeat(&mut self, request: HeartbeatRequest, now: DateTime<Utc>) -> Result<EdgeServer> {
        let server_id = match request.server_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(FleetError::Validation("serverId is required".to_string())),
        };

        let server = self
            .servers
            .get_mut(&server_id)
            .ok_or_else(|| FleetError::NotFound("Edge server not found".to_string()))?;

        // lastHeartbeat must advance even if the clock reads the same instant twice
        server.last_heartbeat = if now > server.last_heartbeat {
            now
        } else {
            server.last_heartbeat + Duration::microseconds(1)
        };

        if let Some(active_streams) = request.active_streams {
            server.active_streams = active_streams;
        }
        if let Some(load) = request.load {
            server.load = load;
        }
        if let Some(status) = request.status.filter(|s| !s.is_empty()) {
            server.status = status;
        }

        Ok(server.clone())
    }

    pub fn get(&self, server_id: &str) -> Option<&EdgeServer> {
        self.servers.get(server_id)
    }

    pub fn contains(&self, server_id: &str) -> bool {
        self.servers.contains_key(server_id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EdgeServer> {
        self.servers.values()
    }

    /// Servers sorted by ascending load; equal loads keep registration order.
    pub fn list(
        &self,
        region: Option<&str>,
        include_inactive: bool,
        liveness: &Liveness,
        now: DateTime<Utc>,
    ) -> Vec<EdgeServer> {
        let mut servers: Vec<EdgeServer> = self
            .servers
            .values()
            .filter(|s| region.map_or(true, |r| s.region == r))
            .filter(|s| include_inactive || liveness.is_fresh(s, now))
            .cloned()
            .collect();

        servers.sort_by(|a, b| a.load.total_cmp(&b.load));
        servers
    }

    /// Remove every expired server and return their ids.
    pub fn expire(&mut self, liveness: &Liveness, now: DateTime<Utc>) -> Vec<String> {
        let mut removed = Vec::new();
        self.servers.retain(|server_id, server| {
            if liveness.is_expired(server, now) {
                removed.push(server_id.clone());
                false
            } else {
                true
            }
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn liveness() -> Liveness {
        Liveness {
            fresh_after: Duration::minutes(5),
            expire_after: Duration::minutes(10),
        }
    }

    fn defaults() -> RegistrationDefaults {
        RegistrationDefaults {
            capacity: 100,
            region: "default".to_string(),
            ports: BTreeMap::from([
                ("hls".to_string(), 8080),
                ("webrtc".to_string(), 3333),
                ("api".to_string(), 8081),
            ]),
        }
    }

    fn request(server_id: &str) -> RegisterRequest {
        RegisterRequest {
            server_id: Some(server_id.to_string()),
            server_name: Some(format!("{} name", server_id)),
            host: Some("10.0.0.1".to_string()),
            ports: Some(BTreeMap::new()),
            capacity: None,
            region: None,
        }
    }

    fn beat(server_id: &str, active_streams: Option<u32>, load: Option<f64>) -> HeartbeatRequest {
        HeartbeatRequest {
            server_id: Some(server_id.to_string()),
            active_streams,
            load,
            status: None,
        }
    }

    #[test]
    fn test_register_applies_defaults() {
        let mut registry = EdgeServerRegistry::new();
        let now = Utc::now();

        let mut req = request("edge-1");
        req.ports = Some(BTreeMap::from([
            ("hls".to_string(), 9000),
            ("rtmp".to_string(), 1935),
        ]));
        let server = registry.register(req, &defaults(), now).unwrap();

        assert_eq!(server.ports.get("hls"), Some(&9000));
        assert_eq!(server.ports.get("webrtc"), Some(&3333));
        assert_eq!(server.ports.get("api"), Some(&8081));
        assert_eq!(server.ports.get("rtmp"), Some(&1935));
        assert_eq!(server.capacity, 100);
        assert_eq!(server.region, "default");
        assert_eq!(server.status, "active");
        assert_eq!(server.registered_at, now);
    }

    #[test]
    fn test_register_requires_fields() {
        let mut registry = EdgeServerRegistry::new();
        let now = Utc::now();

        let mut no_host = request("edge-1");
        no_host.host = None;
        let mut empty_name = request("edge-1");
        empty_name.server_name = Some(String::new());
        let mut no_ports = request("edge-1");
        no_ports.ports = None;

        for req in [no_host, empty_name, no_ports] {
            let err = registry.register(req, &defaults(), now).unwrap_err();
            assert!(matches!(err, FleetError::Validation(_)));
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_reregister_replaces_record() {
        let mut registry = EdgeServerRegistry::new();
        let t0 = Utc::now();

        registry.register(request("edge-1"), &defaults(), t0).unwrap();
        registry.heartbeat(beat("edge-1", Some(40), Some(55.0)), t0).unwrap();

        let mut again = request("edge-1");
        again.capacity = Some(10);
        let t1 = t0 + Duration::seconds(30);
        let server = registry.register(again, &defaults(), t1).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(server.active_streams, 0);
        assert_eq!(server.load, 0.0);
        assert_eq!(server.capacity, 10);
        assert_eq!(server.registered_at, t1);
    }

    #[test]
    fn test_reregister_keeps_position() {
        let mut registry = EdgeServerRegistry::new();
        let t0 = Utc::now();
        registry.register(request("a"), &defaults(), t0).unwrap();
        registry.register(request("b"), &defaults(), t0).unwrap();
        registry.register(request("a"), &defaults(), t0 + Duration::seconds(1)).unwrap();

        let order: Vec<&str> = registry.iter().map(|s| s.server_id.as_str()).collect();
        assert_eq!(order, ["a", "b"]);
    }

    #[test]
    fn test_freshness_boundary() {
        let mut registry = EdgeServerRegistry::new();
        let t0 = Utc::now();
        registry.register(request("edge-1"), &defaults(), t0).unwrap();

        let just_before = t0 + Duration::minutes(5) - Duration::milliseconds(1);
        assert_eq!(registry.list(None, false, &liveness(), just_before).len(), 1);

        let boundary = t0 + Duration::minutes(5);
        assert!(registry.list(None, false, &liveness(), boundary).is_empty());
        assert_eq!(registry.list(None, true, &liveness(), boundary).len(), 1);
    }

    #[test]
    fn test_heartbeat_keeps_omitted_fields() {
        let mut registry = EdgeServerRegistry::new();
        let now = Utc::now();
        registry.register(request("edge-1"), &defaults(), now).unwrap();

        registry.heartbeat(beat("edge-1", Some(7), Some(30.0)), now).unwrap();
        let server = registry.heartbeat(beat("edge-1", None, None), now).unwrap();
        assert_eq!(server.active_streams, 7);
        assert_eq!(server.load, 30.0);

        let server = registry.heartbeat(beat("edge-1", Some(0), Some(0.0)), now).unwrap();
        assert_eq!(server.active_streams, 0);
        assert_eq!(server.load, 0.0);
    }

    #[test]
    fn test_heartbeat_strictly_advances() {
        let mut registry = EdgeServerRegistry::new();
        let now = Utc::now();
        registry.register(request("edge-1"), &defaults(), now).unwrap();

        let first = registry.heartbeat(beat("edge-1", None, None), now).unwrap();
        let second = registry.heartbeat(beat("edge-1", None, None), now).unwrap();
        assert!(first.last_heartbeat > now);
        assert!(second.last_heartbeat > first.last_heartbeat);
    }

    #[test]
    fn test_heartbeat_errors() {
        let mut registry = EdgeServerRegistry::new();
        let now = Utc::now();

        let err = registry.heartbeat(HeartbeatRequest::default(), now).unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)));

        let err = registry.heartbeat(beat("ghost", None, None), now).unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));
    }

    #[test]
    fn test_list_filters_and_sorts() {
        let mut registry = EdgeServerRegistry::new();
        let t0 = Utc::now();

        for (id, region) in [("a", "eu"), ("b", "us"), ("c", "eu"), ("d", "eu")] {
            let mut req = request(id);
            req.region = Some(region.to_string());
            registry.register(req, &defaults(), t0).unwrap();
        }
        registry.heartbeat(beat("a", None, Some(50.0)), t0).unwrap();
        registry.heartbeat(beat("c", None, Some(10.0)), t0).unwrap();
        let mut draining = beat("d", None, Some(1.0));
        draining.status = Some("draining".to_string());
        registry.heartbeat(draining, t0).unwrap();

        let ids = |list: Vec<EdgeServer>| list.into_iter().map(|s| s.server_id).collect::<Vec<_>>();

        assert_eq!(ids(registry.list(Some("eu"), false, &liveness(), t0)), ["c", "a"]);
        assert_eq!(ids(registry.list(Some("eu"), true, &liveness(), t0)), ["d", "c", "a"]);
        assert_eq!(ids(registry.list(None, false, &liveness(), t0)), ["b", "c", "a"]);

        let later = t0 + Duration::minutes(6);
        assert!(registry.list(None, false, &liveness(), later).is_empty());
        assert_eq!(registry.list(None, true, &liveness(), later).len(), 4);
    }

    #[test]
    fn test_expire_removes_only_old_heartbeats() {
        let mut registry = EdgeServerRegistry::new();
        let t0 = Utc::now();
        registry.register(request("old"), &defaults(), t0).unwrap();
        registry.register(request("young"), &defaults(), t0 + Duration::minutes(3)).unwrap();

        let removed = registry.expire(&liveness(), t0 + Duration::minutes(9));
        assert!(removed.is_empty());

        let removed = registry.expire(&liveness(), t0 + Duration::minutes(10));
        assert_eq!(removed, ["old"]);
        assert!(!registry.contains("old"));
        assert!(registry.contains("young"));
    }
}
