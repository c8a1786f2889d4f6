//! In-memory fleet state: server membership plus stream routes.
//!
//! `Fleet` is plain synchronous state. Every method takes the current time
//! explicitly; ownership and serialization are handled by `fleet_manager`.

pub mod hash;
pub mod registry;
pub mod routing;
pub mod selection;
pub mod stats;

use chrono::{DateTime, Duration, Utc};
use shared::protocol::{HeartbeatRequest, RegisterRequest, RouteStreamRequest};
use shared::types::{EdgeServer, RoutingInfo, StatsSnapshot, StreamRoute};
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use registry::{EdgeServerRegistry, Liveness, RegistrationDefaults};
use routing::StreamRoutingTable;
use selection::{Selection, SelectionReason};

#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub liveness: Liveness,
    pub defaults: RegistrationDefaults,
    pub preferred_load_ceiling: f64,
}

impl FleetSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            liveness: Liveness {
                fresh_after: threshold(config.fresh_after_secs),
                expire_after: threshold(config.expire_after_secs),
            },
            defaults: RegistrationDefaults {
                capacity: config.default_capacity,
                region: config.default_region.clone(),
                ports: config.default_ports.clone(),
            },
            preferred_load_ceiling: config.preferred_load_ceiling,
        }
    }
}

/// Seconds to a duration, saturating instead of wrapping.
fn threshold(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Outcome of one cleanup sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub removed_servers: Vec<String>,
    pub purged_streams: Vec<String>,
}

pub struct Fleet {
    registry: EdgeServerRegistry,
    routes: StreamRoutingTable,
    settings: FleetSettings,
}

impl Fleet {
    pub fn new(settings: FleetSettings) -> Self {
        Self {
            registry: EdgeServerRegistry::new(),
            routes: StreamRoutingTable::new(),
            settings,
        }
    }

    pub fn register(&mut self, request: RegisterRequest, now: DateTime<Utc>) -> Result<EdgeServer> {
        let server = self.registry.register(request, &self.settings.defaults, now)?;
        tracing::info!(
            server_id = %server.server_id,
            region = %server.region,
            capacity = server.capacity,
            "Edge server registered: {} ({})",
            server.server_id,
            server.server_name
        );
        Ok(server)
    }

    pub fn heartbeat(&mut self, request: HeartbeatRequest, now: DateTime<Utc>) -> Result<EdgeServer> {
        let server = self.registry.heartbeat(request, now)?;
        tracing::debug!(
            server_id = %server.server_id,
            load = server.load,
            active_streams = server.active_streams,
            status = %server.status,
            "Heartbeat received"
        );
        Ok(server)
    }

    pub fn list_servers(
        &self,
        region: Option<&str>,
        include_inactive: bool,
        now: DateTime<Utc>,
    ) -> Vec<EdgeServer> {
        self.registry
            .list(region, include_inactive, &self.settings.liveness, now)
    }

    /// Pick the server for a stream and record the route.
    ///
    /// An existing route to a fresh server is returned untouched. Otherwise
    /// the route is dropped and a new server is chosen among fresh servers
    /// (optionally in `region`), honouring `preferred` when it has headroom.
    pub fn select_best_server(
        &mut self,
        stream_id: &str,
        region: Option<&str>,
        preferred: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Selection> {
        let liveness = self.settings.liveness;

        if let Some(routed_to) = self.routes.lookup(stream_id).map(|r| r.server_id.clone()) {
            match self.registry.get(&routed_to) {
                Some(server) if liveness.is_fresh(server, now) => {
                    return Ok(Selection {
                        server: server.clone(),
                        reason: SelectionReason::Sticky,
                    });
                }
                _ => {
                    tracing::debug!(stream_id, server_id = %routed_to, "Dropping stale route");
                    self.routes.unassign(stream_id);
                }
            }
        }

        let candidates = self.registry.list(region, false, &liveness, now);

        let preferred = preferred.and_then(|id| {
            selection::preferred_candidate(&candidates, id, self.settings.preferred_load_ceiling)
        });
        let (server, reason) = match preferred {
            Some(server) => (server, SelectionReason::Preferred),
            None => (
                selection::least_loaded(&candidates).ok_or(FleetError::NoAvailableServer)?,
                SelectionReason::LeastLoaded,
            ),
        };

        self.routes.assign(stream_id, &server.server_id, now);
        tracing::debug!(stream_id, server_id = %server.server_id, ?reason, "Stream routed");

        Ok(Selection {
            server: server.clone(),
            reason,
        })
    }

    /// Explicitly route a stream to a registered server.
    pub fn route_stream(&mut self, request: RouteStreamRequest, now: DateTime<Utc>) -> Result<StreamRoute> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        let (Some(stream_id), Some(server_id)) =
            (non_empty(request.stream_id), non_empty(request.server_id))
        else {
            return Err(FleetError::Validation("streamId and serverId are required".to_string()));
        };

        if !self.registry.contains(&server_id) {
            return Err(FleetError::NotFound("Edge server not found".to_string()));
        }

        self.routes.try_assign(&stream_id, &server_id, now, request.force)?;
        tracing::info!(%stream_id, %server_id, force = request.force, "Stream routed explicitly");

        Ok(StreamRoute {
            stream_id,
            server_id,
            routed_at: now,
        })
    }

    pub fn unroute(&mut self, stream_id: &str) -> bool {
        self.routes.unassign(stream_id)
    }

    /// Route of a stream joined with its server. A route whose server has
    /// disappeared is purged and reported as missing.
    pub fn routing(&mut self, stream_id: &str) -> Result<RoutingInfo> {
        let not_found = || FleetError::NotFound("Stream routing not found".to_string());
        let route = self.routes.lookup(stream_id).cloned().ok_or_else(not_found)?;

        match self.registry.get(&route.server_id) {
            Some(server) => Ok(RoutingInfo {
                stream_id: route.stream_id,
                server_id: route.server_id,
                routed_at: route.routed_at,
                server: server.clone(),
            }),
            None => {
                self.routes.unassign(stream_id);
                Err(not_found())
            }
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> StatsSnapshot {
        stats::compute_stats(&self.registry, &self.routes, &self.settings.liveness, now)
    }

    /// Remove expired servers and every route that pointed at them.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> CleanupReport {
        let removed_servers = self.registry.expire(&self.settings.liveness, now);
        let mut purged_streams = Vec::new();

        for server_id in &removed_servers {
            let purged = self.routes.purge_server(server_id);
            tracing::info!(
                server_id = %server_id,
                purged_routes = purged.len(),
                "Removing expired edge server: {}",
                server_id
            );
            purged_streams.extend(purged);
        }

        CleanupReport {
            removed_servers,
            purged_streams,
        }
    }

    pub fn fingerprint(&self) -> String {
        hash::compute_fingerprint(self.registry.iter())
    }
}
