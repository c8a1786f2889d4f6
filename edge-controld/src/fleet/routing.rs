use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use shared::types::StreamRoute;
use crate::error::{FleetError, Result};

/// Stream id -> assigned edge server.
#[derive(Debug, Default)]
pub struct StreamRoutingTable {
    routes: IndexMap<String, StreamRoute>,
}

impl StreamRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, stream_id: &str) -> Option<&StreamRoute> {
        self.routes.get(stream_id)
    }

    /// Overwrite whatever route the stream had.
    pub fn assign(&mut self, stream_id: &str, server_id: &str, routed_at: DateTime<Utc>) {
        self.routes.insert(
            stream_id.to_string(),
            StreamRoute {
                stream_id: stream_id.to_string(),
                server_id: server_id.to_string(),
                routed_at,
            },
        );
    }

    /// Assign unless the stream is already routed and `force` is false.
    pub fn try_assign(
        &mut self,
        stream_id: &str,
        server_id: &str,
        routed_at: DateTime<Utc>,
        force: bool,
    ) -> Result<()> {
        if !force {
            if let Some(existing) = self.routes.get(stream_id) {
                return Err(FleetError::Conflict {
                    current_server_id: existing.server_id.clone(),
                });
            }
        }
        self.assign(stream_id, server_id, routed_at);
        Ok(())
    }

    /// Returns true if a route existed.
    pub fn unassign(&mut self, stream_id: &str) -> bool {
        self.routes.shift_remove(stream_id).is_some()
    }

    /// Drop every route pointing at `server_id`, returning the affected streams.
    pub fn purge_server(&mut self, server_id: &str) -> Vec<String> {
        let mut affected = Vec::new();
        self.routes.retain(|stream_id, route| {
            if route.server_id == server_id {
                affected.push(stream_id.clone());
                false
            } else {
                true
            }
        });
        affected
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_assign_overwrites() {
        let mut table = StreamRoutingTable::new();
        let t0 = Utc::now();

        table.assign("s1", "edge-1", t0);
        table.assign("s1", "edge-2", t0 + Duration::seconds(1));

        let route = table.lookup("s1").unwrap();
        assert_eq!(route.server_id, "edge-2");
        assert_eq!(route.routed_at, t0 + Duration::seconds(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_try_assign_conflict_keeps_original() {
        let mut table = StreamRoutingTable::new();
        let t0 = Utc::now();
        table.assign("s1", "edge-1", t0);

        let err = table.try_assign("s1", "edge-2", t0, false).unwrap_err();
        assert_eq!(
            err,
            FleetError::Conflict {
                current_server_id: "edge-1".to_string()
            }
        );
        assert_eq!(table.lookup("s1").unwrap().server_id, "edge-1");

        table.try_assign("s1", "edge-2", t0, true).unwrap();
        assert_eq!(table.lookup("s1").unwrap().server_id, "edge-2");

        table.try_assign("s2", "edge-1", t0, false).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unassign_reports_existence() {
        let mut table = StreamRoutingTable::new();
        table.assign("s1", "edge-1", Utc::now());

        assert!(table.unassign("s1"));
        assert!(!table.unassign("s1"));
        assert!(table.lookup("s1").is_none());
    }

    #[test]
    fn test_purge_server() {
        let mut table = StreamRoutingTable::new();
        let now = Utc::now();
        table.assign("s1", "edge-1", now);
        table.assign("s2", "edge-2", now);
        table.assign("s3", "edge-1", now);

        assert_eq!(table.purge_server("edge-1"), ["s1", "s3"]);
        assert_eq!(table.len(), 1);
        assert!(table.lookup("s2").is_some());
        assert!(table.purge_server("edge-1").is_empty());
    }
}
