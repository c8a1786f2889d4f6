//! Server selection policy.
//!
//! These functions only look at a candidate slice; the fleet composes them
//! with the routing table so that reading candidates and recording the route
//! happen in one step.

use shared::types::EdgeServer;

/// Why a server was picked for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// The stream already had a route to a fresh server
    Sticky,
    /// The caller asked for this server and it had headroom
    Preferred,
    /// Lowest load among the candidates
    LeastLoaded,
}

impl SelectionReason {
    pub fn message(self) -> &'static str {
        match self {
            SelectionReason::Sticky => "Stream already routed to this server",
            SelectionReason::Preferred => "Using preferred server",
            SelectionReason::LeastLoaded => "Best server selected for stream",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub server: EdgeServer,
    pub reason: SelectionReason,
}

/// The preferred server, if it is among the candidates and strictly below
/// the load ceiling.
pub fn preferred_candidate<'a>(
    candidates: &'a [EdgeServer],
    preferred_id: &str,
    load_ceiling: f64,
) -> Option<&'a EdgeServer> {
    candidates
        .iter()
        .find(|s| s.server_id == preferred_id)
        .filter(|s| s.load < load_ceiling)
}

/// Left-to-right scan keeping the first candidate that no later one strictly
/// beats on load, or on active streams at equal load.
pub fn least_loaded(candidates: &[EdgeServer]) -> Option<&EdgeServer> {
    let mut iter = candidates.iter();
    let first = iter.next()?;

    Some(iter.fold(first, |best, current| {
        if current.load < best.load
            || (current.load == best.load && current.active_streams < best.active_streams)
        {
            current
        } else {
            best
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use chrono::Utc;

    fn server(server_id: &str, load: f64, active_streams: u32) -> EdgeServer {
        let now = Utc::now();
        EdgeServer {
            server_id: server_id.to_string(),
            server_name: server_id.to_string(),
            host: "127.0.0.1".to_string(),
            region: "default".to_string(),
            ports: BTreeMap::new(),
            capacity: 100,
            status: "active".to_string(),
            active_streams,
            load,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    #[test]
    fn test_lowest_load_wins() {
        let candidates = [server("a", 10.0, 5), server("b", 10.0, 3), server("c", 5.0, 9)];
        assert_eq!(least_loaded(&candidates).unwrap().server_id, "c");
    }

    #[test]
    fn test_equal_load_fewer_streams_wins() {
        let candidates = [server("a", 10.0, 5), server("b", 10.0, 3)];
        assert_eq!(least_loaded(&candidates).unwrap().server_id, "b");
    }

    #[test]
    fn test_full_tie_keeps_first() {
        let candidates = [server("a", 10.0, 3), server("b", 10.0, 3), server("c", 10.0, 4)];
        assert_eq!(least_loaded(&candidates).unwrap().server_id, "a");
    }

    #[test]
    fn test_empty_candidates() {
        assert!(least_loaded(&[]).is_none());
        assert!(preferred_candidate(&[], "a", 80.0).is_none());
    }

    #[test]
    fn test_preferred_load_ceiling() {
        let candidates = [server("low", 1.0, 0), server("pref", 79.0, 0)];
        assert_eq!(
            preferred_candidate(&candidates, "pref", 80.0).unwrap().server_id,
            "pref"
        );

        let candidates = [server("low", 1.0, 0), server("pref", 80.0, 0)];
        assert!(preferred_candidate(&candidates, "pref", 80.0).is_none());
        assert!(preferred_candidate(&candidates, "missing", 80.0).is_none());
    }
}
