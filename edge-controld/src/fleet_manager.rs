use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use shared::protocol::{HeartbeatRequest, RegisterRequest, RouteStreamRequest};
use shared::types::{EdgeServer, RoutingInfo, StatsSnapshot, StreamRoute};
use crate::clock::TimeSource;
use crate::error::{FleetError, Result};
use crate::fleet::selection::Selection;
use crate::fleet::{CleanupReport, Fleet};

/// Commands sent to the fleet thread
pub enum FleetCommand {
    Register(RegisterRequest, oneshot::Sender<Result<EdgeServer>>),
    Heartbeat(HeartbeatRequest, oneshot::Sender<Result<EdgeServer>>),
    ListServers {
        region: Option<String>,
        include_inactive: bool,
        reply: oneshot::Sender<Vec<EdgeServer>>,
    },
    SelectBest {
        stream_id: String,
        region: Option<String>,
        preferred: Option<String>,
        reply: oneshot::Sender<Result<Selection>>,
    },
    RouteStream(RouteStreamRequest, oneshot::Sender<Result<StreamRoute>>),
    Unroute(String, oneshot::Sender<bool>),
    Routing(String, oneshot::Sender<Result<RoutingInfo>>),
    Stats(oneshot::Sender<StatsSnapshot>),
    Cleanup(oneshot::Sender<CleanupReport>),
    Shutdown,
}

/// Handle to the thread that owns all fleet state.
///
/// Commands are applied one at a time, so each operation (including
/// select-then-record and the expiry sweep) is atomic with respect to all
/// others.
#[derive(Clone)]
pub struct FleetHandle {
    tx: mpsc::Sender<FleetCommand>,
}

impl FleetHandle {
    /// Spawn the fleet thread
    pub fn spawn(
        mut fleet: Fleet,
        clock: Arc<dyn TimeSource>,
        fingerprint_tx: watch::Sender<String>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<FleetCommand>(256);

        // only publish when membership actually changed
        let publish_fingerprint = |fleet: &Fleet, fingerprint_tx: &watch::Sender<String>| {
            let fingerprint = fleet.fingerprint();
            fingerprint_tx.send_if_modified(|current| {
                if *current == fingerprint {
                    false
                } else {
                    *current = fingerprint;
                    true
                }
            });
        };

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                let now = clock.now();
                match cmd {
                    FleetCommand::Register(request, reply) => {
                        let result = fleet.register(request, now);
                        if result.is_ok() {
                            publish_fingerprint(&fleet, &fingerprint_tx);
                        }
                        let _ = reply.send(result);
                    }
                    FleetCommand::Heartbeat(request, reply) => {
                        let _ = reply.send(fleet.heartbeat(request, now));
                    }
                    FleetCommand::ListServers { region, include_inactive, reply } => {
                        let _ = reply.send(fleet.list_servers(region.as_deref(), include_inactive, now));
                    }
                    FleetCommand::SelectBest { stream_id, region, preferred, reply } => {
                        let result = fleet.select_best_server(
                            &stream_id,
                            region.as_deref(),
                            preferred.as_deref(),
                            now,
                        );
                        let _ = reply.send(result);
                    }
                    FleetCommand::RouteStream(request, reply) => {
                        let _ = reply.send(fleet.route_stream(request, now));
                    }
                    FleetCommand::Unroute(stream_id, reply) => {
                        let _ = reply.send(fleet.unroute(&stream_id));
                    }
                    FleetCommand::Routing(stream_id, reply) => {
                        let _ = reply.send(fleet.routing(&stream_id));
                    }
                    FleetCommand::Stats(reply) => {
                        let _ = reply.send(fleet.stats(now));
                    }
                    FleetCommand::Cleanup(reply) => {
                        let report = fleet.expire_stale(now);
                        if !report.removed_servers.is_empty() {
                            publish_fingerprint(&fleet, &fingerprint_tx);
                        }
                        let _ = reply.send(report);
                    }
                    FleetCommand::Shutdown => {
                        tracing::info!("Fleet thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(&self, cmd: FleetCommand, rx: oneshot::Receiver<T>) -> Result<T> {
        self.tx.send(cmd).await.map_err(|_| FleetError::Unavailable)?;
        rx.await.map_err(|_| FleetError::Unavailable)
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<EdgeServer> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetCommand::Register(request, reply), rx).await?
    }

    pub async fn heartbeat(&self, request: HeartbeatRequest) -> Result<EdgeServer> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetCommand::Heartbeat(request, reply), rx).await?
    }

    pub async fn list_servers(
        &self,
        region: Option<String>,
        include_inactive: bool,
    ) -> Result<Vec<EdgeServer>> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetCommand::ListServers { region, include_inactive, reply }, rx)
            .await
    }

    /// Choose (or reuse) the server for a stream
    pub async fn select_best(
        &self,
        stream_id: String,
        region: Option<String>,
        preferred: Option<String>,
    ) -> Result<Selection> {
        let (reply, rx) = oneshot::channel();
        self.request(
            FleetCommand::SelectBest {
                stream_id,
                region,
                preferred,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn route_stream(&self, request: RouteStreamRequest) -> Result<StreamRoute> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetCommand::RouteStream(request, reply), rx).await?
    }

    /// Returns true if the stream had a route
    pub async fn unroute(&self, stream_id: String) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetCommand::Unroute(stream_id, reply), rx).await
    }

    pub async fn routing(&self, stream_id: String) -> Result<RoutingInfo> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetCommand::Routing(stream_id, reply), rx).await?
    }

    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetCommand::Stats(reply), rx).await
    }

    /// Run one expiry sweep
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let (reply, rx) = oneshot::channel();
        self.request(FleetCommand::Cleanup(reply), rx).await
    }

    /// Shutdown the fleet thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(FleetCommand::Shutdown)
            .await
            .map_err(|_| FleetError::Unavailable)
    }
}

/// Cleanup scheduler: sweeps expired servers on a fixed period until cancelled.
pub async fn run(
    fleet: FleetHandle,
    interval_secs: u64,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let period = std::time::Duration::from_secs(interval_secs);
    let mut cleanup_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cleanup_interval.tick() => {
                match fleet.cleanup().await {
                    Ok(report) if !report.removed_servers.is_empty() => {
                        tracing::info!(
                            removed_servers = report.removed_servers.len(),
                            purged_routes = report.purged_streams.len(),
                            "Cleanup sweep finished"
                        );
                    }
                    Ok(_) => tracing::debug!("Cleanup sweep found nothing to remove"),
                    Err(e) => {
                        tracing::error!("Failed to run cleanup: {}", e);
                        anyhow::bail!(e);
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Cleanup scheduler shutting down");
                break;
            }
        }
    }

    Ok(())
}
