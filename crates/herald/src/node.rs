//! # Node Runtime
//!
//! Wires a [`StateCoordinator`], its replication consumer and an
//! [`Announcer`] to the stdin/stdout bridge, and owns the shutdown order:
//! finish queued player work, stop the snapshot ticker, drain the consumer,
//! flush the store.
//!
//! Platform events and admin commands run on per-player lanes; channel
//! frames go straight to the replication consumer.

use crate::bridge::{self, BridgeInput, OutputQueue};
use crate::config::AppConfig;
use crate::lanes::PlayerLanes;
use crate::signals;
use anyhow::Context;
use herald_core::config::{StoreBackend, StoreConfig};
use herald_core::prelude::*;
use herald_core::ConsumerReport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct Node {
    announcer: Arc<Announcer>,
    coordinator: Arc<StateCoordinator>,
    inbound: InboundSender,
    consumer: ReplicationConsumer,
    lanes: PlayerLanes,
    snapshot_task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
    config_path: PathBuf,
}

impl Node {
    /// Opens the store, warms the view and starts the background tasks.
    pub async fn start(config: &AppConfig, config_path: PathBuf, output: OutputQueue) -> anyhow::Result<Self> {
        let herald = config.herald();
        herald.validate()?;

        let store = open_store(&herald.store)?;
        let process = ProcessId::new(herald.node.process_id.clone());
        let peers: Vec<ProcessId> = herald.node.peers.iter().cloned().map(ProcessId::from).collect();
        info!(
            "🔗 Process {} replicating on {} to {} peer(s)",
            process,
            herald_core::replication::CHANNEL,
            peers.len()
        );

        let (link, inbound, stream) = ReplicationLink::new(process, peers, Arc::new(output.clone()));
        let coordinator = Arc::new(
            StateCoordinator::new(store, Arc::new(link))
                .with_max_store_retries(herald.replication.max_store_retries),
        );

        let warm = coordinator.clone();
        let loaded = tokio::task::spawn_blocking(move || warm.warm_up())
            .await?
            .context("failed to load player records")?;
        info!("📂 Loaded {} player record(s)", loaded);

        let announcer = Arc::new(Announcer::from_config(&herald, coordinator.clone(), Arc::new(output))?);
        let consumer = ReplicationConsumer::spawn(coordinator.clone(), stream);

        let snapshot_task = herald
            .replication
            .snapshot_interval()?
            .map(|period| tokio::spawn(snapshot_loop(coordinator.clone(), period)));

        Ok(Self {
            announcer,
            coordinator,
            inbound,
            consumer,
            lanes: PlayerLanes::default(),
            snapshot_task,
            shutdown_timeout: herald.replication.shutdown_timeout(),
            config_path,
        })
    }

    pub fn coordinator(&self) -> &Arc<StateCoordinator> {
        &self.coordinator
    }

    /// Handles one bridge line. Malformed lines are logged and skipped.
    ///
    /// Player work is only queued here; [`Node::settle`] waits for it.
    pub async fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let input = match BridgeInput::parse(line) {
            Ok(input) => input,
            Err(e) => {
                warn!("🗑️ Skipping bridge line: {:#}", e);
                return;
            }
        };

        match input {
            BridgeInput::Platform { event } => {
                let player = event.player().id;
                self.lanes.dispatch(player, announce(self.announcer.clone(), event));
            }
            BridgeInput::Channel { from, data } => match BridgeInput::decode_frame(&data) {
                Ok(frame) => {
                    if !self.inbound.deliver(ProcessId::from(from), frame) {
                        warn!("Replication consumer stopped; dropping frame");
                    }
                }
                Err(e) => warn!("🗑️ Skipping channel frame from {}: {:#}", from, e),
            },
            BridgeInput::SetOverride { player, key } => {
                self.lanes
                    .dispatch(player, set_override(self.coordinator.clone(), player, key));
            }
            BridgeInput::Reset { player } => {
                self.lanes.dispatch(player, reset(self.coordinator.clone(), player));
            }
            BridgeInput::Reload => {
                if let Err(e) = self.reload().await {
                    error!("❌ Reload failed, keeping current messages: {:#}", e);
                }
            }
            BridgeInput::Stats => self.log_stats(),
        }
    }

    /// Waits until every queued platform event and admin command finished.
    pub async fn settle(&mut self) {
        self.lanes.settle().await;
    }

    async fn reload(&self) -> anyhow::Result<()> {
        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("cannot read {}", self.config_path.display()))?;
        let config: AppConfig = toml::from_str(&content)?;
        self.announcer.reload(&config.messages)?;
        Ok(())
    }

    fn log_stats(&self) {
        let stats = self.coordinator.stats();
        let link = self.coordinator.link().stats();
        info!(
            "📊 players={} online={} local={} first_joins={} conflicts={} retries={} degraded={} \
             remote_applied={} remote_stale={} out_of_order={}",
            stats.known_players,
            self.coordinator.online_count(),
            stats.local_events,
            stats.first_joins,
            stats.version_conflicts,
            stats.store_retries,
            stats.degraded_events,
            stats.remote_applied,
            stats.remote_stale,
            stats.remote_out_of_order
        );
        info!(
            "📊 frames sent={} received={} malformed={} echoes={} gaps={}",
            link.frames_sent, link.frames_received, link.malformed, link.echoes, link.sequence_gaps
        );
    }

    /// Stops background work and flushes the store. Queued frames get at
    /// most the configured shutdown timeout.
    pub async fn shutdown(mut self) -> ConsumerReport {
        info!("🛑 Shutting down node...");
        self.lanes.settle().await;
        if let Some(task) = self.snapshot_task {
            task.abort();
            let _ = task.await;
        }

        let report = self.consumer.shutdown(self.shutdown_timeout).await;
        info!(
            "Replication consumer stopped: {} applied, {} stale, {} out of order, {} abandoned",
            report.applied, report.stale, report.out_of_order, report.abandoned
        );

        let store = self.coordinator.store().clone();
        match tokio::task::spawn_blocking(move || store.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("❌ Store flush failed: {}", e),
            Err(e) => error!("❌ Store flush task failed: {}", e),
        }
        report
    }
}

async fn announce(announcer: Arc<Announcer>, event: PlatformEvent) {
    match tokio::task::spawn_blocking(move || announcer.on_platform_event(event)).await {
        Ok(Some(announcement)) => debug!(
            "Handled {} for {} (first join: {}, degraded: {})",
            announcement.context.kind.as_str(),
            announcement.context.identity.name,
            announcement.context.is_first_join_ever,
            announcement.context.degraded
        ),
        Ok(None) => {}
        Err(e) => error!("❌ Platform event task failed: {}", e),
    }
}

async fn set_override(coordinator: Arc<StateCoordinator>, player: PlayerId, key: Option<String>) {
    match tokio::task::spawn_blocking(move || coordinator.set_override(&player, key)).await {
        Ok(Ok(record)) => info!(
            "🏷️ Override for {} is now {:?}",
            player, record.override_message_key
        ),
        Ok(Err(e)) => warn!("Override for {} not set: {}", player, e),
        Err(e) => error!("❌ Override task failed: {}", e),
    }
}

async fn reset(coordinator: Arc<StateCoordinator>, player: PlayerId) {
    match tokio::task::spawn_blocking(move || coordinator.reset(&player)).await {
        Ok(Ok(Some(_))) => info!("🧹 Reset player {}", player),
        Ok(Ok(None)) => info!("Nothing to reset for {}", player),
        Ok(Err(e)) => warn!("Reset of {} failed: {}", player, e),
        Err(e) => error!("❌ Reset task failed: {}", e),
    }
}

fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn PlayerStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("⚠️ Using in-memory player store; records are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::File => {
            let dir = config
                .data_dir
                .as_ref()
                .context("file store requires store.data_dir")?;
            let store = FileStore::open(dir)
                .with_context(|| format!("cannot open player store at {}", dir.display()))?
                .with_stale_lock_after(Duration::from_secs(config.stale_lock_secs));
            info!("💾 Player store at {}", dir.display());
            Ok(Arc::new(store))
        }
    }
}

async fn snapshot_loop(coordinator: Arc<StateCoordinator>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let sent = coordinator.snapshot_broadcast();
        debug!("Periodic snapshot covered {} record(s)", sent);
    }
}

/// Runs the node until stdin closes or a termination signal arrives.
pub async fn run(config: AppConfig, config_path: PathBuf) -> anyhow::Result<()> {
    let (output, rx) = OutputQueue::new();
    let writer = tokio::spawn(bridge::write_lines(rx, tokio::io::stdout()));

    let mut node = Node::start(&config, config_path, output).await?;
    info!("✅ Herald node {} ready", config.node.process_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = signals::wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => node.handle_line(&line).await,
                Ok(None) => {
                    info!("Host closed stdin");
                    break;
                }
                Err(e) => {
                    error!("❌ Failed to read bridge input: {}", e);
                    break;
                }
            },
            result = &mut shutdown => {
                match result {
                    Ok(signal) => info!("📡 Received {} signal", signal),
                    Err(e) => error!("❌ Signal handling failed: {}", e),
                }
                break;
            }
        }
    }

    node.settle().await;
    node.log_stats();
    node.shutdown().await;
    // The writer ends once the last output handle is gone.
    writer.await?;
    info!("✅ Node shutdown complete");
    Ok(())
}
