//! Application orchestration for the bmcmond daemon
//!
//! Wires the config, the shard partitions, the shared store, the streaming
//! server and the watchdog together, and owns the process-wide shutdown
//! flag.

use crate::config::AppConfig;
use crate::controller::create_controller;
use crate::fleet::shard::{self, ShardContext, ShardSettings};
use crate::fleet::session::SessionSettings;
use crate::fleet::{partition_nodes, NodeConfig};
use crate::store::{SensorCatalog, SensorStore};
use crate::streaming::{
    spawn_alert_forwarder, spawn_consolidator, ClientSettings, StreamingServer,
};
use crate::watchdog::{Unit, Watchdog};
use crate::error::Result;
use crossbeam_channel::{unbounded, Sender};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Main application structure
pub struct App {
    config: AppConfig,
    shutdown: Arc<AtomicBool>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        App {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until a shutdown signal arrives
    pub fn run(&mut self) -> Result<()> {
        self.setup_signal_handler();

        let catalog = Arc::new(SensorCatalog::new(&self.config.fleet.sensor_paths));
        let store = Arc::new(SensorStore::new());
        let (publish_tx, publish_rx) = unbounded();
        let (alert_tx, alert_rx) = unbounded();

        // The consolidation task outlives server restarts, so clients keep
        // seeing the last merged data while the accept loop is down
        let consolidator =
            spawn_consolidator(Arc::clone(&store), publish_rx, Arc::clone(&self.shutdown))?;
        let alert_forwarder = spawn_alert_forwarder(alert_rx, Arc::clone(&self.shutdown))?;

        let shard_size = self.config.fleet.shard_size.max(1);
        let partitions = partition_nodes(&self.config.nodes, shard_size);
        log::info!(
            "monitoring {} nodes across {} shards",
            self.config.nodes.len(),
            partitions.len()
        );
        if partitions.is_empty() {
            log::warn!("node roster is empty, serving empty snapshots");
        }

        let mut units = Vec::new();
        for (index, partition) in partitions.into_iter().enumerate() {
            units.push(self.shard_unit(
                index,
                partition,
                publish_tx.clone(),
                alert_tx.clone(),
                Arc::clone(&catalog),
            ));
        }
        units.push(self.server_unit(Arc::clone(&store), Arc::clone(&catalog)));

        log::info!("bmcmond running, press Ctrl-C to stop");
        Watchdog::new(units, Arc::clone(&self.shutdown)).run();

        log::info!("shutting down");
        drop(publish_tx);
        drop(alert_tx);
        let _ = consolidator.join();
        let _ = alert_forwarder.join();
        log::info!("bmcmond stopped");
        Ok(())
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            stale_window: Duration::from_secs(self.config.fleet.stale_window_secs),
            retry_limit: self.config.fleet.retry_limit,
            retry_interval: Duration::from_secs(self.config.fleet.retry_interval_secs),
            push_recv_timeout: Duration::from_millis(500),
        }
    }

    /// Supervised unit for one shard; a respawn fences off the previous
    /// incarnation's threads before starting fresh with the same partition
    fn shard_unit(
        &self,
        index: usize,
        partition: Vec<NodeConfig>,
        publish: Sender<std::collections::HashMap<String, crate::store::NodeSnapshot>>,
        alerts: Sender<crate::fleet::PollReference>,
        catalog: Arc<SensorCatalog>,
    ) -> Unit {
        let controller_config = self.config.controller.clone();
        let settings = ShardSettings {
            publish_interval: Duration::from_millis(self.config.fleet.publish_interval_ms),
            supervise_interval: Duration::from_secs(1),
            session: self.session_settings(),
        };
        let shutdown = Arc::clone(&self.shutdown);
        let mut previous_active: Option<Arc<AtomicBool>> = None;

        Unit::new(
            &format!("shard-{}", index),
            Box::new(move || {
                if let Some(previous) = previous_active.take() {
                    previous.store(false, Ordering::Relaxed);
                }
                let shard_active = Arc::new(AtomicBool::new(true));
                previous_active = Some(Arc::clone(&shard_active));

                let controllers = partition
                    .iter()
                    .map(|node| Arc::from(create_controller(node, &controller_config)))
                    .collect();
                shard::spawn(ShardContext {
                    index,
                    partition: partition.clone(),
                    controllers,
                    publish: publish.clone(),
                    alerts: alerts.clone(),
                    catalog: Arc::clone(&catalog),
                    settings: settings.clone(),
                    shutdown: Arc::clone(&shutdown),
                    shard_active,
                })
            }),
        )
    }

    /// Supervised unit for the streaming server; a respawn rebinds the same
    /// port
    fn server_unit(&self, store: Arc<SensorStore>, catalog: Arc<SensorCatalog>) -> Unit {
        let bind_address = self.config.streaming.bind_address.clone();
        let settings = ClientSettings {
            tick: Duration::from_millis(self.config.streaming.server_tick_ms),
            default_cadence: Duration::from_millis(self.config.streaming.default_cadence_ms),
        };
        let shutdown = Arc::clone(&self.shutdown);

        Unit::new(
            "stream-server",
            Box::new(move || {
                let server = StreamingServer::bind(&bind_address)
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                server.spawn(
                    Arc::clone(&store),
                    Arc::clone(&catalog),
                    settings.clone(),
                    Arc::clone(&shutdown),
                )
            }),
        )
    }

    fn setup_signal_handler(&self) {
        let shutdown = Arc::clone(&self.shutdown);
        std::thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                let mut signals =
                    Signals::new([SIGINT, SIGTERM]).expect("failed to register signal handlers");
                if let Some(signal) = signals.forever().next() {
                    log::info!("received signal {:?}, initiating shutdown", signal);
                    shutdown.store(true, Ordering::Relaxed);
                }
            })
            .expect("failed to spawn signal handler thread");
    }
}
