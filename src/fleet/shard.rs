//! Shard worker: a bounded group of nodes under one supervisor
//!
//! A shard owns its partition of the roster and nothing else. It runs one
//! session thread per push-capable node, one dispatcher draining the shared
//! event queue into the shard-local snapshot map, and a supervisory loop that
//! respawns dead session threads and publishes a deep copy of the local map
//! into the merge channel about once per second. No other component reads or
//! writes this shard's local state.

use crate::controller::ControllerClient;
use crate::fleet::session::{self, SessionContext, SessionSettings};
use crate::fleet::{AccessType, NodeConfig, NodeHandle, PollReference, SessionEvent};
use crate::store::{NodeSnapshot, SensorCatalog, SensorReading, SensorKind};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Shard tuning
#[derive(Debug, Clone)]
pub struct ShardSettings {
    /// How often the local snapshot is published into the merge channel
    pub publish_interval: Duration,
    /// Supervisory loop period
    pub supervise_interval: Duration,
    pub session: SessionSettings,
}

impl Default for ShardSettings {
    fn default() -> Self {
        ShardSettings {
            publish_interval: Duration::from_secs(1),
            supervise_interval: Duration::from_secs(1),
            session: SessionSettings::default(),
        }
    }
}

/// Everything needed to run one shard; cloneable so the watchdog can respawn
/// a crashed shard with the identical partition
#[derive(Clone)]
pub struct ShardContext {
    pub index: usize,
    pub partition: Vec<NodeConfig>,
    /// Controller clients, parallel to `partition`
    pub controllers: Vec<Arc<dyn ControllerClient>>,
    pub publish: Sender<HashMap<String, NodeSnapshot>>,
    pub alerts: Sender<PollReference>,
    pub catalog: Arc<SensorCatalog>,
    pub settings: ShardSettings,
    pub shutdown: Arc<AtomicBool>,
    /// Cleared by the watchdog when this incarnation is replaced, so orphan
    /// threads from a dead supervisor cannot outlive it
    pub shard_active: Arc<AtomicBool>,
}

impl ShardContext {
    fn active(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed) && self.shard_active.load(Ordering::Relaxed)
    }
}

/// Spawn the shard supervisor thread
pub fn spawn(ctx: ShardContext) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("shard-{}", ctx.index))
        .spawn(move || run(ctx))
}

fn run(ctx: ShardContext) {
    log::info!(
        "shard {}: starting with {} nodes",
        ctx.index,
        ctx.partition.len()
    );

    let handles: Vec<Arc<NodeHandle>> = ctx
        .partition
        .iter()
        .map(|node| Arc::new(NodeHandle::new(node.clone())))
        .collect();

    // Placeholder snapshots so every owned node is represented from the
    // first publish on, with a stable sensor set
    let mut initial = HashMap::new();
    for node in &ctx.partition {
        initial.insert(
            node.id.clone(),
            NodeSnapshot::unknown_from_catalog(&ctx.catalog),
        );
    }
    let local: Arc<Mutex<HashMap<String, NodeSnapshot>>> = Arc::new(Mutex::new(initial));

    let (event_tx, event_rx) = unbounded();

    let dispatcher = spawn_dispatcher(&ctx, Arc::clone(&local), event_rx);

    // One session thread per push-capable node; poll-only nodes stay in the
    // snapshot but never stream
    let mut sessions: Vec<(usize, JoinHandle<()>)> = Vec::new();
    for (idx, handle) in handles.iter().enumerate() {
        if handle.config.access == AccessType::Rest {
            match spawn_session(&ctx, idx, handle, &event_tx) {
                Ok(join) => sessions.push((idx, join)),
                Err(e) => log::error!(
                    "shard {}: failed to spawn session for {}: {}",
                    ctx.index,
                    handle.config.id,
                    e
                ),
            }
        }
    }

    let mut last_supervise: Option<Instant> = None;
    let mut last_publish: Option<Instant> = None;
    while ctx.active() {
        let supervise_due = last_supervise
            .map_or(true, |tick| tick.elapsed() >= ctx.settings.supervise_interval);
        let publish_due =
            last_publish.map_or(true, |tick| tick.elapsed() >= ctx.settings.publish_interval);
        if !supervise_due && !publish_due {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        }

        if supervise_due {
            last_supervise = Some(Instant::now());
            // Restart dead session threads; the NodeHandle keeps the backoff
            // state, so a respawn cannot bypass the reconnect throttle
            for (idx, join) in sessions.iter_mut() {
                if join.is_finished() && ctx.active() {
                    let handle = &handles[*idx];
                    log::warn!(
                        "shard {}: session thread for {} died, restarting",
                        ctx.index,
                        handle.config.id
                    );
                    match spawn_session(&ctx, *idx, handle, &event_tx) {
                        Ok(new_join) => *join = new_join,
                        Err(e) => log::error!(
                            "shard {}: failed to restart session for {}: {}",
                            ctx.index,
                            handle.config.id,
                            e
                        ),
                    }
                }
            }
        }

        if publish_due {
            last_publish = Some(Instant::now());
            // Refresh connection flags and publish a deep copy
            let batch = {
                let mut local = local.lock();
                for handle in &handles {
                    let (attempted, connected) = handle.connection_flags();
                    if attempted {
                        if let Some(snapshot) = local.get_mut(&handle.config.id) {
                            snapshot.connected = Some(connected);
                        }
                    }
                }
                local.clone()
            };
            if ctx.publish.send(batch).is_err() {
                log::debug!("shard {}: merge channel closed, dropping publish", ctx.index);
            }
        }
    }

    log::info!("shard {}: shutting down", ctx.index);
    for (_, join) in sessions {
        let _ = join.join();
    }
    drop(event_tx);
    let _ = dispatcher.join();
    log::info!("shard {}: stopped", ctx.index);
}

fn spawn_session(
    ctx: &ShardContext,
    idx: usize,
    handle: &Arc<NodeHandle>,
    event_tx: &Sender<SessionEvent>,
) -> std::io::Result<JoinHandle<()>> {
    let session_ctx = SessionContext {
        node: Arc::clone(handle),
        controller: Arc::clone(&ctx.controllers[idx]),
        events: event_tx.clone(),
        alerts: ctx.alerts.clone(),
        catalog: Arc::clone(&ctx.catalog),
        settings: ctx.settings.session.clone(),
        shutdown: Arc::clone(&ctx.shutdown),
        shard_active: Arc::clone(&ctx.shard_active),
    };
    std::thread::Builder::new()
        .name(format!("session-{}", handle.config.id))
        .spawn(move || session::run(session_ctx))
}

fn spawn_dispatcher(
    ctx: &ShardContext,
    local: Arc<Mutex<HashMap<String, NodeSnapshot>>>,
    event_rx: Receiver<SessionEvent>,
) -> JoinHandle<()> {
    let ctx = ctx.clone();
    std::thread::Builder::new()
        .name(format!("shard-{}-dispatch", ctx.index))
        .spawn(move || {
            loop {
                match event_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(event) => {
                        let mut local = local.lock();
                        apply_event(&mut local, event, &ctx.catalog);
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if !ctx.active() {
                            break;
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("shard {}: dispatcher stopped", ctx.index);
        })
        .expect("failed to spawn shard dispatcher")
}

/// Apply one session event to the shard-local snapshot map
fn apply_event(
    local: &mut HashMap<String, NodeSnapshot>,
    event: SessionEvent,
    catalog: &SensorCatalog,
) {
    match event {
        SessionEvent::Seed { node, snapshot } => {
            local.insert(node, snapshot);
        }
        SessionEvent::SensorValue { node, name, value } => {
            let snapshot = local
                .entry(node)
                .or_insert_with(|| NodeSnapshot::unknown_from_catalog(catalog));
            match snapshot.sensors.get_mut(&name) {
                Some(reading) => reading.value = value,
                None => {
                    // Sensor outside the known set: keep it rather than
                    // crash, with type and scale undetermined
                    snapshot.sensors.insert(
                        name,
                        SensorReading {
                            value,
                            scale: 1.0,
                            kind: SensorKind::Unknown,
                        },
                    );
                }
            }
        }
        SessionEvent::NodeState { node, state } => {
            if let Some(snapshot) = local.get_mut(&node) {
                snapshot.node_state = Some(state);
            }
        }
        SessionEvent::Connected { node, connected } => {
            if let Some(snapshot) = local.get_mut(&node) {
                snapshot.connected = Some(connected);
            }
        }
        SessionEvent::Touch { node, at } => {
            if let Some(snapshot) = local.get_mut(&node) {
                snapshot.last_update = Some(at);
            }
        }
        SessionEvent::MarkStale { node } => {
            if let Some(snapshot) = local.get_mut(&node) {
                snapshot.mark_stale();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mock::MockController;

    const AMBIENT: &str = "/xyz/openbmc_project/sensors/temperature/ambient";

    fn rest_node(id: &str) -> NodeConfig {
        NodeConfig {
            id: id.to_string(),
            address: format!("bmc-{}", id),
            access: AccessType::Rest,
            username: Some("root".to_string()),
            password: Some("0penBmc".to_string()),
        }
    }

    #[test]
    fn test_apply_event_unknown_sensor_does_not_crash() {
        let catalog = SensorCatalog::new(&[]);
        let mut local = HashMap::new();
        apply_event(
            &mut local,
            SessionEvent::SensorValue {
                node: "cn1".to_string(),
                name: "surprise_sensor".to_string(),
                value: Some(7.0),
            },
            &catalog,
        );
        let reading = &local["cn1"].sensors["surprise_sensor"];
        assert_eq!(reading.value, Some(7.0));
        assert_eq!(reading.kind, SensorKind::Unknown);
    }

    #[test]
    fn test_apply_event_seed_then_update_and_stale() {
        let catalog = SensorCatalog::new(&[]);
        let mut local = HashMap::new();

        let mut seeded = NodeSnapshot::unknown_from_catalog(&catalog);
        seeded.connected = Some(true);
        apply_event(
            &mut local,
            SessionEvent::Seed {
                node: "cn1".to_string(),
                snapshot: seeded,
            },
            &catalog,
        );
        apply_event(
            &mut local,
            SessionEvent::SensorValue {
                node: "cn1".to_string(),
                name: "ambient".to_string(),
                value: Some(45.0),
            },
            &catalog,
        );
        assert_eq!(local["cn1"].sensors["ambient"].value, Some(45.0));

        apply_event(
            &mut local,
            SessionEvent::MarkStale {
                node: "cn1".to_string(),
            },
            &catalog,
        );
        assert_eq!(local["cn1"].sensors["ambient"].value, None);
        assert_eq!(local["cn1"].connected, Some(false));
    }

    /// A sensor update applied to a shard becomes visible in a published
    /// batch within one publish interval.
    #[test]
    fn test_update_visible_within_publish_interval() {
        let controller = MockController::new();
        controller.set_sensor(AMBIENT, Some(45.0), 0, "DegreesC");

        let (publish_tx, publish_rx) = unbounded();
        let (alert_tx, _alert_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let ctx = ShardContext {
            index: 0,
            partition: vec![rest_node("cn1")],
            controllers: vec![Arc::new(controller.clone()) as Arc<dyn ControllerClient>],
            publish: publish_tx,
            alerts: alert_tx,
            catalog: Arc::new(SensorCatalog::new(&[])),
            settings: ShardSettings {
                publish_interval: Duration::from_millis(50),
                supervise_interval: Duration::from_millis(50),
                session: SessionSettings {
                    retry_interval: Duration::from_millis(1),
                    push_recv_timeout: Duration::from_millis(5),
                    ..SessionSettings::default()
                },
            },
            shutdown: Arc::clone(&shutdown),
            shard_active: Arc::new(AtomicBool::new(true)),
        };

        let join = spawn(ctx).unwrap();

        // First publishes carry the seeded enumeration value
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut seen_seed = false;
        while Instant::now() < deadline {
            if let Ok(batch) = publish_rx.recv_timeout(Duration::from_millis(200)) {
                if batch["cn1"].sensors["ambient"].value == Some(45.0) {
                    seen_seed = true;
                    break;
                }
            }
        }
        assert!(seen_seed, "seeded value never published");

        // A pushed update must land in a published batch
        controller.push_message(
            &serde_json::json!({
                "interface": "xyz.openbmc_project.Sensor.Value",
                "path": AMBIENT,
                "properties": {"Value": 46.0}
            })
            .to_string(),
        );

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut seen_update = false;
        while Instant::now() < deadline {
            if let Ok(batch) = publish_rx.recv_timeout(Duration::from_millis(200)) {
                if batch["cn1"].sensors["ambient"].value == Some(46.0) {
                    assert_eq!(batch["cn1"].connected, Some(true));
                    seen_update = true;
                    break;
                }
            }
        }
        assert!(seen_update, "pushed update never published");

        shutdown.store(true, Ordering::Relaxed);
        join.join().unwrap();
    }
}
