//! Per-node session state machine
//!
//! One session thread owns one node's push subscription:
//! disconnected -> connecting -> authenticated -> streaming, back to
//! disconnected on any error. The thread applies the bounded-retry policy on
//! the shared [`NodeHandle`] and feeds updates to the shard dispatcher as
//! [`SessionEvent`]s; it never touches shard or global state directly.

use crate::controller::{ControllerClient, ControllerSession, PowerState, PushChannel, SubscribeRequest};
use crate::error::{Error, Result};
use crate::fleet::{NodeHandle, PollReference, SessionEvent};
use crate::store::{unix_now, NodeSnapshot, SensorCatalog, SensorReading};
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tuning shared by every session in a shard
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub stale_window: Duration,
    pub retry_limit: u32,
    pub retry_interval: Duration,
    /// Push-channel receive timeout; bounds shutdown latency
    pub push_recv_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            stale_window: Duration::from_secs(60),
            retry_limit: 3,
            retry_interval: Duration::from_secs(30),
            push_recv_timeout: Duration::from_millis(500),
        }
    }
}

/// Everything a session thread needs; cheap to clone per spawn
#[derive(Clone)]
pub struct SessionContext {
    pub node: Arc<NodeHandle>,
    pub controller: Arc<dyn ControllerClient>,
    pub events: Sender<SessionEvent>,
    pub alerts: Sender<PollReference>,
    pub catalog: Arc<SensorCatalog>,
    pub settings: SessionSettings,
    /// Process-wide shutdown flag
    pub shutdown: Arc<AtomicBool>,
    /// Cleared when this shard incarnation is being replaced
    pub shard_active: Arc<AtomicBool>,
}

impl SessionContext {
    fn active(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed) && self.shard_active.load(Ordering::Relaxed)
    }

    fn node_id(&self) -> &str {
        &self.node.config.id
    }
}

/// What the message dispatcher asks the stream loop to do next
enum Action {
    Continue,
    /// Power or enclosure-controller state changed; the push interface may
    /// behave differently now, so the channel must be reopened
    Resubscribe,
}

/// Session thread body: connect, stream, back off, repeat until shutdown
pub fn run(ctx: SessionContext) {
    let request = SubscribeRequest::standard(ctx.catalog.paths());

    while ctx.active() {
        if !ctx.node.attempt_due() {
            std::thread::sleep(Duration::from_millis(200));
            continue;
        }
        ctx.node.begin_attempt();

        match establish(&ctx, &request) {
            Ok((mut session, mut channel)) => {
                if ctx.node.record_connected() {
                    log::info!("{}: reconnected, clearing down state", ctx.node_id());
                } else {
                    log::info!("{}: telemetry subscription established", ctx.node_id());
                }

                let outcome = stream(&ctx, session.as_mut(), &mut channel, &request);

                channel.close();
                if let Err(e) = session.logout() {
                    log::debug!("{}: logout failed: {}", ctx.node_id(), e);
                }

                match outcome {
                    Ok(()) => break,
                    Err(e) => fail(&ctx, e),
                }
            }
            Err(e) => fail(&ctx, e),
        }
    }

    log::debug!("{}: session thread exiting", ctx.node_id());
}

/// Login, seed the snapshot from a one-shot enumeration, open the push
/// channel.
fn establish(
    ctx: &SessionContext,
    request: &SubscribeRequest,
) -> Result<(Box<dyn ControllerSession>, Box<dyn PushChannel>)> {
    let mut session = ctx.controller.login()?;

    let probes = match session.enumerate_sensors() {
        Ok(probes) => probes,
        Err(e) => {
            let _ = session.logout();
            return Err(e);
        }
    };
    // Power state is informational; an unreadable state must not cost the
    // session
    let power = session.power_state().unwrap_or(PowerState::Unknown);

    let channel = match session.subscribe(request) {
        Ok(channel) => channel,
        Err(e) => {
            let _ = session.logout();
            return Err(e);
        }
    };

    let snapshot = seed_snapshot(&ctx.catalog, &probes, power);
    let _ = ctx.events.send(SessionEvent::Seed {
        node: ctx.node_id().to_string(),
        snapshot,
    });

    Ok((session, channel))
}

/// Build the node's initial snapshot from an enumeration result.
///
/// Every catalog sensor is present afterwards: enumerated ones carry their
/// raw value and 10^scale multiplier, the rest stay unknown with the
/// category-default scale. Clients therefore see a stable sensor set per
/// node from the first frame on.
fn seed_snapshot(
    catalog: &SensorCatalog,
    probes: &HashMap<String, crate::controller::SensorProbe>,
    power: PowerState,
) -> NodeSnapshot {
    let mut snapshot = NodeSnapshot::unknown_from_catalog(catalog);
    for (path, probe) in probes {
        if path.contains("PowerSupplyRedundancy") {
            continue;
        }
        let name = SensorCatalog::short_name(path);
        if let Some(reading) = snapshot.sensors.get_mut(name) {
            let kind = SensorCatalog::kind_of(path);
            *reading = SensorReading {
                value: probe.value,
                scale: probe
                    .scale
                    .map(|s| 10f64.powi(s))
                    .unwrap_or_else(|| kind.default_scale()),
                kind,
            };
        }
    }
    snapshot.connected = Some(true);
    snapshot.node_state = Some(power.as_str().to_string());
    snapshot.last_update = Some(unix_now());
    snapshot
}

/// Streaming loop: deliver push messages until shutdown, staleness, or a
/// dead channel.
fn stream(
    ctx: &SessionContext,
    session: &mut dyn ControllerSession,
    channel: &mut Box<dyn PushChannel>,
    request: &SubscribeRequest,
) -> Result<()> {
    loop {
        if !ctx.active() {
            return Ok(());
        }
        if ctx.node.is_stale(ctx.settings.stale_window) {
            log::warn!(
                "{}: no messages within {:?}, recycling connection",
                ctx.node_id(),
                ctx.settings.stale_window
            );
            let _ = ctx.events.send(SessionEvent::MarkStale {
                node: ctx.node_id().to_string(),
            });
            return Err(Error::StaleConnection);
        }

        match channel.recv(ctx.settings.push_recv_timeout) {
            Ok(Some(raw)) => {
                ctx.node.touch();
                let _ = ctx.events.send(SessionEvent::Touch {
                    node: ctx.node_id().to_string(),
                    at: unix_now(),
                });
                match dispatch(ctx, &raw) {
                    Action::Continue => {}
                    Action::Resubscribe => {
                        channel.close();
                        *channel = session.subscribe(request)?;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => return Err(e),
        }
    }
}

/// Classify one raw push payload and turn it into events
fn dispatch(ctx: &SessionContext, raw: &str) -> Action {
    let node = ctx.node_id().to_string();
    let parsed: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("{}: undecodable push payload ({})", node, e);
            return Action::Continue;
        }
    };
    let path = parsed.get("path").and_then(|p| p.as_str()).unwrap_or("");
    let interface = parsed
        .get("interface")
        .and_then(|i| i.as_str())
        .unwrap_or("");

    if interface == "xyz.openbmc_project.Sensor.Value" || path.contains("/sensors/") {
        if let Some(value) = parsed.pointer("/properties/Value") {
            let _ = ctx.events.send(SessionEvent::SensorValue {
                node,
                name: SensorCatalog::short_name(path).to_string(),
                value: value.as_f64(),
            });
        }
        Action::Continue
    } else if interface == "xyz.openbmc_project.Logging.Entry" || path.contains("/logging") {
        // Log contents are the alert pipeline's business, not ours
        let _ = ctx.alerts.send(PollReference { node_id: node });
        Action::Continue
    } else if interface == "xyz.openbmc_project.State.Host"
        || parsed.pointer("/properties/CurrentHostState").is_some()
    {
        let state = parsed
            .pointer("/properties/CurrentHostState")
            .and_then(|s| s.as_str())
            .map(|s| s.rsplit('.').next().unwrap_or(s).to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        log::info!("{}: host state changed to {}, resubscribing", node, state);
        let _ = ctx.events.send(SessionEvent::NodeState { node, state });
        Action::Resubscribe
    } else if interface == "org.open_power.OCC.Status"
        || parsed.pointer("/properties/OccActive").is_some()
    {
        let occ_active = parsed
            .pointer("/properties/OccActive")
            .and_then(|a| a.as_bool())
            .unwrap_or(false);
        let state = if occ_active { "OccActive" } else { "OccInactive" };
        log::info!(
            "{}: enclosure controller state changed to {}, resubscribing",
            node,
            state
        );
        let _ = ctx.events.send(SessionEvent::NodeState {
            node,
            state: state.to_string(),
        });
        Action::Resubscribe
    } else {
        log::debug!(
            "{}: unrecognized push topic (path: {:?}), forwarding poll reference",
            node,
            path
        );
        let _ = ctx.alerts.send(PollReference { node_id: node });
        Action::Continue
    }
}

/// Failure path: classify, throttle, escalate at most once per episode
fn fail(ctx: &SessionContext, err: Error) {
    let _ = ctx.events.send(SessionEvent::Connected {
        node: ctx.node_id().to_string(),
        connected: false,
    });
    let escalated = ctx.node.record_failure(
        &err,
        ctx.settings.retry_limit,
        ctx.settings.retry_interval,
    );
    if escalated {
        log::error!(
            "{}: failed to reconnect more than {} times, marking node down (last error: {})",
            ctx.node_id(),
            ctx.settings.retry_limit,
            err
        );
    } else {
        log::debug!("{}: connection attempt failed: {}", ctx.node_id(), err);
    }
}
