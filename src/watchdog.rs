//! Supervising watchdog
//!
//! Monitors shard supervisors and the streaming server by their thread
//! handles and restarts whatever died: a shard with its original node
//! partition, the server rebinding the same port. While a unit is down,
//! clients keep seeing the last merged store contents, never an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A supervised unit: a live thread handle plus the recipe to start a
/// replacement
pub struct Unit {
    pub name: String,
    pub handle: Option<JoinHandle<()>>,
    /// Builds and spawns a fresh incarnation. Also responsible for fencing
    /// off the dead incarnation's leftover threads.
    pub respawn: Box<dyn FnMut() -> std::io::Result<JoinHandle<()>> + Send>,
}

impl Unit {
    pub fn new(
        name: &str,
        respawn: Box<dyn FnMut() -> std::io::Result<JoinHandle<()>> + Send>,
    ) -> Self {
        Unit {
            name: name.to_string(),
            handle: None,
            respawn,
        }
    }
}

/// The supervisory loop over all units
pub struct Watchdog {
    units: Vec<Unit>,
    shutdown: Arc<AtomicBool>,
    period: Duration,
}

impl Watchdog {
    pub fn new(units: Vec<Unit>, shutdown: Arc<AtomicBool>) -> Self {
        Watchdog {
            units,
            shutdown,
            period: Duration::from_secs(1),
        }
    }

    /// Start every unit, then supervise until shutdown
    pub fn run(mut self) {
        for unit in &mut self.units {
            match (unit.respawn)() {
                Ok(handle) => unit.handle = Some(handle),
                Err(e) => log::error!("failed to start {}: {}", unit.name, e),
            }
        }

        while !self.shutdown.load(Ordering::Relaxed) {
            for unit in &mut self.units {
                let dead = unit
                    .handle
                    .as_ref()
                    .map_or(true, |handle| handle.is_finished());
                if dead && !self.shutdown.load(Ordering::Relaxed) {
                    log::error!("{} died, restarting", unit.name);
                    if let Some(handle) = unit.handle.take() {
                        let _ = handle.join();
                    }
                    match (unit.respawn)() {
                        Ok(handle) => unit.handle = Some(handle),
                        // Keep retrying on the next tick (e.g. the port is
                        // not yet releasable)
                        Err(e) => log::error!("failed to restart {}: {}", unit.name, e),
                    }
                }
            }
            std::thread::sleep(self.period);
        }

        log::info!("watchdog shutting down, waiting for units");
        for unit in &mut self.units {
            if let Some(handle) = unit.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
