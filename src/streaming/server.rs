//! Client-facing streaming server
//!
//! One non-blocking TCP listener; every accepted client gets its own handler
//! thread. The consolidation task that feeds the shared [`SensorStore`] from
//! the shards' publish channel also lives here, so the store keeps its last
//! merged contents even while the accept loop is being restarted.

use crate::error::Result;
use crate::fleet::PollReference;
use crate::store::{NodeSnapshot, SensorCatalog, SensorStore};
use crate::streaming::client::{ClientHandler, ClientSettings};
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Snapshot streaming server
pub struct StreamingServer {
    listener: TcpListener,
}

impl StreamingServer {
    /// Bind the listener; the accept loop starts with [`StreamingServer::spawn`]
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        log::info!("telemetry streaming listening on {}", addr);
        Ok(StreamingServer { listener })
    }

    /// Actual bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Spawn the accept loop thread
    pub fn spawn(
        self,
        store: Arc<SensorStore>,
        catalog: Arc<SensorCatalog>,
        settings: ClientSettings,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("stream-server".to_string())
            .spawn(move || accept_loop(self.listener, store, catalog, settings, shutdown))
    }
}

fn accept_loop(
    listener: TcpListener,
    store: Arc<SensorStore>,
    catalog: Arc<SensorCatalog>,
    settings: ClientSettings,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    log::warn!("failed to set blocking mode for client {}: {}", addr, e);
                    continue;
                }
                let handler = ClientHandler {
                    store: Arc::clone(&store),
                    catalog: Arc::clone(&catalog),
                    settings: settings.clone(),
                    shutdown: Arc::clone(&shutdown),
                };
                let spawned = std::thread::Builder::new()
                    .name("stream-client".to_string())
                    .spawn(move || handler.run(stream, addr));
                if let Err(e) = spawned {
                    log::error!("failed to spawn handler for client {}: {}", addr, e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // No connection pending
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                log::error!("accept error: {}", e);
            }
        }
    }
    log::info!("streaming server stopped");
}

/// Spawn the consolidation task: drain published shard snapshots into the
/// store with whole-node replacement.
pub fn spawn_consolidator(
    store: Arc<SensorStore>,
    publish_rx: Receiver<HashMap<String, NodeSnapshot>>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("store-merge".to_string())
        .spawn(move || {
            loop {
                match publish_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(batch) => store.merge(batch),
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("consolidation task stopped");
        })
}

/// Spawn the alert side-channel drain.
///
/// Poll references are consumed by the external alert-polling subsystem;
/// this forwarder is the integration point and keeps the queue from growing
/// when no consumer is attached.
pub fn spawn_alert_forwarder(
    alert_rx: Receiver<PollReference>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("alert-forward".to_string())
        .spawn(move || {
            loop {
                match alert_rx.recv_timeout(Duration::from_millis(500)) {
                    Ok(reference) => {
                        log::debug!("poll reference for {}", reference.node_id);
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        })
}
