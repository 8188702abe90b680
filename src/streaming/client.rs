//! Per-client snapshot streaming handler
//!
//! Each accepted connection gets one handler thread. The handler pushes a
//! filtered snapshot frame at the client's cadence and, between ticks, reads
//! inbound filter frames with a short socket timeout. A client can never
//! affect another client or the store: all subscription state lives on this
//! thread's stack.

use crate::error::Error;
use crate::store::{SensorCatalog, SensorStore};
use crate::streaming::filter::ClientFilter;
use crate::streaming::wire::{read_frame, write_frame};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-connection streaming settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Server poll granularity; also the minimum served cadence
    pub tick: Duration,
    /// Cadence before the client sends any filter frame
    pub default_cadence: Duration,
}

/// Handler context for one client connection
pub struct ClientHandler {
    pub store: Arc<SensorStore>,
    pub catalog: Arc<SensorCatalog>,
    pub settings: ClientSettings,
    pub shutdown: Arc<AtomicBool>,
}

impl ClientHandler {
    /// Run the streaming loop until disconnect or shutdown
    pub fn run(self, mut stream: TcpStream, addr: SocketAddr) {
        log::info!("telemetry streaming connected to {}", addr);

        // The read timeout paces the loop at the server tick
        if let Err(e) = stream.set_read_timeout(Some(self.settings.tick)) {
            log::warn!("failed to set read timeout for {}: {}", addr, e);
        }
        if let Err(e) = stream.set_write_timeout(Some(Duration::from_secs(10))) {
            log::warn!("failed to set write timeout for {}: {}", addr, e);
        }

        let mut filter = ClientFilter::new(self.settings.default_cadence.max(self.settings.tick));
        let mut last_sent: Option<Instant> = None;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let due = last_sent.map_or(true, |sent| sent.elapsed() >= filter.cadence());
            if due {
                let payload = self.store.render_filtered(&filter.selection());
                let bytes = match serde_json::to_vec(&payload) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::error!("failed to serialize snapshot for {}: {}", addr, e);
                        break;
                    }
                };
                if let Err(e) = write_frame(&mut stream, &bytes) {
                    log::info!("client {} went away during send: {}", addr, e);
                    break;
                }
                last_sent = Some(Instant::now());
            }

            match read_frame(&mut stream) {
                Ok(Some(frame)) => {
                    filter.apply_frame(&frame, &self.catalog, self.settings.tick)
                }
                Ok(None) => {}
                Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::info!("client {} disconnected", addr);
                    break;
                }
                Err(e) => {
                    log::info!("closing client {}: {}", addr, e);
                    break;
                }
            }
        }

        let _ = stream.shutdown(std::net::Shutdown::Both);
        log::info!("telemetry streaming stopped for {}", addr);
    }
}
