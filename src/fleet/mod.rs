//! Fleet model: node roster, per-node connection state, shard partitioning
//!
//! A [`NodeHandle`] is the single place a node's connection flags live. The
//! node's own session thread and its shard supervisor are the only writers;
//! the reconnect throttle and the down-escalation latch are enforced here so
//! a restarted session thread can never bypass them.

pub mod session;
pub mod shard;

use crate::error::Error;
use crate::store::NodeSnapshot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How the node's controller is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    /// Session-based REST interface with websocket push
    Rest,
    /// Out-of-band management protocol; poll-only
    Ipmi,
}

/// One roster entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Cluster-facing node name, used as the snapshot key
    pub id: String,
    /// Controller hostname or IP
    pub address: String,
    pub access: AccessType,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Connection flags for one node
#[derive(Debug)]
struct NodeStatus {
    connected: bool,
    connecting: bool,
    down: bool,
    retry_count: u32,
    /// Reconnect throttle gate; `None` means an attempt may start now
    next_attempt: Option<Instant>,
    last_message: Instant,
    /// Set once any connection attempt has resolved, so snapshots can
    /// distinguish "no data yet" from "offline"
    attempted: bool,
    last_error: Option<String>,
}

/// A node plus its mutable connection state
#[derive(Debug)]
pub struct NodeHandle {
    pub config: NodeConfig,
    status: Mutex<NodeStatus>,
}

impl NodeHandle {
    pub fn new(config: NodeConfig) -> Self {
        NodeHandle {
            config,
            status: Mutex::new(NodeStatus {
                connected: false,
                connecting: false,
                down: false,
                retry_count: 0,
                next_attempt: None,
                last_message: Instant::now(),
                attempted: false,
                last_error: None,
            }),
        }
    }

    /// Whether the reconnect throttle allows an attempt now
    pub fn attempt_due(&self) -> bool {
        let status = self.status.lock();
        status.next_attempt.map_or(true, |at| Instant::now() >= at)
    }

    pub fn begin_attempt(&self) {
        self.status.lock().connecting = true;
    }

    /// Record a failed connect/stream episode.
    ///
    /// Returns `true` exactly when this failure crosses the retry threshold
    /// and latches the node down; the caller owns the single escalation log.
    pub fn record_failure(&self, err: &Error, retry_limit: u32, retry_interval: Duration) -> bool {
        let mut status = self.status.lock();
        status.connecting = false;
        status.connected = false;
        status.attempted = true;
        status.retry_count += 1;
        status.next_attempt = Some(Instant::now() + retry_interval);
        status.last_error = Some(err.to_string());
        if status.retry_count > retry_limit && !status.down {
            status.down = true;
            return true;
        }
        false
    }

    /// Record a successful subscription.
    ///
    /// Clears the down latch and the retry counter; the counter resets only
    /// here, never on a timer. Returns `true` when this ends a down episode.
    pub fn record_connected(&self) -> bool {
        let mut status = self.status.lock();
        status.connected = true;
        status.connecting = false;
        status.attempted = true;
        status.retry_count = 0;
        status.next_attempt = None;
        status.last_message = Instant::now();
        status.last_error = None;
        let was_down = status.down;
        status.down = false;
        was_down
    }

    /// Note message arrival on the push channel
    pub fn touch(&self) {
        self.status.lock().last_message = Instant::now();
    }

    /// A live connection that has gone silent past the window
    pub fn is_stale(&self, window: Duration) -> bool {
        let status = self.status.lock();
        status.connected && status.last_message.elapsed() > window
    }

    pub fn is_connected(&self) -> bool {
        self.status.lock().connected
    }

    pub fn is_down(&self) -> bool {
        self.status.lock().down
    }

    pub fn retry_count(&self) -> u32 {
        self.status.lock().retry_count
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.lock().last_error.clone()
    }

    /// (attempted, connected) pair for snapshot refresh
    pub fn connection_flags(&self) -> (bool, bool) {
        let status = self.status.lock();
        (status.attempted, status.connected)
    }
}

/// Reference handed to the alert-polling side when a node produced a push
/// event worth polling for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReference {
    pub node_id: String,
}

/// Updates flowing from session threads to the shard dispatcher
#[derive(Debug)]
pub enum SessionEvent {
    /// Replace the node's snapshot wholesale (initial seed / re-seed)
    Seed { node: String, snapshot: NodeSnapshot },
    /// In-place sensor value update
    SensorValue {
        node: String,
        name: String,
        value: Option<f64>,
    },
    NodeState { node: String, state: String },
    Connected { node: String, connected: bool },
    /// Message arrival timestamp (unix seconds)
    Touch { node: String, at: u64 },
    /// Null every sensor value; the connection went silent
    MarkStale { node: String },
}

/// Split the roster into ordered shard partitions of at most `shard_size`
/// nodes.
///
/// Computed once at startup; a restarted shard reuses its original partition
/// verbatim.
pub fn partition_nodes(roster: &[NodeConfig], shard_size: usize) -> Vec<Vec<NodeConfig>> {
    assert!(shard_size > 0, "shard size must be positive");
    roster
        .chunks(shard_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeConfig {
        NodeConfig {
            id: id.to_string(),
            address: format!("bmc-{}", id),
            access: AccessType::Rest,
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_partition_counts() {
        let roster: Vec<NodeConfig> = (0..101).map(|i| node(&format!("cn{}", i))).collect();
        let partitions = partition_nodes(&roster, 50);
        // ceil(101 / 50) = 3
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].len(), 50);
        assert_eq!(partitions[2].len(), 1);

        // Every node appears exactly once
        let mut seen: Vec<&str> = partitions
            .iter()
            .flatten()
            .map(|n| n.id.as_str())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), roster.len());
    }

    #[test]
    fn test_partition_exact_multiple() {
        let roster: Vec<NodeConfig> = (0..100).map(|i| node(&format!("cn{}", i))).collect();
        assert_eq!(partition_nodes(&roster, 50).len(), 2);
    }

    #[test]
    fn test_down_latches_exactly_once() {
        let handle = NodeHandle::new(node("cn1"));
        let interval = Duration::from_millis(1);

        let mut escalations = 0;
        for _ in 0..10 {
            if handle.record_failure(&Error::Timeout, 3, interval) {
                escalations += 1;
            }
        }
        // 4th failure crosses the threshold; later failures stay silent
        assert_eq!(escalations, 1);
        assert!(handle.is_down());
        assert_eq!(handle.retry_count(), 10);

        // Recovery clears the latch and the counter
        assert!(handle.record_connected());
        assert!(!handle.is_down());
        assert_eq!(handle.retry_count(), 0);
        assert!(handle.is_connected());

        // A fresh failure episode escalates again, once
        let mut escalations = 0;
        for _ in 0..6 {
            if handle.record_failure(&Error::Timeout, 3, interval) {
                escalations += 1;
            }
        }
        assert_eq!(escalations, 1);
    }

    #[test]
    fn test_reconnects_throttled() {
        let handle = NodeHandle::new(node("cn1"));
        assert!(handle.attempt_due());
        handle.record_failure(&Error::Timeout, 3, Duration::from_secs(30));
        assert!(!handle.attempt_due());

        // A short interval elapses and the gate opens again
        let quick = NodeHandle::new(node("cn2"));
        quick.record_failure(&Error::Timeout, 3, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(10));
        assert!(quick.attempt_due());
    }

    #[test]
    fn test_staleness_window() {
        let handle = NodeHandle::new(node("cn1"));
        // Not stale while disconnected
        assert!(!handle.is_stale(Duration::from_millis(0)));
        handle.record_connected();
        assert!(!handle.is_stale(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(handle.is_stale(Duration::from_millis(1)));
        handle.touch();
        assert!(!handle.is_stale(Duration::from_millis(1)));
    }
}
