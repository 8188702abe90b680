//! Shared sensor store and snapshot types
//!
//! Shards never touch this store directly: each shard keeps a private
//! snapshot map and periodically publishes a deep copy over a channel. The
//! consolidation task (owned by the streaming server) drains that channel and
//! merges entries here, replacing whole nodes at a time, so a reader can
//! never observe a node assembled from two different publish cycles.

mod catalog;

pub use catalog::{SensorCatalog, SensorKind, DEFAULT_SENSOR_PATHS};

use parking_lot::RwLock;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Unix timestamp in whole seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current value of one sensor
///
/// `value: None` means unknown: not yet read, or invalidated after a stale
/// connection was detected.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub value: Option<f64>,
    /// Multiplier to apply to `value` (10^scale-exponent as reported by the
    /// controller)
    pub scale: f64,
    pub kind: SensorKind,
}

impl SensorReading {
    /// Reading for a sensor that has never produced a value
    pub fn unknown(kind: SensorKind) -> Self {
        SensorReading {
            value: None,
            scale: kind.default_scale(),
            kind,
        }
    }
}

// Wire form: {"value": <num|null>, "scale": <num>, "type": [<category>, <unit>]}
impl Serialize for SensorReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("value", &self.value)?;
        map.serialize_entry("scale", &self.scale)?;
        map.serialize_entry("type", &(self.kind.as_str(), self.kind.unit()))?;
        map.end()
    }
}

/// Which sensors a snapshot view should include
///
/// Short names take precedence over kinds; with neither set the view is
/// unfiltered.
#[derive(Debug, Clone, Default)]
pub struct SensorSelection {
    /// Short sensor names to include
    pub names: Option<HashSet<String>>,
    /// Categories to include (unknown-typed sensors always pass)
    pub kinds: Option<HashSet<SensorKind>>,
}

impl SensorSelection {
    fn includes(&self, name: &str, reading: &SensorReading) -> bool {
        if let Some(names) = &self.names {
            return names.contains(name);
        }
        if let Some(kinds) = &self.kinds {
            return reading.kind == SensorKind::Unknown || kinds.contains(&reading.kind);
        }
        true
    }
}

/// Current sensor and status view of one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSnapshot {
    /// Short sensor name -> reading
    pub sensors: BTreeMap<String, SensorReading>,
    /// None until a first connection attempt has resolved
    pub connected: Option<bool>,
    pub node_state: Option<String>,
    /// Unix timestamp of the last message from this node
    pub last_update: Option<u64>,
}

impl NodeSnapshot {
    /// Snapshot with the full catalog present but every value unknown.
    ///
    /// Used as the placeholder for nodes that have not connected yet, so the
    /// sensor set a client sees is stable from the first frame on.
    pub fn unknown_from_catalog(catalog: &SensorCatalog) -> Self {
        let mut sensors = BTreeMap::new();
        for path in catalog.paths() {
            let kind = SensorCatalog::kind_of(path);
            sensors.insert(
                SensorCatalog::short_name(path).to_string(),
                SensorReading::unknown(kind),
            );
        }
        NodeSnapshot {
            sensors,
            ..Default::default()
        }
    }

    /// Invalidate every sensor value; live-looking data from a silent
    /// connection must not be served as current.
    pub fn mark_stale(&mut self) {
        for reading in self.sensors.values_mut() {
            reading.value = None;
        }
        self.connected = Some(false);
    }

    /// Render the (filtered) wire form of this node
    pub fn render(&self, selection: &SensorSelection) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, reading) in &self.sensors {
            if selection.includes(name, reading) {
                map.insert(name.clone(), serde_json::to_value(reading).unwrap_or_default());
            }
        }
        map.insert("LastUpdateReceived".to_string(), serde_json::json!(self.last_update));
        map.insert("Connected".to_string(), serde_json::json!(self.connected));
        map.insert("NodeState".to_string(), serde_json::json!(self.node_state));
        serde_json::Value::Object(map)
    }
}

/// The authoritative node-id -> snapshot mapping
///
/// Written only by [`SensorStore::merge`]; read concurrently by every client
/// handler.
#[derive(Debug, Default)]
pub struct SensorStore {
    inner: RwLock<HashMap<String, NodeSnapshot>>,
}

impl SensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a published batch, replacing each contained node wholesale
    pub fn merge(&self, batch: HashMap<String, NodeSnapshot>) {
        let mut inner = self.inner.write();
        for (node, snapshot) in batch {
            inner.insert(node, snapshot);
        }
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Render the full filtered snapshot payload, including `Time_Sent`
    pub fn render_filtered(&self, selection: &SensorSelection) -> serde_json::Value {
        let inner = self.inner.read();
        let mut map = serde_json::Map::new();
        for (node, snapshot) in inner.iter() {
            map.insert(node.clone(), snapshot.render(selection));
        }
        drop(inner);
        map.insert("Time_Sent".to_string(), serde_json::json!(unix_now()));
        serde_json::Value::Object(map)
    }
}
