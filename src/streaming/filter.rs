//! Per-client subscription filter state
//!
//! Each connected client owns one [`ClientFilter`], updated from inbound
//! filter frames. Validation is per field: a field that fails validation is
//! logged and leaves that dimension of the previous filter in effect, so a
//! bad frame can never knock out a working subscription.

use crate::store::{SensorCatalog, SensorKind, SensorSelection};
use std::collections::HashSet;
use std::time::Duration;

/// Filter and cadence state for one client connection
#[derive(Debug, Clone)]
pub struct ClientFilter {
    /// Resolved full sensor paths; highest priority
    names: Option<Vec<String>>,
    kinds: Option<Vec<SensorKind>>,
    cadence: Duration,
}

impl ClientFilter {
    pub fn new(default_cadence: Duration) -> Self {
        ClientFilter {
            names: None,
            kinds: None,
            cadence: default_cadence,
        }
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Snapshot view selector for the current filter
    pub fn selection(&self) -> SensorSelection {
        SensorSelection {
            names: self.names.as_ref().map(|names| {
                names
                    .iter()
                    .map(|path| SensorCatalog::short_name(path).to_string())
                    .collect::<HashSet<_>>()
            }),
            kinds: self
                .kinds
                .as_ref()
                .map(|kinds| kinds.iter().copied().collect()),
        }
    }

    /// Apply one inbound filter frame.
    ///
    /// `floor` is the server's own poll granularity; cadences below it are
    /// served at the floor.
    pub fn apply_frame(&mut self, raw: &[u8], catalog: &SensorCatalog, floor: Duration) {
        let parsed: serde_json::Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("ignoring unparseable filter frame: {}", e);
                return;
            }
        };
        let object = match parsed.as_object() {
            Some(o) => o,
            None => {
                log::warn!("ignoring filter frame that is not a JSON object");
                return;
            }
        };

        if let Some(frequency) = object.get("frequency") {
            self.apply_frequency(frequency, floor);
        }
        if let Some(names) = object.get("sensornames") {
            self.apply_names(names, catalog);
        }
        if let Some(kinds) = object.get("sensortypes") {
            self.apply_kinds(kinds);
        }
    }

    fn apply_frequency(&mut self, value: &serde_json::Value, floor: Duration) {
        // Numeric strings are tolerated; anything else is rejected
        let seconds = match value {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        match seconds {
            Some(s) if s > 0 => {
                self.cadence = Duration::from_secs(s as u64).max(floor);
            }
            _ => log::warn!("{} is not a valid frequency", value),
        }
    }

    fn apply_names(&mut self, value: &serde_json::Value, catalog: &SensorCatalog) {
        let list = match value.as_array() {
            Some(list) => list,
            None => {
                log::warn!("{} is not a valid list of sensor names", value);
                return;
            }
        };
        let mut resolved = Vec::new();
        for entry in list {
            let name = match entry.as_str() {
                Some(name) => name,
                None => {
                    log::warn!("{} is not a valid sensor name", entry);
                    continue;
                }
            };
            match catalog.resolve(name) {
                Some(path) => resolved.push(path.to_string()),
                None => log::warn!("{} is not a valid sensor name", name),
            }
        }
        // Nothing valid survived: fall back to no name filter at all
        self.names = if resolved.is_empty() {
            None
        } else {
            Some(resolved)
        };
    }

    fn apply_kinds(&mut self, value: &serde_json::Value) {
        let list = match value.as_array() {
            Some(list) => list,
            None => {
                log::warn!("{} is not a valid list of sensor types", value);
                return;
            }
        };
        let mut kinds = Vec::new();
        for entry in list {
            match entry.as_str().and_then(SensorKind::parse) {
                Some(kind) => kinds.push(kind),
                None => log::warn!("{} is not a valid sensor type", entry),
            }
        }
        self.kinds = if kinds.is_empty() { None } else { Some(kinds) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: Duration = Duration::from_millis(300);

    fn filter() -> ClientFilter {
        ClientFilter::new(Duration::from_millis(1000))
    }

    fn catalog() -> SensorCatalog {
        SensorCatalog::new(&[])
    }

    #[test]
    fn test_frequency_update_and_string_coercion() {
        let mut f = filter();
        f.apply_frame(br#"{"frequency": 2}"#, &catalog(), FLOOR);
        assert_eq!(f.cadence(), Duration::from_secs(2));

        f.apply_frame(br#"{"frequency": "5"}"#, &catalog(), FLOOR);
        assert_eq!(f.cadence(), Duration::from_secs(5));

        // Invalid frequency keeps the previous cadence
        f.apply_frame(br#"{"frequency": "fast"}"#, &catalog(), FLOOR);
        assert_eq!(f.cadence(), Duration::from_secs(5));
        f.apply_frame(br#"{"frequency": 0}"#, &catalog(), FLOOR);
        assert_eq!(f.cadence(), Duration::from_secs(5));
    }

    #[test]
    fn test_names_resolved_and_unknown_dropped() {
        let mut f = filter();
        f.apply_frame(
            br#"{"sensornames": ["ambient", "no_such_sensor", "total_power"]}"#,
            &catalog(),
            FLOOR,
        );
        let selection = f.selection();
        let names = selection.names.unwrap();
        assert!(names.contains("ambient"));
        assert!(names.contains("total_power"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_all_unknown_names_falls_back_to_unfiltered() {
        let mut f = filter();
        f.apply_frame(br#"{"sensornames": ["bogus1", "bogus2"]}"#, &catalog(), FLOOR);
        assert!(f.selection().names.is_none());
    }

    #[test]
    fn test_malformed_names_keeps_previous_filter() {
        let mut f = filter();
        f.apply_frame(br#"{"sensornames": ["ambient"]}"#, &catalog(), FLOOR);
        assert!(f.selection().names.is_some());

        // Scenario: "sensornames" is a bare string, not a list
        f.apply_frame(br#"{"sensornames": "not-a-list"}"#, &catalog(), FLOOR);
        let selection = f.selection();
        assert!(selection.names.unwrap().contains("ambient"));
        assert_eq!(f.cadence(), Duration::from_millis(1000));
    }

    #[test]
    fn test_types_validated() {
        let mut f = filter();
        f.apply_frame(
            br#"{"sensortypes": ["temperature", "warp_field", "power"]}"#,
            &catalog(),
            FLOOR,
        );
        let kinds = f.selection().kinds.unwrap();
        assert!(kinds.contains(&SensorKind::Temperature));
        assert!(kinds.contains(&SensorKind::Power));
        assert_eq!(kinds.len(), 2);

        // All invalid: dimension cleared
        f.apply_frame(br#"{"sensortypes": ["warp_field"]}"#, &catalog(), FLOOR);
        assert!(f.selection().kinds.is_none());
    }

    #[test]
    fn test_garbage_frame_ignored_entirely() {
        let mut f = filter();
        f.apply_frame(br#"{"frequency": 3}"#, &catalog(), FLOOR);
        f.apply_frame(b"not json at all", &catalog(), FLOOR);
        f.apply_frame(br#"[1, 2, 3]"#, &catalog(), FLOOR);
        assert_eq!(f.cadence(), Duration::from_secs(3));
    }
}
