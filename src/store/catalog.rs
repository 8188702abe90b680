//! Sensor taxonomy and the known sensor-path set
//!
//! The controller exposes sensors under category-typed paths
//! (`.../sensors/<category>/<name>`). The category set is fixed; the path set
//! below is the stock catalog for the supported machine type and can be
//! overridden from the configuration file.

use serde::{Deserialize, Serialize};

/// Fixed sensor categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Current,
    FanTach,
    Power,
    Temperature,
    Voltage,
    /// Sensor arrived outside the known catalog; category undetermined
    Unknown,
}

impl SensorKind {
    /// Parse a category from its wire spelling
    pub fn parse(name: &str) -> Option<SensorKind> {
        match name {
            "current" => Some(SensorKind::Current),
            "fan_tach" => Some(SensorKind::FanTach),
            "power" => Some(SensorKind::Power),
            "temperature" => Some(SensorKind::Temperature),
            "voltage" => Some(SensorKind::Voltage),
            _ => None,
        }
    }

    /// Wire spelling of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Current => "current",
            SensorKind::FanTach => "fan_tach",
            SensorKind::Power => "power",
            SensorKind::Temperature => "temperature",
            SensorKind::Voltage => "voltage",
            SensorKind::Unknown => "unknown",
        }
    }

    /// Display unit for the category
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Current => "Amperes",
            SensorKind::FanTach => "RPMS",
            SensorKind::Power => "Watts",
            SensorKind::Temperature => "DegreesC",
            SensorKind::Voltage => "Volts",
            SensorKind::Unknown => "unknown",
        }
    }

    /// Multiplier assumed when the controller never reported a scale for a
    /// sensor of this category
    pub fn default_scale(&self) -> f64 {
        match self {
            SensorKind::FanTach => 1.0,
            SensorKind::Power => 1e-6,
            _ => 1e-3,
        }
    }
}

/// Known sensor paths plus resolution helpers
#[derive(Debug, Clone)]
pub struct SensorCatalog {
    paths: Vec<String>,
}

impl SensorCatalog {
    /// Build a catalog from configured paths, falling back to the stock set
    pub fn new(configured: &[String]) -> Self {
        let paths = if configured.is_empty() {
            DEFAULT_SENSOR_PATHS.iter().map(|p| p.to_string()).collect()
        } else {
            configured.to_vec()
        };
        SensorCatalog { paths }
    }

    /// All known sensor paths
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Category of a sensor path (second-to-last path segment)
    pub fn kind_of(path: &str) -> SensorKind {
        let mut parts = path.rsplit('/');
        parts.next();
        parts
            .next()
            .and_then(SensorKind::parse)
            .unwrap_or(SensorKind::Unknown)
    }

    /// Short sensor name (last path segment)
    pub fn short_name(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Resolve a client-supplied name (short or full) to a known full path.
    ///
    /// Substring matching, first match wins, mirroring how clients have
    /// always been allowed to pass bare sensor names.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if name.is_empty() {
            return None;
        }
        self.paths
            .iter()
            .find(|full| full.contains(name))
            .map(|s| s.as_str())
    }
}

/// Stock sensor catalog for the supported machine type
pub const DEFAULT_SENSOR_PATHS: &[&str] = &[
    "/xyz/openbmc_project/sensors/current/ps0_output_current",
    "/xyz/openbmc_project/sensors/current/ps1_output_current",
    "/xyz/openbmc_project/sensors/fan_tach/fan0_0",
    "/xyz/openbmc_project/sensors/fan_tach/fan0_1",
    "/xyz/openbmc_project/sensors/fan_tach/fan1_0",
    "/xyz/openbmc_project/sensors/fan_tach/fan1_1",
    "/xyz/openbmc_project/sensors/fan_tach/fan2_0",
    "/xyz/openbmc_project/sensors/fan_tach/fan2_1",
    "/xyz/openbmc_project/sensors/fan_tach/fan3_0",
    "/xyz/openbmc_project/sensors/fan_tach/fan3_1",
    "/xyz/openbmc_project/sensors/power/fan_disk_power",
    "/xyz/openbmc_project/sensors/power/io_power",
    "/xyz/openbmc_project/sensors/power/p0_gpu0_power",
    "/xyz/openbmc_project/sensors/power/p0_gpu1_power",
    "/xyz/openbmc_project/sensors/power/p0_gpu2_power",
    "/xyz/openbmc_project/sensors/power/p0_io_power",
    "/xyz/openbmc_project/sensors/power/p0_mem_power",
    "/xyz/openbmc_project/sensors/power/p0_power",
    "/xyz/openbmc_project/sensors/power/p1_gpu0_power",
    "/xyz/openbmc_project/sensors/power/p1_gpu1_power",
    "/xyz/openbmc_project/sensors/power/p1_gpu2_power",
    "/xyz/openbmc_project/sensors/power/p1_io_power",
    "/xyz/openbmc_project/sensors/power/p1_mem_power",
    "/xyz/openbmc_project/sensors/power/p1_power",
    "/xyz/openbmc_project/sensors/power/ps0_input_power",
    "/xyz/openbmc_project/sensors/power/ps1_input_power",
    "/xyz/openbmc_project/sensors/power/total_power",
    "/xyz/openbmc_project/sensors/temperature/ambient",
    "/xyz/openbmc_project/sensors/temperature/dimm0_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm1_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm10_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm11_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm12_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm13_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm14_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm15_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm2_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm3_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm4_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm5_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm6_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm7_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm8_temp",
    "/xyz/openbmc_project/sensors/temperature/dimm9_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu0_core_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu0_mem_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu1_core_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu1_mem_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu2_core_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu2_mem_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu3_core_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu3_mem_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu4_core_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu4_mem_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu5_core_temp",
    "/xyz/openbmc_project/sensors/temperature/gpu5_mem_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core0_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core1_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core10_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core11_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core12_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core13_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core14_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core15_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core18_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core19_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core2_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core20_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core21_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core22_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core23_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core3_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core4_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core5_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core6_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core7_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core8_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_core9_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_vcs_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_vdd_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_vddr_temp",
    "/xyz/openbmc_project/sensors/temperature/p0_vdn_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core0_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core1_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core10_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core11_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core12_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core13_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core14_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core16_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core17_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core18_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core19_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core2_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core20_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core22_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core23_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core3_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core4_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core5_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core6_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core7_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core8_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_core9_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_vcs_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_vdd_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_vddr_temp",
    "/xyz/openbmc_project/sensors/temperature/p1_vdn_temp",
    "/xyz/openbmc_project/sensors/temperature/pcie",
    "/xyz/openbmc_project/sensors/voltage/ps0_input_voltage",
    "/xyz/openbmc_project/sensors/voltage/ps0_output_voltage",
    "/xyz/openbmc_project/sensors/voltage/ps1_input_voltage",
    "/xyz/openbmc_project/sensors/voltage/ps1_output_voltage",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_path() {
        assert_eq!(
            SensorCatalog::kind_of("/xyz/openbmc_project/sensors/temperature/ambient"),
            SensorKind::Temperature
        );
        assert_eq!(
            SensorCatalog::kind_of("/xyz/openbmc_project/sensors/fan_tach/fan0_0"),
            SensorKind::FanTach
        );
        assert_eq!(SensorCatalog::kind_of("/weird/path"), SensorKind::Unknown);
    }

    #[test]
    fn test_resolve_short_name() {
        let catalog = SensorCatalog::new(&[]);
        assert_eq!(
            catalog.resolve("ambient"),
            Some("/xyz/openbmc_project/sensors/temperature/ambient")
        );
        assert_eq!(
            catalog.resolve("/xyz/openbmc_project/sensors/power/total_power"),
            Some("/xyz/openbmc_project/sensors/power/total_power")
        );
        assert_eq!(catalog.resolve("no_such_sensor"), None);
        assert_eq!(catalog.resolve(""), None);
    }

    #[test]
    fn test_units_and_default_scales() {
        assert_eq!(SensorKind::Temperature.unit(), "DegreesC");
        assert_eq!(SensorKind::FanTach.default_scale(), 1.0);
        assert_eq!(SensorKind::Power.default_scale(), 1e-6);
        assert_eq!(SensorKind::Voltage.default_scale(), 1e-3);
    }
}
