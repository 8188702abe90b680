//! Controller access layer
//!
//! Everything the daemon knows about talking to a management controller goes
//! through [`ControllerClient`]. The session layer never sees transport
//! details; it only consumes classified errors and raw push payloads.

mod ipmi;
mod rest;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use ipmi::IpmiController;
pub use rest::RestController;

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::fleet::{AccessType, NodeConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Raw per-sensor data from an enumeration call
#[derive(Debug, Clone, Default)]
pub struct SensorProbe {
    pub value: Option<f64>,
    /// Scale exponent as reported by the controller (value multiplier is
    /// 10^scale)
    pub scale: Option<i32>,
    pub unit: Option<String>,
}

/// Host power state as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "Running",
            PowerState::Off => "Off",
            PowerState::Unknown => "Unknown",
        }
    }
}

/// Push-subscription registration payload, sent once per opened channel
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub paths: Vec<String>,
    pub interfaces: Vec<String>,
}

impl SubscribeRequest {
    /// Standard subscription: the sensor catalog plus the logging, host-state
    /// and enclosure-controller objects.
    pub fn standard(sensor_paths: &[String]) -> Self {
        let mut paths: Vec<String> = sensor_paths.to_vec();
        paths.push("/xyz/openbmc_project/logging".to_string());
        paths.push("/xyz/openbmc_project/state/host0".to_string());
        paths.push("/org/open_power/control/occ0".to_string());
        SubscribeRequest {
            paths,
            interfaces: vec![
                "xyz.openbmc_project.Sensor.Value".to_string(),
                "xyz.openbmc_project.Logging.Entry".to_string(),
                "xyz.openbmc_project.State.Host".to_string(),
                "org.open_power.OCC.Status".to_string(),
            ],
        }
    }
}

/// Factory for a controller client matching the node's access type
pub fn create_controller(
    node: &NodeConfig,
    config: &ControllerConfig,
) -> Box<dyn ControllerClient> {
    let timeout = Duration::from_secs(config.call_timeout_secs);
    let username = node.username.clone().unwrap_or_default();
    let password = node.password.clone().unwrap_or_default();
    match node.access {
        AccessType::Rest => Box::new(RestController::new(
            node.address.clone(),
            username,
            password,
            timeout,
        )),
        AccessType::Ipmi => Box::new(IpmiController::new(
            node.address.clone(),
            username,
            password,
            timeout,
        )),
    }
}

/// Client for one management controller
pub trait ControllerClient: Send + Sync {
    /// Authenticate and open a session.
    ///
    /// Failures are classified: `Error::Timeout`, `Error::Connection`, or
    /// `Error::LoginFailed` with the controller's message attached.
    fn login(&self) -> Result<Box<dyn ControllerSession>>;
}

/// An authenticated controller session
pub trait ControllerSession: Send {
    /// One-shot enumeration of every sensor the controller exposes
    fn enumerate_sensors(&mut self) -> Result<HashMap<String, SensorProbe>>;

    /// Current host power state
    fn power_state(&mut self) -> Result<PowerState>;

    /// Open the persistent push channel and register interest
    fn subscribe(&mut self, request: &SubscribeRequest) -> Result<Box<dyn PushChannel>>;

    /// Close the session; best-effort, callers tolerate failure
    fn logout(&mut self) -> Result<()>;
}

/// A live push-subscription channel
pub trait PushChannel: Send {
    /// Receive the next raw notification payload.
    ///
    /// `Ok(None)` means no message arrived within `timeout`; an `Err` means
    /// the channel is dead and must be re-opened.
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Close the channel; best-effort
    fn close(&mut self);
}
