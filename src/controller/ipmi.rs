//! Out-of-band controller client over the management protocol
//!
//! There is no native client library for this path, so the implementation
//! drives the `ipmitool` helper process and parses its tabular output. The
//! helper invocation is fully hidden behind [`ControllerClient`]; callers see
//! the same classified errors as the REST path.
//!
//! The management protocol has no push transport: `subscribe` reports
//! `NotSupported`, and the shard supervisor runs no streaming session for
//! nodes with this access type.

use super::{ControllerClient, ControllerSession, PowerState, PushChannel, SensorProbe, SubscribeRequest};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;

/// Controller client invoking the `ipmitool` helper
pub struct IpmiController {
    host: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl IpmiController {
    pub fn new(host: String, username: String, password: String, timeout: Duration) -> Self {
        IpmiController {
            host,
            username,
            password,
            timeout,
        }
    }

    fn run(&self, subcommand: &[&str]) -> Result<String> {
        let timeout_secs = self.timeout.as_secs().max(1).to_string();
        let output = Command::new("ipmitool")
            .args([
                "-I",
                "lanplus",
                "-H",
                &self.host,
                "-U",
                &self.username,
                "-P",
                &self.password,
                "-N",
                &timeout_secs,
                "-R",
                "1",
            ])
            .args(subcommand)
            .output()
            .map_err(|e| Error::Connection(format!("failed to run ipmitool: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let combined = if stderr.trim().is_empty() { stdout } else { stderr };
        if combined.contains("RAKP") || combined.contains("authentication") {
            Err(Error::LoginFailed(combined.trim().to_string()))
        } else if combined.contains("timeout") || combined.contains("timed out") {
            Err(Error::Timeout)
        } else {
            Err(Error::Connection(combined.trim().to_string()))
        }
    }
}

impl ControllerClient for IpmiController {
    fn login(&self) -> Result<Box<dyn ControllerSession>> {
        // The protocol is sessionless from our side; a power-status probe
        // stands in for authentication so failures classify the same way.
        let output = self.run(&["chassis", "power", "status"])?;
        let state = parse_power_status(&output);
        Ok(Box::new(IpmiSession {
            controller: IpmiController {
                host: self.host.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                timeout: self.timeout,
            },
            last_power_state: state,
        }))
    }
}

struct IpmiSession {
    controller: IpmiController,
    last_power_state: PowerState,
}

impl ControllerSession for IpmiSession {
    fn enumerate_sensors(&mut self) -> Result<HashMap<String, SensorProbe>> {
        let output = self.controller.run(&["sensor", "list"])?;
        Ok(parse_sensor_list(&output))
    }

    fn power_state(&mut self) -> Result<PowerState> {
        let output = self.controller.run(&["chassis", "power", "status"])?;
        self.last_power_state = parse_power_status(&output);
        Ok(self.last_power_state)
    }

    fn subscribe(&mut self, _request: &SubscribeRequest) -> Result<Box<dyn PushChannel>> {
        Err(Error::NotSupported(
            "push subscriptions over the out-of-band management protocol",
        ))
    }

    fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Parse `chassis power status` output ("Chassis Power is on")
fn parse_power_status(output: &str) -> PowerState {
    let lower = output.to_ascii_lowercase();
    if lower.contains("power is on") {
        PowerState::On
    } else if lower.contains("power is off") {
        PowerState::Off
    } else {
        PowerState::Unknown
    }
}

/// Parse `sensor list` output.
///
/// Lines look like `Ambient Temp | 24.000 | degrees C | ok | ...`; readings of
/// `na` are kept with an unknown value so the sensor set stays complete.
fn parse_sensor_list(output: &str) -> HashMap<String, SensorProbe> {
    let mut probes = HashMap::new();
    for line in output.lines() {
        let mut fields = line.split('|').map(str::trim);
        let name = match fields.next() {
            Some(n) if !n.is_empty() => n,
            _ => continue,
        };
        let value = fields.next().and_then(|v| v.parse::<f64>().ok());
        let unit = fields
            .next()
            .filter(|u| !u.is_empty() && *u != "discrete")
            .map(|u| u.to_string());
        probes.insert(
            name.to_string(),
            SensorProbe {
                value,
                scale: Some(0),
                unit,
            },
        );
    }
    probes
}
