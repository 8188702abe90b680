//! Scriptable mock controller for hardware-free testing

use super::{ControllerClient, ControllerSession, PowerState, PushChannel, SensorProbe, SubscribeRequest};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock controller with an injectable push-message queue and scriptable
/// login failures
#[derive(Clone)]
pub struct MockController {
    shared: Arc<MockShared>,
}

struct MockShared {
    login_failures: Mutex<VecDeque<Error>>,
    sensors: Mutex<HashMap<String, SensorProbe>>,
    power: Mutex<PowerState>,
    queue: Mutex<VecDeque<String>>,
    channel_closed: AtomicBool,
    login_count: AtomicU32,
    subscribe_count: AtomicU32,
    logout_count: AtomicU32,
    subscribe_requests: Mutex<Vec<SubscribeRequest>>,
}

impl MockController {
    pub fn new() -> Self {
        MockController {
            shared: Arc::new(MockShared {
                login_failures: Mutex::new(VecDeque::new()),
                sensors: Mutex::new(HashMap::new()),
                power: Mutex::new(PowerState::On),
                queue: Mutex::new(VecDeque::new()),
                channel_closed: AtomicBool::new(false),
                login_count: AtomicU32::new(0),
                subscribe_count: AtomicU32::new(0),
                logout_count: AtomicU32::new(0),
                subscribe_requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Set the canned enumeration result
    pub fn set_sensor(&self, path: &str, value: Option<f64>, scale: i32, unit: &str) {
        self.shared.sensors.lock().insert(
            path.to_string(),
            SensorProbe {
                value,
                scale: Some(scale),
                unit: Some(unit.to_string()),
            },
        );
    }

    pub fn set_power_state(&self, state: PowerState) {
        *self.shared.power.lock() = state;
    }

    /// Queue an error to be returned by the next login attempt
    pub fn queue_login_failure(&self, err: Error) {
        self.shared.login_failures.lock().push_back(err);
    }

    /// Inject a raw push payload to be delivered on the open channel
    pub fn push_message(&self, raw: &str) {
        self.shared.queue.lock().push_back(raw.to_string());
    }

    /// Kill the open push channel; the next recv reports a dead channel
    pub fn close_channel(&self) {
        self.shared.channel_closed.store(true, Ordering::SeqCst);
    }

    pub fn login_count(&self) -> u32 {
        self.shared.login_count.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> u32 {
        self.shared.subscribe_count.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> u32 {
        self.shared.logout_count.load(Ordering::SeqCst)
    }

    /// Paths registered by the most recent subscribe call
    pub fn last_subscribed_paths(&self) -> Vec<String> {
        self.shared
            .subscribe_requests
            .lock()
            .last()
            .map(|r| r.paths.clone())
            .unwrap_or_default()
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerClient for MockController {
    fn login(&self) -> Result<Box<dyn ControllerSession>> {
        self.shared.login_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.shared.login_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(Box::new(MockSession {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockSession {
    shared: Arc<MockShared>,
}

impl ControllerSession for MockSession {
    fn enumerate_sensors(&mut self) -> Result<HashMap<String, SensorProbe>> {
        Ok(self.shared.sensors.lock().clone())
    }

    fn power_state(&mut self) -> Result<PowerState> {
        Ok(*self.shared.power.lock())
    }

    fn subscribe(&mut self, request: &SubscribeRequest) -> Result<Box<dyn PushChannel>> {
        self.shared.subscribe_count.fetch_add(1, Ordering::SeqCst);
        self.shared.subscribe_requests.lock().push(request.clone());
        self.shared.channel_closed.store(false, Ordering::SeqCst);
        Ok(Box::new(MockPushChannel {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn logout(&mut self) -> Result<()> {
        self.shared.logout_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockPushChannel {
    shared: Arc<MockShared>,
}

impl PushChannel for MockPushChannel {
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>> {
        if let Some(raw) = self.shared.queue.lock().pop_front() {
            return Ok(Some(raw));
        }
        if self.shared.channel_closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("push channel closed".to_string()));
        }
        std::thread::sleep(timeout.min(Duration::from_millis(10)));
        Ok(None)
    }

    fn close(&mut self) {}
}
