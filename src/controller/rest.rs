//! REST + websocket controller client
//!
//! Speaks the controller's session-based REST interface for login,
//! enumeration and power state, then upgrades to a websocket on the same
//! host for the push-subscription channel, carrying the session cookie over.
//! Controllers ship self-signed certificates, so certificate validation is
//! disabled on both transports.

use super::{ControllerClient, ControllerSession, PowerState, PushChannel, SensorProbe, SubscribeRequest};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Connector, Message, WebSocket};

/// REST-based controller client for one node
pub struct RestController {
    host: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl RestController {
    pub fn new(host: String, username: String, password: String, timeout: Duration) -> Self {
        RestController {
            host,
            username,
            password,
            timeout,
        }
    }

    fn tls_connector() -> Result<native_tls::TlsConnector> {
        native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| Error::Connection(e.to_string()))
    }
}

/// Map a ureq failure to the session-layer error classification
fn classify(err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            if code == 401 || code == 403 {
                Error::LoginFailed(format!("HTTP {}: {}", code, body))
            } else {
                Error::Connection(format!("HTTP {}: {}", code, body))
            }
        }
        ureq::Error::Transport(t) => {
            let message = t.to_string();
            if message.contains("timed out") || message.contains("timeout") {
                Error::Timeout
            } else {
                Error::Connection(message)
            }
        }
    }
}

impl ControllerClient for RestController {
    fn login(&self) -> Result<Box<dyn ControllerSession>> {
        let connector = Self::tls_connector()?;
        let agent = ureq::AgentBuilder::new()
            .timeout(self.timeout)
            .tls_connector(Arc::new(connector))
            .build();

        let url = format!("https://{}/login", self.host);
        let response = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(serde_json::json!({"data": [self.username, self.password]}))
            .map_err(classify)?;

        // Session cookies must be carried on every subsequent call
        let cookie = response
            .all("set-cookie")
            .iter()
            .filter_map(|raw| raw.split(';').next())
            .collect::<Vec<_>>()
            .join("; ");

        let body: serde_json::Value = response.into_json().map_err(Error::Io)?;
        if body.get("status").and_then(|s| s.as_str()) != Some("ok") {
            let description = body
                .pointer("/data/description")
                .and_then(|d| d.as_str())
                .unwrap_or("controller rejected login");
            return Err(Error::LoginFailed(description.to_string()));
        }

        Ok(Box::new(RestSession {
            host: self.host.clone(),
            agent,
            cookie,
            timeout: self.timeout,
        }))
    }
}

struct RestSession {
    host: String,
    agent: ureq::Agent,
    cookie: String,
    timeout: Duration,
}

impl RestSession {
    fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("https://{}{}", self.host, path);
        let response = self
            .agent
            .get(&url)
            .set("Content-Type", "application/json")
            .set("Cookie", &self.cookie)
            .call()
            .map_err(classify)?;
        response.into_json().map_err(Error::Io)
    }
}

impl ControllerSession for RestSession {
    fn enumerate_sensors(&mut self) -> Result<HashMap<String, SensorProbe>> {
        let body = self.get_json("/xyz/openbmc_project/sensors/enumerate")?;
        let data = body
            .get("data")
            .and_then(|d| d.as_object())
            .ok_or_else(|| Error::Serialization("enumerate response missing data".to_string()))?;

        let mut probes = HashMap::with_capacity(data.len());
        for (path, attrs) in data {
            probes.insert(
                path.clone(),
                SensorProbe {
                    value: attrs.get("Value").and_then(|v| v.as_f64()),
                    scale: attrs.get("Scale").and_then(|s| s.as_i64()).map(|s| s as i32),
                    // Unit arrives fully qualified ("...Unit.DegreesC")
                    unit: attrs
                        .get("Unit")
                        .and_then(|u| u.as_str())
                        .map(|u| u.rsplit('.').next().unwrap_or(u).to_string()),
                },
            );
        }
        Ok(probes)
    }

    fn power_state(&mut self) -> Result<PowerState> {
        let body = self.get_json("/xyz/openbmc_project/state/host0/attr/CurrentHostState")?;
        let state = body.get("data").and_then(|d| d.as_str()).unwrap_or("");
        Ok(match state.rsplit('.').next() {
            Some("Running") => PowerState::On,
            Some("Off") => PowerState::Off,
            _ => PowerState::Unknown,
        })
    }

    fn subscribe(&mut self, request: &SubscribeRequest) -> Result<Box<dyn PushChannel>> {
        let url = format!("wss://{}/subscribe", self.host);
        let mut ws_request = url
            .into_client_request()
            .map_err(|e| Error::Connection(e.to_string()))?;
        ws_request.headers_mut().insert(
            "Cookie",
            self.cookie
                .parse()
                .map_err(|_| Error::Protocol("session cookie is not a valid header".to_string()))?,
        );

        let stream = TcpStream::connect((self.host.as_str(), 443)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                Error::Timeout
            } else {
                Error::Connection(e.to_string())
            }
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let connector = RestController::tls_connector()?;
        let (mut socket, _response) = tungstenite::client_tls_with_config(
            ws_request,
            stream,
            None,
            Some(Connector::NativeTls(connector)),
        )
        .map_err(|e| Error::Connection(e.to_string()))?;

        socket
            .send(Message::Text(serde_json::to_string(request)?))
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Box::new(WsPushChannel { socket }))
    }

    fn logout(&mut self) -> Result<()> {
        let url = format!("https://{}/logout", self.host);
        self.agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Cookie", &self.cookie)
            .send_json(serde_json::json!({"data": []}))
            .map_err(classify)?;
        Ok(())
    }
}

struct WsPushChannel {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WsPushChannel {
    fn set_read_timeout(&self, timeout: Duration) {
        match self.socket.get_ref() {
            MaybeTlsStream::Plain(stream) => {
                let _ = stream.set_read_timeout(Some(timeout));
            }
            MaybeTlsStream::NativeTls(stream) => {
                let _ = stream.get_ref().set_read_timeout(Some(timeout));
            }
            _ => {}
        }
    }
}

impl PushChannel for WsPushChannel {
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>> {
        self.set_read_timeout(timeout);
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text)),
            // Control frames are handled inside tungstenite; nothing to
            // deliver upward
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(Error::Connection(e.to_string())),
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}
