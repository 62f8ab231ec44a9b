//! Client configuration.
//!
//! Stored as JSON. Every field is optional on disk; missing fields fall back
//! to the defaults below.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use hublink_protocol::constants::{
    HANDSHAKE_TIMEOUT, HTTP_REQUEST_TIMEOUT, SHUTDOWN_WAIT, TRANSPORT_CONNECT_TIMEOUT,
};

use crate::error::ConnectionError;

const AUTHORIZATION: &str = "Authorization";

/// Basic-auth credentials sent with the negotiate request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// HTTP and WebSocket settings shared by every request of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Extra headers sent with the negotiate request and the WebSocket upgrade.
    pub headers: BTreeMap<String, String>,

    /// Proxy URL applied to HTTP requests.
    pub proxy: Option<String>,

    pub credentials: Option<Credentials>,

    pub http_timeout_ms: u64,

    /// Budget for the transport connect race.
    pub connect_timeout_ms: u64,

    /// How long `stop()` waits for an in-flight start before logging and waiting again.
    pub shutdown_wait_ms: u64,

    pub handshake_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            proxy: None,
            credentials: None,
            http_timeout_ms: HTTP_REQUEST_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: TRANSPORT_CONNECT_TIMEOUT.as_millis() as u64,
            shutdown_wait_ms: SHUTDOWN_WAIT.as_millis() as u64,
            handshake_timeout_ms: HANDSHAKE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConnectionError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConnectionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes configuration as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConnectionError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Replaces the `Authorization` header with a bearer token.
    pub fn set_bearer_token(&mut self, token: &str) {
        self.headers
            .insert(AUTHORIZATION.to_string(), format!("Bearer {token}"));
    }

    /// Headers for an outgoing request, including basic auth when
    /// credentials are set and no explicit `Authorization` header exists.
    pub fn request_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.headers.clone();
        if let Some(credentials) = &self.credentials {
            headers.entry(AUTHORIZATION.to_string()).or_insert_with(|| {
                let raw = format!("{}:{}", credentials.username, credentials.password);
                format!("Basic {}", STANDARD.encode(raw))
            });
        }
        headers
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
