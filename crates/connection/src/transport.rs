//! Transport abstraction and factory.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use hublink_protocol::{TransferFormat, TransportKind};

use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::logger::Logger;
use crate::websocket_client::{TungsteniteClient, WebSocketClient};
use crate::websocket_transport::WebSocketTransport;

/// Invoked with each inbound frame, in arrival order.
pub type ReceiveCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Invoked once when the transport closes; `None` on a clean close.
pub type CloseCallback = Arc<dyn Fn(Option<&ConnectionError>) + Send + Sync>;

/// One duplex session bound to a single connection attempt.
///
/// `start` may not be called again before `stop`. Callers build a fresh
/// transport per attempt instead of restarting one.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn start<'a>(
        &'a self,
        url: &'a str,
        format: TransferFormat,
    ) -> BoxFuture<'a, Result<(), ConnectionError>>;

    fn send(&self, payload: String) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Idempotent. Fires the close callback with the outcome.
    fn stop(&self) -> BoxFuture<'_, Result<(), ConnectionError>>;

    fn on_receive(&self, callback: ReceiveCallback);

    fn on_close(&self, callback: CloseCallback);
}

/// Builds transports for a connection.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        kind: TransportKind,
        config: &ClientConfig,
        logger: &Logger,
    ) -> Result<Arc<dyn Transport>, ConnectionError>;
}

/// Builds the WebSocket client for one transport start.
pub type WebSocketClientFactory =
    Arc<dyn Fn(&ClientConfig) -> Arc<dyn WebSocketClient> + Send + Sync>;

/// Creates WebSocket transports; other kinds are rejected.
#[derive(Clone)]
pub struct DefaultTransportFactory {
    client_factory: WebSocketClientFactory,
}

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self::with_client_factory(Arc::new(|config: &ClientConfig| {
            Arc::new(TungsteniteClient::new(config)) as Arc<dyn WebSocketClient>
        }))
    }

    /// Uses `client_factory` instead of `tokio-tungstenite`.
    pub fn with_client_factory(client_factory: WebSocketClientFactory) -> Self {
        Self { client_factory }
    }
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(
        &self,
        kind: TransportKind,
        config: &ClientConfig,
        logger: &Logger,
    ) -> Result<Arc<dyn Transport>, ConnectionError> {
        match kind {
            TransportKind::WebSockets => {
                let factory = self.client_factory.clone();
                let config = config.clone();
                Ok(Arc::new(WebSocketTransport::new(
                    Arc::new(move || factory(&config)),
                    logger.clone(),
                )))
            }
            other => Err(ConnectionError::UnsupportedTransport(other)),
        }
    }
}
