//! WebSocket transport: one client plus a receive loop.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use hublink_protocol::{TransferFormat, TransportKind};

use crate::error::ConnectionError;
use crate::logger::{Logger, TraceLevel};
use crate::transport::{CloseCallback, ReceiveCallback, Transport};
use crate::websocket_client::WebSocketClient;

type ClientFactory = Arc<dyn Fn() -> Arc<dyn WebSocketClient> + Send + Sync>;

/// Per-attempt state. A cancelled token means "not started".
struct Session {
    client: Option<Arc<dyn WebSocketClient>>,
    receive_token: CancellationToken,
}

struct Shared {
    logger: Logger,
    session: Mutex<Session>,
    on_receive: RwLock<Option<ReceiveCallback>>,
    on_close: RwLock<Option<CloseCallback>>,
}

impl Shared {
    fn session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receive_callback(&self) -> Option<ReceiveCallback> {
        self.on_receive
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn close_callback(&self) -> Option<CloseCallback> {
        self.on_close
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// [`Transport`] over a [`WebSocketClient`].
pub struct WebSocketTransport {
    client_factory: ClientFactory,
    shared: Arc<Shared>,
    /// Serializes `start` and `stop`.
    lifecycle: tokio::sync::Mutex<()>,
}

impl WebSocketTransport {
    pub fn new(client_factory: ClientFactory, logger: Logger) -> Self {
        let receive_token = CancellationToken::new();
        receive_token.cancel();
        Self {
            client_factory,
            shared: Arc::new(Shared {
                logger,
                session: Mutex::new(Session {
                    client: None,
                    receive_token,
                }),
                on_receive: RwLock::new(None),
                on_close: RwLock::new(None),
            }),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }
}

/// Reads frames until `token` is cancelled or the client fails.
async fn receive_loop(
    shared: Arc<Shared>,
    client: Arc<dyn WebSocketClient>,
    token: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = client.receive() => result,
        };

        match result {
            Ok(message) => {
                if let Some(callback) = shared.receive_callback() {
                    callback(message);
                }
                if token.is_cancelled() {
                    return;
                }
            }
            Err(e) => {
                {
                    // Whoever cancels the token first reports the closure.
                    let mut session = shared.session();
                    if token.is_cancelled() {
                        return;
                    }
                    token.cancel();
                    session.client = None;
                }

                shared.logger.log(
                    TraceLevel::ERRORS,
                    &format!("error receiving response from websocket: {e}"),
                );
                let _ = client.stop().await;

                if let Some(callback) = shared.close_callback() {
                    callback(Some(&e));
                }
                return;
            }
        }
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSockets
    }

    fn start<'a>(
        &'a self,
        url: &'a str,
        format: TransferFormat,
    ) -> BoxFuture<'a, Result<(), ConnectionError>> {
        Box::pin(async move {
            let _lifecycle = self.lifecycle.lock().await;
            if !self.shared.session().receive_token.is_cancelled() {
                return Err(ConnectionError::AlreadyConnected);
            }

            let client = (self.client_factory)();
            if let Err(e) = client.start(url, format).await {
                self.shared.logger.log(
                    TraceLevel::ERRORS,
                    &format!("transport could not connect due to: {e}"),
                );
                return Err(e);
            }

            let token = CancellationToken::new();
            {
                let mut session = self.shared.session();
                session.client = Some(client.clone());
                session.receive_token = token.clone();
            }
            tokio::spawn(receive_loop(self.shared.clone(), client, token));
            Ok(())
        })
    }

    fn send(&self, payload: String) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            let client = self
                .shared
                .session()
                .client
                .clone()
                .ok_or(ConnectionError::Closed)?;
            client.send(payload).await
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            let _lifecycle = self.lifecycle.lock().await;
            let client = {
                let mut session = self.shared.session();
                if session.receive_token.is_cancelled() {
                    return Ok(());
                }
                session.receive_token.cancel();
                session.client.take()
            };

            let result = match client {
                Some(client) => client.stop().await,
                None => Ok(()),
            };
            if let Err(e) = &result {
                self.shared.logger.log(
                    TraceLevel::ERRORS,
                    &format!("error closing websocket: {e}"),
                );
            }

            if let Some(callback) = self.shared.close_callback() {
                callback(result.as_ref().err());
            }
            result
        })
    }

    fn on_receive(&self, callback: ReceiveCallback) {
        *self
            .shared
            .on_receive
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn on_close(&self, callback: CloseCallback) {
        *self
            .shared
            .on_close
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shared.session().receive_token.cancel();
    }
}
