//! Connection state machine.
//!
//! A [`Connection`] negotiates with the server, connects a transport and
//! tears it down again. State lives in an atomic cell; every transition
//! that also touches the transport reference happens under one mutex,
//! which is never held across an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use hublink_protocol::constants::MAX_NEGOTIATE_REDIRECTS;
use hublink_protocol::{TransferFormat, TransportKind};

use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::guard::call_guarded;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::logger::{Logger, TraceLevel};
use crate::negotiate::negotiate;
use crate::state::{AtomicState, ConnectionState};
use crate::transport::{DefaultTransportFactory, Transport, TransportFactory};
use crate::url_builder;

/// Invoked with each inbound frame.
pub type MessageReceivedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked after a connected connection has fully shut down.
pub type DisconnectedCallback = Arc<dyn Fn() + Send + Sync>;

/// State guarded together with transitions.
struct Guarded {
    transport: Option<Arc<dyn Transport>>,
    /// Incremented by every `start()`; tags callbacks of one attempt.
    generation: u64,
    /// Cancelled by `stop()` to abort the in-flight attempt.
    token: CancellationToken,
}

struct Inner {
    base_url: String,
    query_string: String,
    logger: Logger,
    state: AtomicState,
    guarded: Mutex<Guarded>,
    /// `false` while a `start()` is running.
    start_completed: watch::Sender<bool>,
    connection_id: Mutex<String>,
    config: Mutex<ClientConfig>,
    message_received: RwLock<Option<MessageReceivedCallback>>,
    disconnected: RwLock<Option<DisconnectedCallback>>,
    http_client: Option<Arc<dyn HttpClient>>,
    transport_factory: Arc<dyn TransportFactory>,
}

/// A persistent connection to a hub endpoint.
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates a disconnected connection using `reqwest` and `tokio-tungstenite`.
    pub fn new(
        base_url: impl Into<String>,
        query_string: impl Into<String>,
        logger: Logger,
    ) -> Self {
        Self::with_factories(
            base_url,
            query_string,
            logger,
            None,
            Arc::new(DefaultTransportFactory::new()),
        )
    }

    /// Creates a connection with injected collaborators.
    ///
    /// Without an `http_client` a `reqwest` client is built from the current
    /// configuration on every start.
    pub fn with_factories(
        base_url: impl Into<String>,
        query_string: impl Into<String>,
        logger: Logger,
        http_client: Option<Arc<dyn HttpClient>>,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let (start_completed, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into(),
                query_string: query_string.into(),
                logger,
                state: AtomicState::new(ConnectionState::Disconnected),
                guarded: Mutex::new(Guarded {
                    transport: None,
                    generation: 0,
                    token: CancellationToken::new(),
                }),
                start_completed,
                connection_id: Mutex::new(String::new()),
                config: Mutex::new(ClientConfig::default()),
                message_received: RwLock::new(None),
                disconnected: RwLock::new(None),
                http_client,
                transport_factory,
            }),
        }
    }

    /// Negotiates and connects.
    ///
    /// Fails with [`ConnectionError::Cancelled`] if a concurrent `stop()`
    /// aborts the attempt.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        let (generation, token) = self.inner.begin_start()?;

        let mut pending = PendingStart {
            inner: &self.inner,
            generation,
            armed: true,
        };
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ConnectionError::Cancelled),
            result = self.inner.establish(generation, &token) => result,
        };
        let result = self.inner.finish_start(generation, result).await;
        pending.armed = false;
        result
    }

    /// Sends one frame over the connected transport.
    pub async fn send(&self, data: String) -> Result<(), ConnectionError> {
        self.inner.send(data).await
    }

    /// Stops the connection.
    ///
    /// Succeeds trivially when already disconnected. A second concurrent
    /// call observes `disconnecting` and fails with
    /// [`ConnectionError::Cancelled`].
    pub async fn stop(&self) -> Result<(), ConnectionError> {
        self.inner.stop(None).await
    }

    pub fn get_connection_state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    /// Id from the last successful negotiate; empty while connecting.
    pub fn get_connection_id(&self) -> String {
        if self.inner.state.load() == ConnectionState::Connecting {
            return String::new();
        }
        self.inner.lock_connection_id().clone()
    }

    pub fn get_client_config(&self) -> ClientConfig {
        self.inner.lock_config().clone()
    }

    pub fn set_message_received(
        &self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<(), ConnectionError> {
        let _guarded = self.inner.lock_guarded();
        self.inner
            .ensure_disconnected("cannot set the callback when the connection is not in the disconnected state.")?;
        *self
            .inner
            .message_received
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
        Ok(())
    }

    pub fn set_disconnected(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), ConnectionError> {
        let _guarded = self.inner.lock_guarded();
        self.inner
            .ensure_disconnected("cannot set the disconnected callback when the connection is not in the disconnected state.")?;
        *self
            .inner
            .disconnected
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
        Ok(())
    }

    pub fn set_client_config(&self, config: ClientConfig) -> Result<(), ConnectionError> {
        let _guarded = self.inner.lock_guarded();
        self.inner
            .ensure_disconnected("cannot set client config when the connection is not in the disconnected state.")?;
        *self.inner.lock_config() = config;
        Ok(())
    }

    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }
}

/// Settles the state if a `start()` future is dropped before it finishes.
struct PendingStart<'a> {
    inner: &'a Arc<Inner>,
    generation: u64,
    armed: bool,
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(transport) = self.inner.reset_after_failed_start(self.generation) {
            self.inner.logger.log(
                TraceLevel::INFO,
                "starting the connection has been cancelled.",
            );
            if let Some(transport) = transport {
                spawn_transport_stop(transport);
            }
        }
    }
}

fn spawn_transport_stop(transport: Arc<dyn Transport>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            let _ = transport.stop().await;
        });
    }
}

impl Inner {
    fn lock_guarded(&self) -> MutexGuard<'_, Guarded> {
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_connection_id(&self) -> MutexGuard<'_, String> {
        self.connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_config(&self) -> MutexGuard<'_, ClientConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_generation(&self) -> u64 {
        self.lock_guarded().generation
    }

    fn ensure_disconnected(&self, message: &'static str) -> Result<(), ConnectionError> {
        let state = self.state.load();
        if state == ConnectionState::Disconnected {
            Ok(())
        } else {
            Err(ConnectionError::invalid_state(message, state))
        }
    }

    fn change_state(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let changed = self.state.transition(from, to).is_ok();
        if changed {
            self.log_state_change(from, to);
        }
        changed
    }

    fn force_state(&self, to: ConnectionState) {
        let from = self.state.swap(to);
        if from != to {
            self.log_state_change(from, to);
        }
    }

    fn log_state_change(&self, from: ConnectionState, to: ConnectionState) {
        self.logger
            .log(TraceLevel::STATE_CHANGES, &format!("{from} -> {to}"));
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    fn begin_start(&self) -> Result<(u64, CancellationToken), ConnectionError> {
        let mut guarded = self.lock_guarded();
        if !self.change_state(ConnectionState::Disconnected, ConnectionState::Connecting) {
            return Err(ConnectionError::invalid_state(
                "cannot start a connection that is not in the disconnected state.",
                self.state.load(),
            ));
        }

        guarded.generation += 1;
        guarded.token = CancellationToken::new();
        self.start_completed.send_replace(false);
        self.lock_connection_id().clear();
        Ok((guarded.generation, guarded.token.clone()))
    }

    /// Negotiates (following redirects) and starts a WebSocket transport.
    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        let mut config = self.lock_config().clone();
        let http: Arc<dyn HttpClient> = match &self.http_client {
            Some(client) => client.clone(),
            None => Arc::new(ReqwestHttpClient::new(&config)?),
        };

        let mut url = self.base_url.clone();
        let mut redirects = 0;
        let negotiation = loop {
            let mut response = negotiate(http.as_ref(), &url, &self.query_string, &config).await?;
            if let Some(error) = response.error.take() {
                return Err(ConnectionError::Negotiate(error));
            }
            let Some(redirect) = response.url.take() else {
                break response;
            };

            if redirects >= MAX_NEGOTIATE_REDIRECTS {
                return Err(ConnectionError::RedirectLimitExceeded);
            }
            redirects += 1;

            if let Some(access_token) = &response.access_token {
                config.set_bearer_token(access_token);
                self.lock_config().set_bearer_token(access_token);
            }
            url = redirect;
        };

        if !negotiation.supports(TransportKind::WebSockets) {
            return Err(ConnectionError::WebSocketsUnsupported);
        }
        *self.lock_connection_id() = negotiation.connection_id.clone();

        let transport =
            self.transport_factory
                .create(TransportKind::WebSockets, &config, &self.logger)?;
        self.wire_transport(&transport, generation, token);
        {
            let mut guarded = self.lock_guarded();
            if guarded.generation != generation || token.is_cancelled() {
                return Err(ConnectionError::Cancelled);
            }
            guarded.transport = Some(transport.clone());
        }

        let connect_url =
            url_builder::build_connect(&url, &self.query_string, &negotiation.connection_id)?;
        tokio::select! {
            result = transport.start(connect_url.as_str(), TransferFormat::Text) => result,
            () = tokio::time::sleep(config.connect_timeout()) => Err(ConnectionError::ConnectTimeout),
        }
    }

    /// Routes transport notifications back to this attempt.
    ///
    /// The callbacks hold only a weak reference and ignore notifications
    /// from an attempt that is no longer current.
    fn wire_transport(
        self: &Arc<Self>,
        transport: &Arc<dyn Transport>,
        generation: u64,
        token: &CancellationToken,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let attempt = token.clone();
        transport.on_receive(Arc::new(move |message: String| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if attempt.is_cancelled() || inner.current_generation() != generation {
                inner.logger.log(
                    TraceLevel::INFO,
                    "ignoring stray message received after connection was restarted",
                );
                return;
            }
            inner.process_response(&message);
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        let attempt = token.clone();
        transport.on_close(Arc::new(move |error: Option<&ConnectionError>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.current_generation() != generation {
                inner.logger.log(
                    TraceLevel::INFO,
                    "ignoring stray close notification received after connection was restarted",
                );
                return;
            }
            // Closed by our own stop.
            if attempt.is_cancelled() {
                return;
            }

            match error {
                Some(e) => inner
                    .logger
                    .log(TraceLevel::ERRORS, &format!("connection closed with error: {e}")),
                None => inner.logger.log(TraceLevel::INFO, "connection closed"),
            }
            tokio::spawn(async move { inner.handle_transport_lost(generation).await });
        }));
    }

    async fn finish_start(
        &self,
        generation: u64,
        result: Result<(), ConnectionError>,
    ) -> Result<(), ConnectionError> {
        let result = result.and_then(|()| {
            let guarded = self.lock_guarded();
            if guarded.generation != generation || guarded.token.is_cancelled() {
                return Err(ConnectionError::Cancelled);
            }
            if let Err(actual) = self
                .state
                .transition(ConnectionState::Connecting, ConnectionState::Connected)
            {
                let message = format!(
                    "internal error - transition from an unexpected state. expected state: connecting, actual state: {actual}"
                );
                self.logger.log(TraceLevel::ERRORS, &message);
                debug_assert!(false, "{message}");
                return Err(ConnectionError::invalid_state(
                    "connection left the connecting state during start.",
                    actual,
                ));
            }
            self.log_state_change(ConnectionState::Connecting, ConnectionState::Connected);
            self.start_completed.send_replace(true);
            Ok(())
        });

        let Err(e) = result else {
            return Ok(());
        };

        if e.is_cancelled() {
            self.logger
                .log(TraceLevel::INFO, "starting the connection has been cancelled.");
        } else {
            self.logger.log(
                TraceLevel::ERRORS,
                &format!("connection could not be started due to: {e}"),
            );
        }

        if let Some(Some(transport)) = self.reset_after_failed_start(generation) {
            let _ = transport.stop().await;
        }
        Err(e)
    }

    /// Drops the transport and forces `disconnected` after attempt
    /// `generation` failed. Returns `None` if that attempt was already
    /// settled, otherwise the transport it owned (if any).
    fn reset_after_failed_start(&self, generation: u64) -> Option<Option<Arc<dyn Transport>>> {
        let mut guarded = self.lock_guarded();
        if guarded.generation != generation || self.state.load() != ConnectionState::Connecting {
            return None;
        }
        guarded.token.cancel();
        let transport = guarded.transport.take();
        self.force_state(ConnectionState::Disconnected);
        self.start_completed.send_replace(true);
        Some(transport)
    }

    // -----------------------------------------------------------------------
    // send / receive
    // -----------------------------------------------------------------------

    async fn send(&self, data: String) -> Result<(), ConnectionError> {
        // Snapshot both under the lock so a racing stop cannot split them.
        let (state, transport) = {
            let guarded = self.lock_guarded();
            (self.state.load(), guarded.transport.clone())
        };
        let transport = match transport {
            Some(transport) if state == ConnectionState::Connected => transport,
            _ => {
                return Err(ConnectionError::invalid_state(
                    "cannot send data when the connection is not in the connected state.",
                    state,
                ));
            }
        };

        self.logger
            .log(TraceLevel::MESSAGES, &format!("sending data: {data}"));
        transport.send(data).await.inspect_err(|e| {
            self.logger
                .log(TraceLevel::ERRORS, &format!("error sending data: {e}"));
        })
    }

    fn process_response(&self, message: &str) {
        self.logger
            .log(TraceLevel::MESSAGES, &format!("processing message: {message}"));

        let callback = self
            .message_received
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            if let Err(panic) = call_guarded(|| callback(message)) {
                self.logger.log(
                    TraceLevel::ERRORS,
                    &format!("message_received callback panicked: {panic}"),
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // stop
    // -----------------------------------------------------------------------

    /// Stops the connection; with `expected` set, only if that attempt is
    /// still the current one.
    async fn stop(&self, expected: Option<u64>) -> Result<(), ConnectionError> {
        self.logger.log(TraceLevel::INFO, "stopping connection");
        self.shutdown(expected).await
    }

    async fn shutdown(&self, expected: Option<u64>) -> Result<(), ConnectionError> {
        let generation = {
            let guarded = self.lock_guarded();
            self.logger
                .log(TraceLevel::INFO, "acquired lock in shutdown()");

            if expected.is_some_and(|g| g != guarded.generation) {
                return Ok(());
            }
            match self.state.load() {
                ConnectionState::Disconnected => return Ok(()),
                ConnectionState::Disconnecting => return Err(ConnectionError::Cancelled),
                ConnectionState::Connecting | ConnectionState::Connected => {}
            }

            guarded.token.cancel();
            guarded.generation
        };

        self.wait_for_start().await;

        let transport = {
            let guarded = self.lock_guarded();
            if guarded.generation != generation {
                return Ok(());
            }
            match self.state.load() {
                ConnectionState::Disconnected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Disconnecting => return Err(ConnectionError::Cancelled),
                ConnectionState::Connected => {}
            }
            if !self.change_state(ConnectionState::Connected, ConnectionState::Disconnecting) {
                return Err(ConnectionError::Cancelled);
            }
            guarded.transport.clone()
        };

        let result = match &transport {
            Some(transport) => transport.stop().await,
            None => Ok(()),
        };
        if let Err(e) = &result {
            self.logger
                .log(TraceLevel::ERRORS, &format!("transport stop failed: {e}"));
        }

        let performed = {
            let mut guarded = self.lock_guarded();
            let changed =
                self.change_state(ConnectionState::Disconnecting, ConnectionState::Disconnected);
            if changed {
                guarded.transport = None;
            }
            changed
        };

        if performed {
            self.fire_disconnected();
        }
        result
    }

    /// Waits for an in-flight start to settle, logging every time the
    /// configured wait elapses.
    async fn wait_for_start(&self) {
        let wait = self.lock_config().shutdown_wait();
        let mut completed = self.start_completed.subscribe();
        loop {
            match tokio::time::timeout(wait, completed.wait_for(|done| *done)).await {
                Ok(_) => return,
                Err(_) => self.logger.log(
                    TraceLevel::ERRORS,
                    "internal error - stopping the connection is still waiting for the start operation to finish which should have already finished or timed out",
                ),
            }
        }
    }

    fn fire_disconnected(&self) {
        let callback = self
            .disconnected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            if let Err(panic) = call_guarded(|| callback()) {
                self.logger.log(
                    TraceLevel::ERRORS,
                    &format!("disconnected callback panicked: {panic}"),
                );
            }
        }
    }

    /// The transport of `generation` died on its own.
    async fn handle_transport_lost(&self, generation: u64) {
        self.wait_for_start().await;
        {
            let guarded = self.lock_guarded();
            if guarded.generation != generation
                || self.state.load() != ConnectionState::Connected
            {
                return;
            }
        }
        if let Err(e) = self.stop(Some(generation)).await {
            if !e.is_cancelled() {
                self.logger.log(
                    TraceLevel::ERRORS,
                    &format!("stopping the connection after transport loss failed: {e}"),
                );
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let guarded = self
            .guarded
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        guarded.token.cancel();
        if let Some(transport) = guarded.transport.take() {
            spawn_transport_stop(transport);
        }
        self.state.swap(ConnectionState::Disconnected);
    }
}
