//! Hub protocol client.
//!
//! [`HubConnection`] wraps a [`Connection`] with the JSON hub protocol: a
//! handshake after every connect, dispatch of server invocations to
//! registered handlers, and awaited or fire-and-forget client invocations.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::oneshot;

use hublink_connection::guard::call_guarded;
use hublink_connection::{
    ClientConfig, Connection, ConnectionError, ConnectionState, DisconnectedCallback, Logger,
    TraceLevel,
};
use hublink_protocol::{
    HandshakeRequest, HandshakeResponse, HubMessage, InvocationMessage, ProtocolError,
    split_records,
};

use crate::callback_manager::{CallbackManager, error_payload};
use crate::error::HubError;

/// Handler for a server-to-client invocation; receives the argument array.
pub type MethodHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

type HandshakeOutcome = Result<(), HubError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum HandshakeState {
    /// The first record after connecting has not arrived yet.
    #[default]
    Awaiting,
    Accepted,
    /// Records are dropped until the connection is restarted.
    Failed,
}

#[derive(Default)]
struct Handshake {
    state: HandshakeState,
    pending: Option<oneshot::Sender<HandshakeOutcome>>,
}

struct HubInner {
    connection: Connection,
    callbacks: CallbackManager,
    /// Keyed by ASCII-lowercased method name.
    handlers: RwLock<HashMap<String, MethodHandler>>,
    handshake: Mutex<Handshake>,
    disconnected: RwLock<Option<DisconnectedCallback>>,
}

/// A connection speaking the JSON hub protocol.
pub struct HubConnection {
    inner: Arc<HubInner>,
}

impl HubConnection {
    /// Creates a disconnected hub connection to `url`.
    pub fn new(
        url: impl Into<String>,
        query_string: impl Into<String>,
        logger: Logger,
    ) -> Result<Self, HubError> {
        Self::from_connection(Connection::new(url, query_string, logger))
    }

    /// Wraps an existing connection, which must be disconnected.
    ///
    /// Takes over the connection's message and disconnect callbacks.
    pub fn from_connection(connection: Connection) -> Result<Self, HubError> {
        let inner = Arc::new(HubInner {
            connection,
            callbacks: CallbackManager::default(),
            handlers: RwLock::new(HashMap::new()),
            handshake: Mutex::new(Handshake::default()),
            disconnected: RwLock::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.connection.set_message_received(move |frame| {
            if let Some(inner) = weak.upgrade() {
                inner.process_message(frame);
            }
        })?;

        let weak = Arc::downgrade(&inner);
        inner.connection.set_disconnected(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_disconnected();
            }
        })?;

        Ok(Self { inner })
    }

    /// Starts the connection and completes the hub handshake.
    ///
    /// If the handshake fails the underlying connection is stopped before
    /// the error is returned.
    pub async fn start(&self) -> Result<(), HubError> {
        self.inner.connection.start().await?;

        let (tx, rx) = oneshot::channel();
        {
            let mut handshake = self.inner.lock_handshake();
            handshake.state = HandshakeState::Awaiting;
            handshake.pending = Some(tx);
        }

        let result = self.inner.handshake(rx).await;
        if let Err(e) = &result {
            self.inner.lock_handshake().pending = None;
            self.inner
                .logger()
                .log(TraceLevel::ERRORS, &format!("handshake failed: {e}"));
            match self.inner.connection.stop().await {
                Ok(()) => {}
                // A transport-loss shutdown is already running.
                Err(stop_err) if stop_err.is_cancelled() => {}
                Err(stop_err) => self.inner.logger().log(
                    TraceLevel::ERRORS,
                    &format!("stopping the connection after a failed handshake failed: {stop_err}"),
                ),
            }
        }
        result
    }

    /// Fails every pending invocation, then stops the connection.
    pub async fn stop(&self) -> Result<(), HubError> {
        self.inner.callbacks.clear(&error_payload(
            "connection was stopped before invocation result was received",
        ));
        self.inner.connection.stop().await?;
        Ok(())
    }

    /// Invokes `method` on the server and waits for its completion.
    ///
    /// A completion carrying an `error` fails with [`HubError::Hub`].
    pub async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, HubError> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let id = self.inner.callbacks.register_callback(move |payload| {
            let sender = tx.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(completion_outcome(payload));
            }
        });

        let pending = PendingInvocation {
            callbacks: &self.inner.callbacks,
            id,
        };

        let message = InvocationMessage::new(Some(pending.id.clone()), method, arguments);
        self.inner.send_message(&message).await?;

        rx.await
            .unwrap_or(Err(HubError::Connection(ConnectionError::Closed)))
    }

    /// Invokes `method` on the server without waiting for a result.
    pub async fn send(&self, method: &str, arguments: Vec<Value>) -> Result<(), HubError> {
        self.inner
            .send_message(&InvocationMessage::new(None, method, arguments))
            .await
    }

    /// Registers the handler for server invocations of `event_name`.
    ///
    /// Names match ASCII case-insensitively. Only allowed while disconnected.
    pub fn on(
        &self,
        event_name: &str,
        handler: impl Fn(&[Value]) + Send + Sync + 'static,
    ) -> Result<(), HubError> {
        if event_name.is_empty() {
            return Err(HubError::EmptyEventName);
        }

        let state = self.inner.connection.get_connection_state();
        if state != ConnectionState::Disconnected {
            return Err(HubError::RegistrationWhileActive(state));
        }

        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match handlers.entry(event_name.to_ascii_lowercase()) {
            Entry::Occupied(_) => Err(HubError::DuplicateHandler(event_name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(handler));
                Ok(())
            }
        }
    }

    pub fn set_disconnected(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), HubError> {
        let state = self.inner.connection.get_connection_state();
        if state != ConnectionState::Disconnected {
            return Err(ConnectionError::InvalidState {
                message: "cannot set the disconnected callback when the connection is not in the disconnected state.",
                state,
            }
            .into());
        }
        *self
            .inner
            .disconnected
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
        Ok(())
    }

    pub fn set_client_config(&self, config: ClientConfig) -> Result<(), HubError> {
        Ok(self.inner.connection.set_client_config(config)?)
    }

    pub fn get_client_config(&self) -> ClientConfig {
        self.inner.connection.get_client_config()
    }

    pub fn get_connection_state(&self) -> ConnectionState {
        self.inner.connection.get_connection_state()
    }

    pub fn get_connection_id(&self) -> String {
        self.inner.connection.get_connection_id()
    }
}

impl HubInner {
    fn logger(&self) -> &Logger {
        self.connection.logger()
    }

    fn lock_handshake(&self) -> MutexGuard<'_, Handshake> {
        self.handshake.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn handshake(&self, rx: oneshot::Receiver<HandshakeOutcome>) -> HandshakeOutcome {
        self.connection
            .send(HandshakeRequest::default().to_record()?)
            .await?;

        let timeout = self.connection.get_client_config().handshake_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(HubError::HandshakeAborted),
            Err(_) => Err(HubError::HandshakeTimeout),
        }
    }

    async fn send_message(&self, message: &InvocationMessage) -> Result<(), HubError> {
        let record = message.to_record()?;
        self.connection.send(record).await?;
        Ok(())
    }

    fn process_message(&self, frame: &str) {
        let (records, rest) = split_records(frame);
        if !rest.trim().is_empty() {
            self.logger().log(
                TraceLevel::ERRORS,
                &format!("dropping incomplete record: {rest}"),
            );
        }

        for record in records {
            match self.process_record(record) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => return,
                Err(e) => self.logger().log(
                    TraceLevel::ERRORS,
                    &format!("error occurred when parsing response: {e}. response: {record}"),
                ),
            }
        }
    }

    /// Handles one record. Breaks when the rest of the frame must be
    /// dropped because the handshake did not succeed.
    fn process_record(&self, record: &str) -> Result<ControlFlow<()>, HubError> {
        let value = serde_json::from_str::<Value>(record).map_err(HubError::from);

        {
            let mut handshake = self.lock_handshake();
            match handshake.state {
                HandshakeState::Accepted => {}
                HandshakeState::Failed => return Ok(ControlFlow::Break(())),
                HandshakeState::Awaiting => {
                    let outcome = value.and_then(|value| handshake_outcome(&value));
                    let flow = if outcome.is_ok() {
                        handshake.state = HandshakeState::Accepted;
                        ControlFlow::Continue(())
                    } else {
                        handshake.state = HandshakeState::Failed;
                        ControlFlow::Break(())
                    };
                    if let Some(pending) = handshake.pending.take() {
                        let _ = pending.send(outcome);
                    }
                    return Ok(flow);
                }
            }
        }

        let value = value?;
        match HubMessage::from_value(&value)? {
            HubMessage::Invocation(invocation) => {
                let handler = self
                    .handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&invocation.target.to_ascii_lowercase())
                    .cloned();
                if let Some(handler) = handler
                    && let Err(panic) = call_guarded(|| handler(&invocation.arguments))
                {
                    self.logger().log(
                        TraceLevel::ERRORS,
                        &format!(
                            "handler for method '{}' panicked: {panic}",
                            invocation.target
                        ),
                    );
                }
            }
            HubMessage::Completion(completion) => {
                if !self
                    .callbacks
                    .invoke_callback(&completion.invocation_id, &value, true)
                {
                    self.logger().log(
                        TraceLevel::INFO,
                        &format!("no callback found for id: {}", completion.invocation_id),
                    );
                }
            }
            message @ (HubMessage::StreamInvocation | HubMessage::CancelInvocation) => {
                return Err(ProtocolError::UnexpectedMessageType(message.message_type()).into());
            }
            HubMessage::StreamItem | HubMessage::Ping | HubMessage::Close(_) => {}
        }
        Ok(ControlFlow::Continue(()))
    }

    fn handle_disconnected(&self) {
        let pending = {
            let mut handshake = self.lock_handshake();
            handshake.state = HandshakeState::Awaiting;
            handshake.pending.take()
        };
        if let Some(pending) = pending {
            let _ = pending.send(Err(HubError::HandshakeAborted));
        }

        self.callbacks.clear(&error_payload(
            "connection was lost before invocation result was received",
        ));

        let callback = self
            .disconnected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback
            && let Err(panic) = call_guarded(|| callback())
        {
            self.logger().log(
                TraceLevel::ERRORS,
                &format!("disconnected callback panicked: {panic}"),
            );
        }
    }
}

/// Removes an invocation's registry entry when its `invoke` future ends,
/// including when the caller drops it early. A no-op once the completion
/// has been delivered.
struct PendingInvocation<'a> {
    callbacks: &'a CallbackManager,
    id: String,
}

impl Drop for PendingInvocation<'_> {
    fn drop(&mut self) {
        self.callbacks.remove_callback(&self.id);
    }
}

fn handshake_outcome(value: &Value) -> HandshakeOutcome {
    match HandshakeResponse::from_value(value)? {
        HandshakeResponse::Accepted => Ok(()),
        HandshakeResponse::Rejected(message) => Err(HubError::Handshake(message)),
        HandshakeResponse::Unexpected => Err(HubError::UnexpectedHandshake),
    }
}

/// Maps a completion record (or teardown payload) onto the invoke result.
fn completion_outcome(payload: &Value) -> Result<Value, HubError> {
    if let Some(error) = payload.get("error").filter(|error| !error.is_null()) {
        let message = error
            .as_str()
            .map_or_else(|| error.to_string(), str::to_string);
        return Err(HubError::Hub(message));
    }
    Ok(payload.get("result").cloned().unwrap_or(Value::Null))
}
