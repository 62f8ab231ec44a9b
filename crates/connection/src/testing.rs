//! In-memory collaborators for tests.
//!
//! Compiled for this crate's tests and for dependents that enable the
//! `test-util` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{Notify, mpsc};

use hublink_protocol::{TransferFormat, TransportKind};

use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::logger::{LogWriter, Logger};
use crate::transport::{DefaultTransportFactory, Transport, TransportFactory};
use crate::websocket_client::WebSocketClient;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Polls `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Negotiate body advertising WebSockets for `connection_id`.
pub fn negotiate_body(connection_id: &str) -> String {
    format!(
        r#"{{"connectionId":"{connection_id}","availableTransports":[{{"transport":"WebSockets","transferFormats":["Text","Binary"]}}]}}"#
    )
}

// ---------------------------------------------------------------------------
// Log writer
// ---------------------------------------------------------------------------

/// [`LogWriter`] that keeps every entry in memory.
#[derive(Default)]
pub struct MemoryLogWriter {
    entries: Mutex<Vec<String>>,
}

impl MemoryLogWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Entries with the leading timestamp removed, e.g.
    /// `"[info        ] stopping connection\n"`.
    pub fn entries_without_timestamps(&self) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .map(|entry| {
                entry
                    .split_once(' ')
                    .map_or_else(|| entry.clone(), |(_, rest)| rest.to_string())
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl LogWriter for MemoryLogWriter {
    fn write(&self, entry: &str) {
        lock(&self.entries).push(entry.to_string());
    }
}

/// Logger writing everything to a fresh [`MemoryLogWriter`].
pub fn memory_logger() -> (Logger, Arc<MemoryLogWriter>) {
    let writer = MemoryLogWriter::new();
    (
        Logger::new(writer.clone(), crate::logger::TraceLevel::ALL),
        writer,
    )
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

type HttpHandler =
    Arc<dyn Fn(&str, &HttpRequest) -> Result<HttpResponse, ConnectionError> + Send + Sync>;

/// [`HttpClient`] answering from a closure and recording every request.
pub struct MockHttpClient {
    handler: HttpHandler,
    hang: bool,
    requests: Mutex<Vec<(String, HttpRequest)>>,
}

impl MockHttpClient {
    pub fn new(
        handler: impl Fn(&str, &HttpRequest) -> Result<HttpResponse, ConnectionError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Arc::new(handler),
            hang: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answers every request with `status` and `body`.
    pub fn respond_with(status: u16, body: impl Into<String>) -> Arc<Self> {
        let body = body.into();
        Self::new(move |_, _| {
            Ok(HttpResponse {
                status_code: status,
                content: body.clone(),
            })
        })
    }

    /// Requests never complete.
    pub fn never_responds() -> Arc<Self> {
        Arc::new(Self {
            handler: Arc::new(|_, _| Err(ConnectionError::Closed)),
            hang: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<(String, HttpRequest)> {
        lock(&self.requests).clone()
    }
}

impl HttpClient for MockHttpClient {
    fn send<'a>(
        &'a self,
        url: &'a str,
        request: HttpRequest,
    ) -> BoxFuture<'a, Result<HttpResponse, ConnectionError>> {
        Box::pin(async move {
            lock(&self.requests).push((url.to_string(), request.clone()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            (self.handler)(url, &request)
        })
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ConnectBehavior {
    Succeed,
    Fail(String),
    Hang,
}

type AutoReply = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Scriptable [`WebSocketClient`].
///
/// Frames pushed with [`push_message`](Self::push_message) are returned by
/// `receive` in order. A pushed error makes `receive` fail once.
pub struct MockWebSocketClient {
    connect: Mutex<ConnectBehavior>,
    incoming_tx: mpsc::UnboundedSender<Result<String, String>>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String, String>>>,
    started_urls: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    send_error: Mutex<Option<String>>,
    auto_reply: Mutex<Option<AutoReply>>,
    stop_gate: Mutex<Option<Arc<Notify>>>,
    stop_count: AtomicUsize,
}

impl MockWebSocketClient {
    pub fn new() -> Arc<Self> {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connect: Mutex::new(ConnectBehavior::Succeed),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            started_urls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            auto_reply: Mutex::new(None),
            stop_gate: Mutex::new(None),
            stop_count: AtomicUsize::new(0),
        })
    }

    pub fn push_message(&self, message: &str) {
        let _ = self.incoming_tx.send(Ok(message.to_string()));
    }

    pub fn push_error(&self, error: &str) {
        let _ = self.incoming_tx.send(Err(error.to_string()));
    }

    pub fn succeed_connect(&self) {
        *lock(&self.connect) = ConnectBehavior::Succeed;
    }

    pub fn fail_connect(&self, error: &str) {
        *lock(&self.connect) = ConnectBehavior::Fail(error.to_string());
    }

    /// `start` never completes.
    pub fn hang_connect(&self) {
        *lock(&self.connect) = ConnectBehavior::Hang;
    }

    pub fn fail_send(&self, error: Option<&str>) {
        *lock(&self.send_error) = error.map(str::to_string);
    }

    /// After each successful send, pushes whatever `reply` returns.
    pub fn set_auto_reply(&self, reply: impl Fn(&str) -> Option<String> + Send + Sync + 'static) {
        *lock(&self.auto_reply) = Some(Arc::new(reply));
    }

    /// Makes `stop` block until [`release_stop`](Self::release_stop).
    pub fn hold_stop(&self) {
        *lock(&self.stop_gate) = Some(Arc::new(Notify::new()));
    }

    pub fn release_stop(&self) {
        if let Some(gate) = lock(&self.stop_gate).take() {
            gate.notify_one();
        }
    }

    pub fn started_urls(&self) -> Vec<String> {
        lock(&self.started_urls).clone()
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// Number of `stop` calls, counted on entry.
    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }
}

impl WebSocketClient for MockWebSocketClient {
    fn start<'a>(
        &'a self,
        url: &'a str,
        _format: TransferFormat,
    ) -> BoxFuture<'a, Result<(), ConnectionError>> {
        Box::pin(async move {
            lock(&self.started_urls).push(url.to_string());
            let behavior = lock(&self.connect).clone();
            match behavior {
                ConnectBehavior::Succeed => Ok(()),
                ConnectBehavior::Fail(error) => Err(ConnectionError::Transport(error)),
                ConnectBehavior::Hang => std::future::pending().await,
            }
        })
    }

    fn send(&self, payload: String) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            if let Some(error) = lock(&self.send_error).clone() {
                return Err(ConnectionError::Transport(error));
            }
            lock(&self.sent).push(payload.clone());
            let reply = lock(&self.auto_reply).clone();
            if let Some(message) = reply.and_then(|reply| reply(&payload)) {
                self.push_message(&message);
            }
            Ok(())
        })
    }

    fn receive(&self) -> BoxFuture<'_, Result<String, ConnectionError>> {
        Box::pin(async move {
            let mut incoming = self.incoming_rx.lock().await;
            match incoming.recv().await {
                Some(Ok(message)) => Ok(message),
                Some(Err(error)) => Err(ConnectionError::Transport(error)),
                None => Err(ConnectionError::Closed),
            }
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            let gate = lock(&self.stop_gate).clone();
            self.stop_count.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = gate {
                gate.notified().await;
            }
            Ok(())
        })
    }
}

/// Transport factory whose WebSocket transports all use `client`.
pub fn mock_transport_factory(client: Arc<MockWebSocketClient>) -> Arc<dyn TransportFactory> {
    Arc::new(DefaultTransportFactory::with_client_factory(Arc::new(
        move |_: &ClientConfig| client.clone() as Arc<dyn WebSocketClient>,
    )))
}

/// Transport factory that always fails with `UnsupportedTransport`.
pub fn failing_transport_factory() -> Arc<dyn TransportFactory> {
    struct Failing;

    impl TransportFactory for Failing {
        fn create(
            &self,
            kind: TransportKind,
            _config: &ClientConfig,
            _logger: &Logger,
        ) -> Result<Arc<dyn Transport>, ConnectionError> {
            Err(ConnectionError::UnsupportedTransport(kind))
        }
    }

    Arc::new(Failing)
}
