//! Connection layer for hublink.
//!
//! [`Connection`] drives negotiation and the WebSocket transport through a
//! four-state lifecycle. The HTTP and WebSocket clients sit behind traits so
//! tests can substitute them.

pub mod config;
pub mod connection;
pub mod error;
pub mod guard;
pub mod http;
pub mod logger;
pub mod negotiate;
pub mod state;
pub mod transport;
pub mod url_builder;
pub mod websocket_client;
pub mod websocket_transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{ClientConfig, Credentials};
pub use connection::{Connection, DisconnectedCallback, MessageReceivedCallback};
pub use error::ConnectionError;
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use logger::{LogWriter, Logger, TraceLevel};
pub use state::ConnectionState;
pub use transport::{DefaultTransportFactory, Transport, TransportFactory};
pub use websocket_client::{TungsteniteClient, WebSocketClient};
pub use websocket_transport::WebSocketTransport;
