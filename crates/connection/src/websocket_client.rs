//! WebSocket collaborator used by the WebSocket transport.

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;

use hublink_protocol::TransferFormat;

use crate::config::ClientConfig;
use crate::error::ConnectionError;

/// Duplex text channel to the server.
///
/// `receive` yields one frame at a time. It is only ever called by one task.
pub trait WebSocketClient: Send + Sync {
    fn start<'a>(
        &'a self,
        url: &'a str,
        format: TransferFormat,
    ) -> BoxFuture<'a, Result<(), ConnectionError>>;

    fn send(&self, payload: String) -> BoxFuture<'_, Result<(), ConnectionError>>;

    fn receive(&self) -> BoxFuture<'_, Result<String, ConnectionError>>;

    fn stop(&self) -> BoxFuture<'_, Result<(), ConnectionError>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`WebSocketClient`] backed by `tokio-tungstenite`.
pub struct TungsteniteClient {
    headers: BTreeMap<String, String>,
    write: Mutex<Option<SplitSink<WsStream, Message>>>,
    read: Mutex<Option<SplitStream<WsStream>>>,
}

impl TungsteniteClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            headers: config.request_headers(),
            write: Mutex::new(None),
            read: Mutex::new(None),
        }
    }

    fn upgrade_request(
        &self,
        url: &str,
    ) -> Result<tungstenite::handshake::client::Request, ConnectionError> {
        let mut request = url.into_client_request()?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConnectionError::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConnectionError::InvalidHeader(format!("{name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }
}

impl WebSocketClient for TungsteniteClient {
    fn start<'a>(
        &'a self,
        url: &'a str,
        _format: TransferFormat,
    ) -> BoxFuture<'a, Result<(), ConnectionError>> {
        Box::pin(async move {
            let request = self.upgrade_request(url)?;
            let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
            let (write, read) = ws_stream.split();
            *self.write.lock().await = Some(write);
            *self.read.lock().await = Some(read);
            Ok(())
        })
    }

    fn send(&self, payload: String) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            let mut guard = self.write.lock().await;
            let write = guard.as_mut().ok_or(ConnectionError::Closed)?;
            write.send(Message::Text(payload.into())).await?;
            Ok(())
        })
    }

    fn receive(&self) -> BoxFuture<'_, Result<String, ConnectionError>> {
        Box::pin(async move {
            let mut guard = self.read.lock().await;
            let read = guard.as_mut().ok_or(ConnectionError::Closed)?;
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => {
                        return String::from_utf8(data.to_vec())
                            .map_err(|e| ConnectionError::Transport(e.to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        trace!(?frame, "received close frame");
                        return Err(ConnectionError::Closed);
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(ConnectionError::Closed),
                }
            }
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            let Some(mut write) = self.write.lock().await.take() else {
                return Ok(());
            };
            match write.send(Message::Close(None)).await {
                Ok(())
                | Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_request_carries_headers() {
        let mut config = ClientConfig::default();
        config.headers.insert("X-Client".into(), "tests".into());
        config.set_bearer_token("secret");
        let client = TungsteniteClient::new(&config);

        let request = client.upgrade_request("ws://localhost:1/hub?id=1").unwrap();
        assert_eq!(request.headers()["X-Client"], "tests");
        assert_eq!(request.headers()["Authorization"], "Bearer secret");
        assert_eq!(request.uri().query(), Some("id=1"));
    }

    #[test]
    fn invalid_header_is_rejected() {
        let mut config = ClientConfig::default();
        config.headers.insert("bad header".into(), "x".into());
        let client = TungsteniteClient::new(&config);
        assert!(matches!(
            client.upgrade_request("ws://localhost:1/hub"),
            Err(ConnectionError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn operations_before_start_report_closed() {
        let client = TungsteniteClient::new(&ClientConfig::default());
        assert!(matches!(
            client.send("x".into()).await,
            Err(ConnectionError::Closed)
        ));
        assert!(matches!(client.receive().await, Err(ConnectionError::Closed)));
        assert!(client.stop().await.is_ok());
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let client = TungsteniteClient::new(&ClientConfig::default());
        // Port 1 on loopback is never listening in test environments.
        let result = client.start("ws://127.0.0.1:1/hub", TransferFormat::Text).await;
        assert!(matches!(result, Err(ConnectionError::WebSocket(_))));
    }
}
