//! HTTP collaborator used by the negotiator.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Method;

use crate::config::ClientConfig;
use crate::error::ConnectionError;

/// One outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub content: String,
}

/// Sends a single HTTP request.
pub trait HttpClient: Send + Sync {
    fn send<'a>(
        &'a self,
        url: &'a str,
        request: HttpRequest,
    ) -> BoxFuture<'a, Result<HttpResponse, ConnectionError>>;
}

/// [`HttpClient`] backed by `reqwest`.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Builds a client honoring the configured proxy and timeout.
    pub fn new(config: &ClientConfig) -> Result<Self, ConnectionError> {
        let mut builder = reqwest::Client::builder().timeout(config.http_timeout());
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send<'a>(
        &'a self,
        url: &'a str,
        request: HttpRequest,
    ) -> BoxFuture<'a, Result<HttpResponse, ConnectionError>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method, url)
                .timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await?;
            let status_code = resp.status().as_u16();
            let content = resp.text().await?;
            Ok(HttpResponse {
                status_code,
                content,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_defaults() {
        assert!(ReqwestHttpClient::new(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn client_builds_with_proxy() {
        let config = ClientConfig {
            proxy: Some("http://127.0.0.1:3128".into()),
            ..ClientConfig::default()
        };
        assert!(ReqwestHttpClient::new(&config).is_ok());
    }
}
