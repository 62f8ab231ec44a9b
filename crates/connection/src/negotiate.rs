//! Negotiate round-trip.

use reqwest::Method;

use hublink_protocol::NegotiationResponse;

use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::http::{HttpClient, HttpRequest};
use crate::url_builder;

/// POSTs to `{base_url}/negotiate` once and parses the body.
///
/// Redirects are returned to the caller, which owns the redirect bound.
pub async fn negotiate(
    http: &dyn HttpClient,
    base_url: &str,
    query_string: &str,
    config: &ClientConfig,
) -> Result<NegotiationResponse, ConnectionError> {
    let url = url_builder::build_negotiate(base_url, query_string)?;
    let request = HttpRequest {
        method: Method::POST,
        headers: config.request_headers(),
        body: None,
        timeout: config.http_timeout(),
    };

    let response = http.send(url.as_str(), request).await?;
    if response.status_code != 200 {
        return Err(ConnectionError::NegotiateStatus(response.status_code));
    }
    Ok(NegotiationResponse::parse(&response.content)?)
}
