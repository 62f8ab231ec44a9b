//! Negotiate and connect URL construction.

use reqwest::Url;

use crate::error::ConnectionError;

fn parse(base_url: &str) -> Result<Url, ConnectionError> {
    Url::parse(base_url).map_err(|e| ConnectionError::InvalidUrl(format!("{base_url}: {e}")))
}

/// Appends a caller-supplied query string (with or without a leading `?`).
fn merge_query(url: &mut Url, query_string: &str) {
    let extra = query_string.trim_start_matches('?');
    if extra.is_empty() {
        return;
    }
    let merged = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
        _ => extra.to_string(),
    };
    url.set_query(Some(&merged));
}

/// `{base_url}/negotiate` with the caller's query string.
pub fn build_negotiate(base_url: &str, query_string: &str) -> Result<Url, ConnectionError> {
    let mut url = parse(base_url)?;
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    merge_query(&mut url, query_string);
    Ok(url)
}

/// WebSocket URL for `connection_id`: `http` becomes `ws`, `https` becomes
/// `wss`, and `id` is appended after the caller's query string.
pub fn build_connect(
    base_url: &str,
    query_string: &str,
    connection_id: &str,
) -> Result<Url, ConnectionError> {
    let mut url = parse(base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConnectionError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {base_url}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ConnectionError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
    merge_query(&mut url, query_string);
    url.query_pairs_mut().append_pair("id", connection_id);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_url_appends_path() {
        let url = build_negotiate("http://fakeuri.org/hub", "").unwrap();
        assert_eq!(url.as_str(), "http://fakeuri.org/hub/negotiate");

        let url = build_negotiate("http://fakeuri.org/hub/", "").unwrap();
        assert_eq!(url.as_str(), "http://fakeuri.org/hub/negotiate");

        let url = build_negotiate("http://fakeuri.org", "").unwrap();
        assert_eq!(url.as_str(), "http://fakeuri.org/negotiate");
    }

    #[test]
    fn negotiate_url_merges_query() {
        let url = build_negotiate("http://fakeuri.org/hub?a=1", "?b=2").unwrap();
        assert_eq!(url.as_str(), "http://fakeuri.org/hub/negotiate?a=1&b=2");
    }

    #[test]
    fn connect_url_rewrites_scheme() {
        let url = build_connect("http://fakeuri.org/hub", "", "abc").unwrap();
        assert_eq!(url.as_str(), "ws://fakeuri.org/hub?id=abc");

        let url = build_connect("https://fakeuri.org/hub", "", "abc").unwrap();
        assert_eq!(url.as_str(), "wss://fakeuri.org/hub?id=abc");
    }

    #[test]
    fn connect_url_merges_query_before_id() {
        let url = build_connect("http://fakeuri.org/hub?x=1", "y=2", "a b").unwrap();
        assert_eq!(url.as_str(), "ws://fakeuri.org/hub?x=1&y=2&id=a+b");
    }

    #[test]
    fn invalid_urls_are_rejected() {
        assert!(matches!(
            build_negotiate("not a url", ""),
            Err(ConnectionError::InvalidUrl(_))
        ));
        assert!(matches!(
            build_connect("ftp://fakeuri.org", "", "abc"),
            Err(ConnectionError::InvalidUrl(_))
        ));
    }
}
