//! Shared HTTP client and header helpers.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};

use crate::config::ThreadlineConfig;
use crate::error::{Result, ThreadlineError};

/// Client for request/response calls: the timeout bounds the whole exchange.
pub fn build_client(config: &ThreadlineConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .pool_max_idle_per_host(10)
        .build()
        .map_err(ThreadlineError::Network)
}

/// Client for long-lived event streams.
///
/// No total timeout: a reply may stream for as long as chunks keep arriving.
/// The configured timeout bounds connecting and each silent gap between reads.
pub fn build_stream_client(config: &ThreadlineConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.request_timeout())
        .read_timeout(config.request_timeout())
        .pool_max_idle_per_host(10)
        .build()
        .map_err(ThreadlineError::Network)
}

/// JSON request headers, plus the CSRF header when a token is configured.
pub fn json_headers(config: &ThreadlineConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    insert_csrf(&mut headers, config)?;
    Ok(headers)
}

/// Headers for an event-stream request.
pub fn event_stream_headers(config: &ThreadlineConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    insert_csrf(&mut headers, config)?;
    Ok(headers)
}

fn insert_csrf(headers: &mut HeaderMap, config: &ThreadlineConfig) -> Result<()> {
    let Some(token) = config.csrf_token.as_deref() else {
        return Ok(());
    };
    let name = HeaderName::from_bytes(config.csrf_header.as_bytes()).map_err(|e| {
        ThreadlineError::Configuration(format!("invalid csrf_header '{}': {e}", config.csrf_header))
    })?;
    let value = HeaderValue::from_str(token)
        .map_err(|e| ThreadlineError::Configuration(format!("invalid csrf_token: {e}")))?;
    headers.insert(name, value);
    Ok(())
}

/// Map a non-success status into a typed error.
pub fn status_to_error(status: u16, body: &str) -> ThreadlineError {
    let message = extract_error_message(body).unwrap_or_else(|| body.to_string());
    match status {
        401 | 403 => ThreadlineError::Authentication(message),
        _ => ThreadlineError::api(status, message),
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(ToString::to_string)
}
