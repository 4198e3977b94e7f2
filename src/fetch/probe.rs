//! Diagnostic availability checks.

use std::time::{Duration, Instant};

use reqwest::header::CACHE_CONTROL;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use super::transport::{HttpRequest, HttpTransport};

/// What one candidate returned when probed
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub url: String,
    /// HTTP status, `None` when no response arrived
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub ok: bool,
    pub latency_ms: Option<u64>,
    /// Array length when the body is a JSON array
    pub record_count: Option<usize>,
    /// First element of the array
    pub sample: Option<Value>,
    pub error: Option<String>,
}

impl ProbeResult {
    fn failed(url: &Url, error: String) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            status_text: None,
            ok: false,
            latency_ms: None,
            record_count: None,
            sample: None,
            error: Some(error),
        }
    }
}

pub(super) async fn probe_url(
    transport: &dyn HttpTransport,
    url: &Url,
    timeout: Duration,
) -> ProbeResult {
    let request = HttpRequest::get(url.clone()).header(CACHE_CONTROL, "no-cache");
    let started = Instant::now();

    let response = match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return ProbeResult::failed(url, e.to_string()),
        Err(_) => {
            return ProbeResult::failed(url, format!("timeout after {}s", timeout.as_secs()))
        }
    };

    let latency_ms = started.elapsed().as_millis() as u64;
    let ok = response.status.is_success();
    let mut result = ProbeResult {
        url: url.to_string(),
        status: Some(response.status.as_u16()),
        status_text: response.status.canonical_reason().map(str::to_string),
        ok,
        latency_ms: Some(latency_ms),
        record_count: None,
        sample: None,
        error: None,
    };

    if ok {
        match serde_json::from_slice::<Value>(&response.body) {
            Ok(Value::Array(items)) => {
                result.record_count = Some(items.len());
                result.sample = items.into_iter().next();
            }
            Ok(_) => result.error = Some("payload is not an array".into()),
            Err(e) => result.error = Some(e.to_string()),
        }
    }

    result
}
