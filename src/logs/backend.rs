use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{BackendError, MalformedEventError};
use crate::logs::{LogEvent, QueryWindow};

const FILTER_LOG_EVENTS_TARGET: &str = "Logs_20140328.FilterLogEvents";
const AMZ_JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// One page request against the log source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub log_group_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_pattern: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log_stream_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl PageRequest {
    pub fn from_window(window: &QueryWindow, next_token: Option<String>) -> Self {
        Self {
            log_group_name: window.log_group.clone(),
            start_time: window.start_time,
            end_time: window.end_time,
            limit: (window.limit > 0).then_some(window.limit),
            filter_pattern: window.filter_pattern.clone(),
            log_stream_names: window.log_stream_names.clone(),
            next_token,
        }
    }
}

/// One page of results. Event order inside a page is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPage {
    pub events: Vec<LogEvent>,
    /// Continuation token; `None` means the result set is exhausted
    pub next_token: Option<String>,
}

/// The remote log-query contract consumed by [`crate::logs::LogFetcher`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn request_page(&self, request: PageRequest) -> Result<LogPage, BackendError>;
}

/// Log backend speaking the FilterLogEvents JSON protocol over HTTP.
///
/// Authentication is handled upstream: whatever headers the caller supplies
/// (for example from a signing proxy) are attached to every request.
#[derive(Debug, Clone)]
pub struct HttpLogBackend {
    client: Client,
    endpoint: String,
}

impl HttpLogBackend {
    pub fn new(endpoint: impl Into<String>, headers: &BTreeMap<String, String>) -> Result<Self, BackendError> {
        let endpoint = endpoint.into();
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BackendError::Rejected { status: 0, message: format!("invalid header name '{}': {}", name, e) })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| BackendError::Rejected { status: 0, message: format!("invalid value for header '{}': {}", name, e) })?;
            default_headers.insert(name, value);
        }

        let client = Client::builder().default_headers(default_headers).build()?;

        info!("HTTP_BACKEND: Created backend for endpoint {} with {} extra headers", endpoint, headers.len());
        Ok(Self { client, endpoint })
    }

    /// Wraps an already-configured client
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LogBackend for HttpLogBackend {
    async fn request_page(&self, request: PageRequest) -> Result<LogPage, BackendError> {
        debug!(
            "HTTP_BACKEND: FilterLogEvents group={} start={:?} end={:?} token={}",
            request.log_group_name,
            request.start_time,
            request.end_time,
            request.next_token.is_some()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, AMZ_JSON_CONTENT_TYPE)
            .header("X-Amz-Target", FILTER_LOG_EVENTS_TARGET)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        decode_page(&body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPage {
    #[serde(default)]
    events: Vec<serde_json::Value>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    timestamp: i64,
    #[serde(default)]
    ingestion_time: Option<i64>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

/// Decode a single event payload
pub fn decode_event(value: &serde_json::Value) -> Result<LogEvent, MalformedEventError> {
    let raw: RawEvent = serde_json::from_value(value.clone()).map_err(|e| MalformedEventError {
        reason: e.to_string(),
        payload: value.to_string(),
    })?;

    Ok(LogEvent {
        timestamp: raw.timestamp,
        ingestion_time: raw.ingestion_time.unwrap_or(0),
        message: raw.message,
    })
}

/// Decode a FilterLogEvents response body, dropping malformed events
pub fn decode_page(body: &str) -> Result<LogPage, BackendError> {
    let raw: RawPage = serde_json::from_str(body)
        .map_err(|e| BackendError::InvalidResponse(format!("undecodable page: {}", e)))?;

    let mut events = Vec::with_capacity(raw.events.len());
    for value in &raw.events {
        match decode_event(value) {
            Ok(event) => events.push(event),
            Err(e) => warn!("HTTP_BACKEND: Dropping event: {}", e),
        }
    }

    // An empty token means the same as no token
    let next_token = raw.next_token.filter(|token| !token.is_empty());

    Ok(LogPage { events, next_token })
}

/// Map a non-success HTTP response onto the backend error taxonomy
pub fn classify_error(status: StatusCode, body: &str) -> BackendError {
    let parsed: Option<RawError> = serde_json::from_str(body).ok();
    let error_type = parsed.as_ref().and_then(|e| e.error_type.clone()).unwrap_or_default();
    let message = parsed
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::TOO_MANY_REQUESTS || error_type.contains("ThrottlingException") {
        return BackendError::Throttled(message);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::Unavailable(format!("{}: {}", status, message))
        }
        _ => BackendError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}
