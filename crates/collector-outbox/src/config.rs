//! Queue manager configuration.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of the wire envelope wrapping POST batches.
pub const DEFAULT_PAYLOAD_SCHEMA: &str = "tracker/payload_data/1-0-0";

/// Default request path for POST delivery.
pub const DEFAULT_POST_PATH: &str = "/telemetry/tp2";

/// Fixed request path for GET delivery.
pub const GET_PATH: &str = "/i";

/// Header marking a request as anonymously tracked.
///
/// Attached to request-based sends only; a beacon cannot carry headers.
pub const ANONYMOUS_HEADER: &str = "X-Anonymous-Tracking";

/// Delivery method requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMethod {
    /// Batched POST requests.
    Post,
    /// Single-record GET requests.
    Get,
    /// POST with the fire-and-forget beacon fast-path when available.
    Beacon,
}

/// A failed delivery attempt, surfaced to the failure callback.
#[derive(Debug, Clone)]
pub struct RequestFailure {
    /// Terminal HTTP status, or 0 for a timeout or statusless failure.
    pub status: u16,
    /// Human-readable failure description.
    pub message: String,
    /// The raw event records that were part of the attempt.
    pub events: Vec<Value>,
    /// Whether the records stay queued for a later drain.
    pub will_retry: bool,
}

/// Callback fired with the raw records of a delivered batch.
pub type SuccessCallback = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Callback fired when a delivery attempt terminally fails.
pub type FailureCallback = Arc<dyn Fn(&RequestFailure) + Send + Sync>;

/// Configuration for the outbound queue manager.
///
/// Supplied once at construction. The collector URL and buffer size are
/// mutable afterwards through setters on the manager; everything else,
/// including the resolved transport mode, is fixed for the queue's
/// lifetime.
#[derive(Clone)]
pub struct OutboxConfig {
    /// Mirror the queue into durable storage so it survives a restart.
    pub use_local_storage: bool,
    /// Requested delivery method; `None` defaults to POST.
    pub event_method: Option<EventMethod>,
    /// Collector path for POST requests.
    pub post_path: String,
    /// Number of queued records that triggers a drain.
    pub buffer_size: usize,
    /// Byte budget for a POST batch.
    pub max_post_bytes: usize,
    /// Byte budget for a single GET record; 0 means no limit.
    pub max_get_bytes: usize,
    /// Attach the shared send-time field just before transmission.
    pub attach_sent_timestamp: bool,
    /// Maximum number of records mirrored to durable storage.
    pub max_queue_size: usize,
    /// How long a request may stay in flight before it counts as failed.
    pub connection_timeout: Duration,
    /// Mark every request with the anonymity header.
    pub anonymous_tracking: bool,
    /// Extra headers for request-based sends; ignored when beacon was
    /// requested.
    pub custom_headers: Vec<(String, String)>,
    /// Send requests with credentials (cookies).
    pub with_credentials: bool,
    /// Statuses that are always retried, even if also listed below.
    pub retry_status_codes: Vec<u16>,
    /// Statuses that are never retried.
    pub dont_retry_status_codes: Vec<u16>,
    /// One-shot identity service called before the first drain send.
    pub id_service_url: Option<String>,
    /// Global retry switch; off means every failure is terminal.
    pub retry_failed_requests: bool,
    /// Schema identifier stamped into the POST envelope.
    pub payload_schema: String,
    /// Fired with the raw records of each delivered batch.
    pub on_success: Option<SuccessCallback>,
    /// Fired when a delivery attempt terminally fails.
    pub on_failure: Option<FailureCallback>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            use_local_storage: true,
            event_method: None,
            post_path: DEFAULT_POST_PATH.to_string(),
            buffer_size: 1,
            max_post_bytes: 40_000,
            max_get_bytes: 0,
            attach_sent_timestamp: true,
            max_queue_size: 1_000,
            connection_timeout: Duration::from_secs(5),
            anonymous_tracking: false,
            custom_headers: Vec::new(),
            with_credentials: true,
            retry_status_codes: Vec::new(),
            dont_retry_status_codes: Vec::new(),
            id_service_url: None,
            retry_failed_requests: true,
            payload_schema: DEFAULT_PAYLOAD_SCHEMA.to_string(),
            on_success: None,
            on_failure: None,
        }
    }
}

impl fmt::Debug for OutboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboxConfig")
            .field("use_local_storage", &self.use_local_storage)
            .field("event_method", &self.event_method)
            .field("post_path", &self.post_path)
            .field("buffer_size", &self.buffer_size)
            .field("max_post_bytes", &self.max_post_bytes)
            .field("max_get_bytes", &self.max_get_bytes)
            .field("attach_sent_timestamp", &self.attach_sent_timestamp)
            .field("max_queue_size", &self.max_queue_size)
            .field("connection_timeout", &self.connection_timeout)
            .field("anonymous_tracking", &self.anonymous_tracking)
            .field("with_credentials", &self.with_credentials)
            .field("retry_status_codes", &self.retry_status_codes)
            .field("dont_retry_status_codes", &self.dont_retry_status_codes)
            .field("id_service_url", &self.id_service_url)
            .field("retry_failed_requests", &self.retry_failed_requests)
            .field("payload_schema", &self.payload_schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OutboxConfig::default();
        assert!(config.use_local_storage);
        assert_eq!(config.event_method, None);
        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.max_post_bytes, 40_000);
        assert_eq!(config.max_get_bytes, 0);
        assert_eq!(config.max_queue_size, 1_000);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert!(config.retry_failed_requests);
        assert!(config.retry_status_codes.is_empty());
        assert!(config.dont_retry_status_codes.is_empty());
    }

    #[test]
    fn test_config_debug_omits_callbacks() {
        let config = OutboxConfig {
            on_success: Some(Arc::new(|_| {})),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("buffer_size"));
        assert!(!rendered.contains("on_success"));
    }
}
