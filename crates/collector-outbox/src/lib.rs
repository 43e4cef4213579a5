//! Reliable outbound event queue for collector delivery.
//!
//! This crate provides:
//! - OutboxManager: single-flight drain loop over a persisted FIFO queue
//! - BatchSender: byte-budgeted POST batches, beacon fast-path, GET fallbacks
//! - CollectorConnection: injectable delivery channel with a reqwest implementation
//!
//! The transport mode (batched POST vs. single-record GET) is resolved once
//! at construction from the requested method and the environment's
//! capabilities; the queue holds exactly one record shape for its lifetime.

mod config;
mod connection;
mod error;
mod manager;
mod payload;
mod queue;
mod retry;
mod sender;
mod transport;

pub use config::{
    EventMethod, FailureCallback, OutboxConfig, RequestFailure, SuccessCallback, ANONYMOUS_HEADER,
    DEFAULT_PAYLOAD_SCHEMA, DEFAULT_POST_PATH, GET_PATH,
};
pub use connection::{CollectorConnection, HttpCollectorConnection, PixelOutcome};
pub use error::{OutboxError, OutboxResult};
pub use manager::OutboxManager;
pub use payload::{
    post_record_bytes, stringify_payload, to_query_string, EventPayload, SENT_TIMESTAMP_KEY,
};
pub use queue::{PendingQueue, PostRecord, QueueStore};
pub use retry::should_retry;
pub use sender::{build_post_body, select_batch, stamp_batch, BatchSender, SendOutcome};
pub use transport::{
    has_defective_beacon, resolve_transport, GetVia, ResolvedTransport, TransportCapabilities,
    TransportMode,
};
