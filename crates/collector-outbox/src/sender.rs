//! Batch and single-record senders.

use crate::config::{ANONYMOUS_HEADER, GET_PATH, OutboxConfig};
use crate::connection::{CollectorConnection, PixelOutcome};
use crate::error::OutboxResult;
use crate::payload::{with_sent_timestamp, EventPayload, SENT_TIMESTAMP_KEY};
use crate::queue::PostRecord;
use crate::transport::{GetVia, ResolvedTransport};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The records left the queue's custody: a 2xx completion, an accepted
    /// beacon, or an optimistic pixel continuation.
    Delivered,
    /// Terminal failure with the status to classify. Status 0 stands for
    /// a timeout or a statusless transport error.
    Failed {
        /// Terminal HTTP status, or 0.
        status: u16,
        /// Failure description.
        message: String,
    },
    /// Pixel error event: keep the record queued and halt quietly; an
    /// image load carries no status to classify.
    Halted,
}

/// Select the longest queue prefix whose cumulative size stays below the
/// byte cap.
///
/// At least one record is always selected: the cap bounds records joining
/// a batch, not the first member. A single record larger than the cap was
/// already diverted at enqueue time.
pub fn select_batch(records: &VecDeque<PostRecord>, max_post_bytes: usize) -> Vec<PostRecord> {
    let mut batch = Vec::new();
    let mut total = 0usize;
    for record in records {
        if !batch.is_empty() && total + record.bytes >= max_post_bytes {
            break;
        }
        total += record.bytes;
        batch.push(record.clone());
    }
    batch
}

/// Wire envelope for POST batches.
#[derive(Serialize)]
struct PostEnvelope<'a> {
    schema: &'a str,
    data: &'a [EventPayload],
}

/// Serialize the POST envelope.
pub fn build_post_body(schema: &str, data: &[EventPayload]) -> OutboxResult<Vec<u8>> {
    Ok(serde_json::to_vec(&PostEnvelope { schema, data })?)
}

/// Attach the shared delivery timestamp to every batch member.
///
/// All records of one physical request carry the same send-time marker,
/// stamped just before transmission rather than at enqueue time.
pub fn stamp_batch(data: &mut [EventPayload], stm: &str) {
    for payload in data.iter_mut() {
        payload.insert(
            SENT_TIMESTAMP_KEY.to_string(),
            Value::String(stm.to_string()),
        );
    }
}

/// Performs delivery attempts against the collector.
///
/// Holds the immutable send-side knobs resolved at construction; the
/// manager owns queue mutation and outcome policy.
pub struct BatchSender {
    connection: Arc<dyn CollectorConnection>,
    post_path: String,
    payload_schema: String,
    attach_sent_timestamp: bool,
    request_timeout: Duration,
    headers: Vec<(String, String)>,
}

impl BatchSender {
    /// Create a sender for the resolved transport.
    pub fn new(
        connection: Arc<dyn CollectorConnection>,
        config: &OutboxConfig,
        transport: &ResolvedTransport,
    ) -> Self {
        let mut headers = Vec::new();
        if transport.custom_headers_enabled {
            headers.extend(config.custom_headers.iter().cloned());
        }
        if config.anonymous_tracking {
            headers.push((ANONYMOUS_HEADER.to_string(), "*".to_string()));
        }

        Self {
            connection,
            post_path: config.post_path.clone(),
            payload_schema: config.payload_schema.clone(),
            attach_sent_timestamp: config.attach_sent_timestamp,
            request_timeout: config.connection_timeout,
            headers,
        }
    }

    /// Headers attached to every request-based send.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Attempt delivery of a POST batch.
    ///
    /// The beacon fast-path is tried first when enabled; acceptance is
    /// optimistic success. Otherwise the request races the connection
    /// timeout, and the loser's effect is discarded.
    pub async fn send_post_batch(
        &self,
        collector_url: &str,
        batch: &[PostRecord],
        beacon: bool,
    ) -> SendOutcome {
        let (url, body) = match self.prepare_post(collector_url, batch) {
            Ok(prepared) => prepared,
            Err(e) => {
                return SendOutcome::Failed {
                    status: 0,
                    message: e.to_string(),
                }
            }
        };

        if beacon && self.connection.send_beacon(&url, body.clone()) {
            debug!(events = batch.len(), "Beacon accepted batch");
            return SendOutcome::Delivered;
        }

        request_outcome(
            timeout(
                self.request_timeout,
                self.connection.post(&url, body, &self.headers),
            )
            .await,
        )
    }

    /// Attempt delivery of a single GET record.
    pub async fn send_get_record(
        &self,
        collector_url: &str,
        record: &str,
        via: GetVia,
    ) -> SendOutcome {
        let url = self.get_url(collector_url, record);
        match via {
            GetVia::Request => request_outcome(
                timeout(
                    self.request_timeout,
                    self.connection.get(&url, &self.headers),
                )
                .await,
            ),
            GetVia::Pixel => {
                match timeout(self.request_timeout, self.connection.fetch_pixel(&url)).await {
                    Ok(PixelOutcome::Loaded) => SendOutcome::Delivered,
                    Ok(PixelOutcome::Errored) => SendOutcome::Halted,
                    // Neither load nor error inside the window: the load is
                    // presumed still outstanding server-side, continue.
                    Err(_) => SendOutcome::Delivered,
                }
            }
        }
    }

    /// Blocking POST attempt for the teardown flush. No beacon, no timer
    /// race; the blocking channel applies the timeout itself.
    pub fn send_post_batch_blocking(
        &self,
        collector_url: &str,
        batch: &[PostRecord],
    ) -> SendOutcome {
        let (url, body) = match self.prepare_post(collector_url, batch) {
            Ok(prepared) => prepared,
            Err(e) => {
                return SendOutcome::Failed {
                    status: 0,
                    message: e.to_string(),
                }
            }
        };
        blocking_outcome(self.connection.post_blocking(&url, body, &self.headers))
    }

    /// Blocking GET attempt for the teardown flush.
    pub fn send_get_record_blocking(&self, collector_url: &str, record: &str) -> SendOutcome {
        let url = self.get_url(collector_url, record);
        blocking_outcome(self.connection.get_blocking(&url, &self.headers))
    }

    fn prepare_post(
        &self,
        collector_url: &str,
        batch: &[PostRecord],
    ) -> OutboxResult<(String, Vec<u8>)> {
        let mut data: Vec<EventPayload> = batch.iter().map(|r| r.payload.clone()).collect();
        if self.attach_sent_timestamp {
            let stm = chrono::Utc::now().timestamp_millis().to_string();
            stamp_batch(&mut data, &stm);
        }
        let body = build_post_body(&self.payload_schema, &data)?;
        Ok((format!("{}{}", collector_url, self.post_path), body))
    }

    fn get_url(&self, collector_url: &str, record: &str) -> String {
        let query = if self.attach_sent_timestamp {
            let stm = chrono::Utc::now().timestamp_millis().to_string();
            with_sent_timestamp(record, &stm)
        } else {
            record.to_string()
        };
        format!("{}{}{}", collector_url, GET_PATH, query)
    }
}

fn request_outcome(
    raced: Result<OutboxResult<u16>, tokio::time::error::Elapsed>,
) -> SendOutcome {
    match raced {
        Ok(Ok(status)) if (200..300).contains(&status) => SendOutcome::Delivered,
        Ok(Ok(status)) => SendOutcome::Failed {
            status,
            message: format!("HTTP status {}", status),
        },
        Ok(Err(e)) => SendOutcome::Failed {
            status: 0,
            message: e.to_string(),
        },
        Err(_) => SendOutcome::Failed {
            status: 0,
            message: "timeout".to_string(),
        },
    }
}

fn blocking_outcome(sent: OutboxResult<u16>) -> SendOutcome {
    match sent {
        Ok(status) if (200..300).contains(&status) => SendOutcome::Delivered,
        Ok(status) => SendOutcome::Failed {
            status,
            message: format!("HTTP status {}", status),
        },
        Err(e) => SendOutcome::Failed {
            status: 0,
            message: e.to_string(),
        },
    }
}
