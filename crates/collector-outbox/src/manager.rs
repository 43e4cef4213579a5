//! Outbound queue manager: enqueue, drain state machine, lifecycle hooks.

use crate::config::{OutboxConfig, RequestFailure};
use crate::connection::CollectorConnection;
use crate::error::{OutboxError, OutboxResult};
use crate::payload::{post_record_bytes, stringify_payload, to_query_string, EventPayload};
use crate::queue::{PendingQueue, PostRecord, QueueStore};
use crate::retry::should_retry;
use crate::sender::{select_batch, BatchSender, SendOutcome};
use crate::transport::{resolve_transport, GetVia, ResolvedTransport, TransportCapabilities, TransportMode};
use page_lifecycle_orchestrator::{FlushableQueue, LifecycleOrchestrator};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracker_kv_storage::KeyValueStorage;

/// Work snapshotted from the queue head for one delivery attempt.
enum Attempt {
    Post(Vec<PostRecord>),
    Get(String),
}

/// Outbound queue manager for a single tracker instance.
///
/// Owns the pending queue, its durable mirror, and the single-flight drain
/// loop. Records are attempted strictly oldest-first; a retryable failure
/// on the head batch blocks everything behind it until the head resolves,
/// preserving event order at the collector.
pub struct OutboxManager {
    transport: ResolvedTransport,
    config: OutboxConfig,
    sender: BatchSender,
    connection: Arc<dyn CollectorConnection>,
    store: QueueStore,
    queue: Mutex<PendingQueue>,
    collector_url: RwLock<Option<String>>,
    buffer_size: AtomicUsize,
    /// Mutual-exclusion flag for the drain loop. While set, external
    /// triggers are no-ops; the loop is its own sole driver until it halts.
    executing: AtomicBool,
    id_service_called: AtomicBool,
}

impl OutboxManager {
    /// Create a queue manager and register it with the lifecycle
    /// coordinator for forced flushing at teardown.
    ///
    /// Reads any pre-existing persisted queue for this instance and
    /// transport mode. The transport mode resolved here is immutable for
    /// the manager's lifetime.
    pub fn new(
        namespace: &str,
        config: OutboxConfig,
        capabilities: TransportCapabilities,
        storage: Option<Arc<dyn KeyValueStorage>>,
        connection: Arc<dyn CollectorConnection>,
        lifecycle: &LifecycleOrchestrator,
    ) -> Arc<Self> {
        let storage = if config.use_local_storage { storage } else { None };
        let transport = resolve_transport(&config, &capabilities, storage.is_some());
        let store = QueueStore::new(
            storage,
            namespace,
            transport.mode.tag(),
            config.max_queue_size,
        );

        let queue = match transport.mode {
            TransportMode::Post { .. } => PendingQueue::Post(store.load_post()),
            TransportMode::Get { .. } => PendingQueue::Get(store.load_get()),
        };
        if !queue.is_empty() {
            info!(count = queue.len(), mode = transport.mode.tag(), "Restored persisted queue");
        }

        let sender = BatchSender::new(connection.clone(), &config, &transport);
        let buffer_size = transport.buffer_size;

        let manager = Arc::new(Self {
            transport,
            config,
            sender,
            connection,
            store,
            queue: Mutex::new(queue),
            collector_url: RwLock::new(None),
            buffer_size: AtomicUsize::new(buffer_size),
            executing: AtomicBool::new(false),
            id_service_called: AtomicBool::new(false),
        });
        lifecycle.register_queue(manager.clone());
        manager
    }

    /// Set the collector endpoint. Draining before this is a fatal
    /// configuration error.
    pub fn set_collector_url(&self, url: impl Into<String>) {
        let mut guard = self.collector_url.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(url.into());
    }

    /// Update the drain trigger threshold, re-applying the batching-safety
    /// rules: anything other than POST mode with durable persistence is
    /// forced back to 1.
    pub fn set_buffer_size(&self, buffer_size: usize) {
        let effective = if self.transport.mode.is_post() && self.store.is_persistent() {
            buffer_size.max(1)
        } else {
            1
        };
        self.buffer_size.store(effective, Ordering::SeqCst);
    }

    /// The transport resolved at construction.
    pub fn transport(&self) -> &ResolvedTransport {
        &self.transport
    }

    /// Number of records currently pending.
    pub async fn pending_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Accept a record for delivery.
    ///
    /// The payload's values are stringified, its encoded size is checked
    /// against the active transport's byte budget (oversized records are
    /// sent immediately and directly, bypassing the queue), and the queue
    /// is mirrored to storage. A drain is triggered when the queue has
    /// accumulated the buffered count, or immediately when the mirror
    /// write failed for this call.
    pub async fn enqueue(&self, payload: EventPayload) -> OutboxResult<()> {
        let payload = stringify_payload(&payload);

        let (len, persisted) = match self.transport.mode {
            TransportMode::Post { .. } => {
                let bytes = post_record_bytes(&payload);
                if bytes > self.config.max_post_bytes {
                    warn!(
                        bytes,
                        cap = self.config.max_post_bytes,
                        "Event exceeds POST byte budget, sending standalone"
                    );
                    return self.send_oversized_post(payload, bytes).await;
                }
                let mut queue = self.queue.lock().await;
                if let PendingQueue::Post(records) = &mut *queue {
                    records.push_back(PostRecord { payload, bytes });
                }
                (queue.len(), self.store.persist(&queue))
            }
            TransportMode::Get { .. } => {
                let record = to_query_string(&payload);
                let bytes = record.len();
                if self.config.max_get_bytes > 0 && bytes > self.config.max_get_bytes {
                    warn!(
                        bytes,
                        cap = self.config.max_get_bytes,
                        "Event exceeds GET byte budget, sending standalone"
                    );
                    return self.send_oversized_get(record).await;
                }
                let mut queue = self.queue.lock().await;
                if let PendingQueue::Get(records) = &mut *queue {
                    records.push_back(record);
                }
                (queue.len(), self.store.persist(&queue))
            }
        };

        if len >= self.buffer_size.load(Ordering::SeqCst) || !persisted {
            self.drain().await?;
        }
        Ok(())
    }

    /// External drain trigger: walk the queue until empty or blocked.
    pub async fn flush(&self) -> OutboxResult<()> {
        self.drain().await
    }

    /// Single-flight entry to the drain loop.
    async fn drain(&self) -> OutboxResult<()> {
        if self.executing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.drain_loop().await;
        self.executing.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_loop(&self) -> OutboxResult<()> {
        loop {
            let attempt = {
                let mut queue = self.queue.lock().await;
                discard_malformed_head(&mut queue, &self.store);
                if queue.is_empty() {
                    return Ok(());
                }
                match &*queue {
                    PendingQueue::Post(records) => {
                        Attempt::Post(select_batch(records, self.config.max_post_bytes))
                    }
                    PendingQueue::Get(records) => {
                        Attempt::Get(records.front().cloned().unwrap_or_default())
                    }
                }
            };

            let collector_url = self.require_collector_url()?;
            self.call_id_service_once().await;

            let (count, events, outcome) = match attempt {
                Attempt::Post(batch) => {
                    let events: Vec<Value> =
                        batch.iter().map(|r| Value::Object(r.payload.clone())).collect();
                    let beacon = matches!(self.transport.mode, TransportMode::Post { beacon: true });
                    let outcome = self.sender.send_post_batch(&collector_url, &batch, beacon).await;
                    (batch.len(), events, outcome)
                }
                Attempt::Get(record) => {
                    let via = match self.transport.mode {
                        TransportMode::Get { via } => via,
                        TransportMode::Post { .. } => GetVia::Request,
                    };
                    let events = vec![Value::String(record.clone())];
                    let outcome = self.sender.send_get_record(&collector_url, &record, via).await;
                    (1, events, outcome)
                }
            };

            match outcome {
                SendOutcome::Delivered => {
                    self.remove_front(count).await;
                    debug!(count, "Batch delivered");
                    self.report_success(&events);
                }
                SendOutcome::Failed { status, message } => {
                    let will_retry = should_retry(status, &self.config);
                    if !will_retry {
                        warn!(status, count, "Dropping batch, will not retry");
                        self.remove_front(count).await;
                    }
                    self.report_failure(RequestFailure {
                        status,
                        message,
                        events,
                        will_retry,
                    });
                    return Ok(());
                }
                SendOutcome::Halted => {
                    self.report_failure(RequestFailure {
                        status: 0,
                        message: "pixel error".to_string(),
                        events,
                        will_retry: true,
                    });
                    return Ok(());
                }
            }
        }
    }

    /// Fire the one-shot identity-service call before the very first send
    /// of this queue's lifetime. Any completion lets the drain proceed.
    async fn call_id_service_once(&self) {
        let Some(url) = &self.config.id_service_url else {
            return;
        };
        if self.id_service_called.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(url = %url, "Calling identity service");
        let _ = self.connection.get(url, self.sender.headers()).await;
    }

    async fn send_oversized_post(&self, payload: EventPayload, bytes: usize) -> OutboxResult<()> {
        let collector_url = self.require_collector_url()?;
        let record = PostRecord { payload, bytes };
        let events = vec![Value::Object(record.payload.clone())];
        let beacon = matches!(self.transport.mode, TransportMode::Post { beacon: true });
        let outcome = self
            .sender
            .send_post_batch(&collector_url, std::slice::from_ref(&record), beacon)
            .await;
        self.report_bypass(outcome, events);
        Ok(())
    }

    async fn send_oversized_get(&self, record: String) -> OutboxResult<()> {
        let collector_url = self.require_collector_url()?;
        let via = match self.transport.mode {
            TransportMode::Get { via } => via,
            TransportMode::Post { .. } => GetVia::Request,
        };
        let events = vec![Value::String(record.clone())];
        let outcome = self.sender.send_get_record(&collector_url, &record, via).await;
        self.report_bypass(outcome, events);
        Ok(())
    }

    /// Report the outcome of a bypass send. A bypass record was never
    /// queued, so nothing is retained for retry either way.
    fn report_bypass(&self, outcome: SendOutcome, events: Vec<Value>) {
        match outcome {
            SendOutcome::Delivered => self.report_success(&events),
            SendOutcome::Failed { status, message } => self.report_failure(RequestFailure {
                status,
                message,
                events,
                will_retry: false,
            }),
            SendOutcome::Halted => self.report_failure(RequestFailure {
                status: 0,
                message: "pixel error".to_string(),
                events,
                will_retry: false,
            }),
        }
    }

    async fn remove_front(&self, count: usize) {
        let mut queue = self.queue.lock().await;
        queue.remove_front(count);
        self.store.persist(&queue);
    }

    fn require_collector_url(&self) -> OutboxResult<String> {
        self.collector_url
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(OutboxError::MissingCollectorUrl)
    }

    fn report_success(&self, events: &[Value]) {
        if let Some(callback) = &self.config.on_success {
            callback(events);
        }
    }

    fn report_failure(&self, failure: RequestFailure) {
        if let Some(callback) = &self.config.on_failure {
            callback(&failure);
        }
    }

    /// Synchronous drain with blocking sends. Walks the queue like the
    /// async loop but stops on the first non-delivery; callbacks are not
    /// fired, the host is tearing down.
    fn drain_blocking(&self) {
        let Ok(collector_url) = self.require_collector_url() else {
            warn!("Teardown flush skipped, no collector endpoint");
            return;
        };

        loop {
            let attempt = {
                let mut queue = self.queue.blocking_lock();
                discard_malformed_head(&mut queue, &self.store);
                if queue.is_empty() {
                    return;
                }
                match &*queue {
                    PendingQueue::Post(records) => {
                        Attempt::Post(select_batch(records, self.config.max_post_bytes))
                    }
                    PendingQueue::Get(records) => {
                        Attempt::Get(records.front().cloned().unwrap_or_default())
                    }
                }
            };

            let (count, outcome) = match attempt {
                Attempt::Post(batch) => (
                    batch.len(),
                    self.sender.send_post_batch_blocking(&collector_url, &batch),
                ),
                Attempt::Get(record) => (
                    1,
                    self.sender.send_get_record_blocking(&collector_url, &record),
                ),
            };

            match outcome {
                SendOutcome::Delivered => {
                    let mut queue = self.queue.blocking_lock();
                    queue.remove_front(count);
                    self.store.persist(&queue);
                }
                SendOutcome::Failed { status, .. } => {
                    debug!(status, "Teardown flush halted");
                    return;
                }
                SendOutcome::Halted => return,
            }
        }
    }
}

impl FlushableQueue for OutboxManager {
    /// Forced synchronous flush for the lifecycle coordinator's teardown
    /// hook. Must not be called from async context; the blocking sends
    /// keep the request on the wire before the host finishes tearing down.
    fn flush_blocking(&self) {
        if self.executing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.drain_blocking();
        self.executing.store(false, Ordering::SeqCst);
    }
}

/// Discard malformed entries at the head of the queue before sending.
///
/// Protects the drain loop against corrupted persisted state that made it
/// past the lenient load.
fn discard_malformed_head(queue: &mut PendingQueue, store: &QueueStore) {
    let mut discarded = false;
    loop {
        let malformed = match &*queue {
            PendingQueue::Post(records) => records.front().map(|r| r.payload.is_empty()),
            PendingQueue::Get(records) => records.front().map(|r| !r.starts_with('?')),
        };
        if malformed != Some(true) {
            break;
        }
        warn!("Discarding malformed queued record");
        queue.remove_front(1);
        discarded = true;
    }
    if discarded {
        store.persist(queue);
    }
}
