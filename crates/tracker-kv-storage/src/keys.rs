//! Storage key derivation.

/// Storage keys used by the tracker.
pub struct StorageKeys;

impl StorageKeys {
    /// Prefix for persisted outbound queues.
    pub const OUT_QUEUE_PREFIX: &'static str = "outqueue";

    /// Key for a tracker instance's persisted outbound queue.
    ///
    /// Namespaced by the instance identifier and the resolved transport
    /// mode tag so independent tracker instances never contend on the
    /// same storage slot.
    pub fn out_queue(namespace: &str, mode_tag: &str) -> String {
        format!("{}_{}_{}", Self::OUT_QUEUE_PREFIX, namespace, mode_tag)
    }
}
