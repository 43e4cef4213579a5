//! Lifecycle coordination for tracker queues.
//!
//! Hosts a registry of live outbound queues plus caller-supplied flush
//! hooks, and runs them all when the hosting context is about to be torn
//! down. The coordinator is passed by reference into each queue at
//! construction instead of living as ambient global state, so queue unit
//! tests stay free of environment coupling.

use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A queue that can be force-flushed synchronously before teardown.
pub trait FlushableQueue: Send + Sync {
    /// Flush pending events with blocking sends.
    ///
    /// Called while the host is tearing down; implementations must not
    /// rely on timers or deferred completions still firing.
    fn flush_blocking(&self);
}

type FlushHook = Box<dyn Fn() + Send + Sync>;

/// Registry of live queues and teardown flush hooks.
#[derive(Default)]
pub struct LifecycleOrchestrator {
    queues: Mutex<Vec<Arc<dyn FlushableQueue>>>,
    hooks: Mutex<Vec<FlushHook>>,
}

impl LifecycleOrchestrator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue for forced flushing at teardown.
    pub fn register_queue(&self, queue: Arc<dyn FlushableQueue>) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.push(queue);
        debug!(count = queues.len(), "Registered queue");
    }

    /// Register a hook to run before the queues are flushed.
    pub fn register_flush_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        hooks.push(Box::new(hook));
    }

    /// Run all flush hooks, then synchronously flush every registered queue.
    ///
    /// Invoked by the host exactly once when the context is ending; safe to
    /// call again (queues flush to empty and stay empty).
    pub fn force_flush_all(&self) {
        let hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        for hook in hooks.iter() {
            hook();
        }
        drop(hooks);

        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        info!(queues = queues.len(), "Forced flush at teardown");
        for queue in queues.iter() {
            queue.flush_blocking();
        }
    }

    /// Number of registered queues.
    pub fn queue_count(&self) -> usize {
        self.queues.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
