//! The Platform Dispatcher (§4.2): resolves adapters by `(backend_kind,
//! backend_instance_id)` and bounds per-adapter concurrency.
//!
//! Built once at process init and injected as a value into every component
//! that dispatches a capability call, per §9's guidance on treating
//! process-wide state as configuration with an explicit lifecycle rather than
//! a global mutable singleton.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::CoreError;
use crate::platform::adapter::PlatformAdapter;

/// A blocking counting semaphore bounding how many concurrent calls may be
/// in flight against one adapter instance (§5: "Adapter concurrency limit is
/// a per-adapter semaphore; exceeding it blocks the caller, with deadline").
struct Semaphore {
    state: Mutex<usize>,
    condvar: Condvar,
    capacity: usize,
}

impl Semaphore {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(capacity),
            condvar: Condvar::new(),
            capacity,
        }
    }

    fn acquire(&self, deadline: Duration) -> Result<SemaphorePermit<'_>, CoreError> {
        let deadline_at = Instant::now() + deadline;
        let mut available = self.state.lock().expect("semaphore lock poisoned");
        while *available == 0 {
            let now = Instant::now();
            if now >= deadline_at {
                return Err(CoreError::Timeout(
                    "adapter concurrency limit exceeded".to_string(),
                ));
            }
            let (guard, timeout_result) = self
                .condvar
                .wait_timeout(available, deadline_at - now)
                .expect("semaphore condvar poisoned");
            available = guard;
            if timeout_result.timed_out() && *available == 0 {
                return Err(CoreError::Timeout(
                    "adapter concurrency limit exceeded".to_string(),
                ));
            }
        }
        *available -= 1;
        Ok(SemaphorePermit { semaphore: self })
    }
}

struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        let mut available = self.semaphore.state.lock().expect("semaphore lock poisoned");
        *available += 1;
        self.semaphore.condvar.notify_one();
    }
}

struct DispatchEntry {
    adapter: Arc<dyn PlatformAdapter>,
    semaphore: Semaphore,
}

pub struct PlatformDispatcher {
    adapters: HashMap<(String, String), DispatchEntry>,
}

pub struct PlatformDispatcherBuilder {
    adapters: HashMap<(String, String), DispatchEntry>,
}

impl PlatformDispatcherBuilder {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    pub fn register(mut self, adapter: Arc<dyn PlatformAdapter>, concurrency_limit: usize) -> Self {
        let key = (adapter.backend_kind().to_string(), adapter.backend_instance_id().to_string());
        self.adapters.insert(
            key,
            DispatchEntry {
                adapter,
                semaphore: Semaphore::new(concurrency_limit),
            },
        );
        self
    }

    pub fn build(self) -> PlatformDispatcher {
        PlatformDispatcher { adapters: self.adapters }
    }
}

impl Default for PlatformDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformDispatcher {
    /// Resolves the adapter for `(kind, instance)`, blocks until a
    /// concurrency slot is free (bounded by `deadline`), and hands both back
    /// so the caller can issue exactly one capability call under the permit.
    pub fn dispatch(
        &self,
        kind: &str,
        instance: &str,
        deadline: Duration,
    ) -> Result<DispatchedCall<'_>, CoreError> {
        let entry = self
            .adapters
            .get(&(kind.to_string(), instance.to_string()))
            .ok_or_else(|| CoreError::Internal(format!("no adapter registered for {kind}/{instance}")))?;
        let _permit = entry.semaphore.acquire(deadline)?;
        Ok(DispatchedCall {
            adapter: entry.adapter.clone(),
            _permit,
        })
    }
}

pub struct DispatchedCall<'a> {
    adapter: Arc<dyn PlatformAdapter>,
    _permit: SemaphorePermit<'a>,
}

impl DispatchedCall<'_> {
    pub fn adapter(&self) -> &dyn PlatformAdapter {
        self.adapter.as_ref()
    }
}
