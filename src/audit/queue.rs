//! Bounded audit queue with a single delivery thread.
//!
//! Producers are evaluations on the hot path, so [`AuditQueue::enqueue`]
//! never blocks longer than the configured enqueue timeout. When the queue is
//! full the oldest pending record is dropped and counted. Sink failures are
//! logged and counted on the worker and never reach the producer.

use super::{AuditRecord, AuditSink};
use crate::config::AuditConfig;
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueState {
    records: VecDeque<AuditRecord>,
    in_flight: usize,
    shutdown: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.records.is_empty() && self.in_flight == 0
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when a record is queued or shutdown begins.
    available: Condvar,
    /// Signalled when the worker takes a record off the queue.
    space: Condvar,
    /// Signalled when the queue becomes idle.
    drained: Condvar,
    capacity: usize,
    enqueue_timeout: Duration,
    sink: Arc<dyn AuditSink>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    sink_failures: AtomicU64,
}

/// Counters of an [`AuditQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditQueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub sink_failures: u64,
    pub pending: usize,
}

/// Drop-oldest queue in front of an [`AuditSink`].
///
/// # Example
/// ```rust
/// use bastion_policy::audit::{AuditQueue, MemoryAuditSink};
/// use bastion_policy::config::AuditConfig;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let sink = Arc::new(MemoryAuditSink::new());
/// let queue = AuditQueue::start(sink.clone(), &AuditConfig::default()).unwrap();
/// assert!(queue.flush(Duration::from_secs(1)));
/// queue.shutdown();
/// assert!(sink.is_empty());
/// ```
pub struct AuditQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditQueue {
    /// Spawn the delivery thread.
    pub fn start(sink: Arc<dyn AuditSink>, config: &AuditConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            space: Condvar::new(),
            drained: Condvar::new(),
            capacity: config.queue_capacity.max(1),
            enqueue_timeout: config.enqueue_timeout(),
            sink,
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || run_worker(&worker_shared))?;

        debug!(capacity = shared.capacity, "Started audit queue");
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a record for delivery.
    ///
    /// Returns `false` when a record had to be dropped to make room, or when
    /// the queue is shut down and `record` itself was discarded.
    pub fn enqueue(&self, record: AuditRecord) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        if state.shutdown {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(rule_id = record.rule_id, "Audit queue is shut down, dropping record");
            return false;
        }

        if state.records.len() >= shared.capacity && !shared.enqueue_timeout.is_zero() {
            let deadline = Instant::now() + shared.enqueue_timeout;
            while state.records.len() >= shared.capacity && !state.shutdown {
                if shared.space.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }

        let mut lossless = true;
        if state.records.len() >= shared.capacity {
            if let Some(oldest) = state.records.pop_front() {
                lossless = false;
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    rule_id = oldest.rule_id,
                    session_id = %oldest.session_id,
                    "Audit queue full, dropped oldest record"
                );
            }
        }

        state.records.push_back(record);
        shared.enqueued.fetch_add(1, Ordering::Relaxed);
        drop(state);
        shared.available.notify_one();

        lossless
    }

    /// Wait until every queued record has been handed to the sink.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            if self.shared.drained.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    /// Deliver what is queued, then stop the worker. Later records are dropped.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.available.notify_all();
        self.shared.space.notify_all();

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Audit worker panicked");
            }
        }
        debug!("Audit queue shut down");
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn stats(&self) -> AuditQueueStats {
        let shared = &self.shared;
        AuditQueueStats {
            enqueued: shared.enqueued.load(Ordering::Relaxed),
            dropped: shared.dropped.load(Ordering::Relaxed),
            delivered: shared.delivered.load(Ordering::Relaxed),
            sink_failures: shared.sink_failures.load(Ordering::Relaxed),
            pending: self.len(),
        }
    }

    /// Zero the counters; pending records are kept.
    pub fn reset_stats(&self) {
        let shared = &self.shared;
        for counter in [
            &shared.enqueued,
            &shared.dropped,
            &shared.delivered,
            &shared.sink_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Drop for AuditQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AuditQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditQueue")
            .field("capacity", &self.shared.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

fn run_worker(shared: &Shared) {
    loop {
        let next = {
            let mut state = shared.state.lock();
            loop {
                if let Some(record) = state.records.pop_front() {
                    state.in_flight += 1;
                    break Some(record);
                }
                if state.shutdown {
                    break None;
                }
                shared.available.wait(&mut state);
            }
        };

        let Some(record) = next else {
            shared.drained.notify_all();
            return;
        };
        shared.space.notify_one();

        match shared.sink.record(&record) {
            Ok(()) => {
                shared.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                shared.sink_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, rule_id = record.rule_id, "Audit sink rejected record");
            }
        }

        let mut state = shared.state.lock();
        state.in_flight -= 1;
        if state.is_idle() {
            shared.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::error::PolicyError;
    use crate::rule::Action;
    use chrono::Utc;

    fn record(rule_id: u64) -> AuditRecord {
        AuditRecord {
            session_id: String::new(),
            user_id: 1,
            username: String::new(),
            asset_id: 1,
            asset_name: String::new(),
            account: "root".to_string(),
            command: format!("cmd-{rule_id}"),
            rule_id,
            rule_name: String::new(),
            action: Action::Deny,
            timestamp: Utc::now(),
        }
    }

    /// Sink that blocks until the test opens the gate.
    struct GatedSink {
        open: Mutex<bool>,
        opened: Condvar,
        inner: MemoryAuditSink,
    }

    impl GatedSink {
        fn new() -> Self {
            Self {
                open: Mutex::new(false),
                opened: Condvar::new(),
                inner: MemoryAuditSink::new(),
            }
        }

        fn open(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }
    }

    impl AuditSink for GatedSink {
        fn record(&self, record: &AuditRecord) -> Result<()> {
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            self.inner.record(record)
        }
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _record: &AuditRecord) -> Result<()> {
            Err(PolicyError::AuditSink("disk full".to_string()))
        }
    }

    fn config(capacity: usize) -> AuditConfig {
        AuditConfig {
            queue_capacity: capacity,
            ..Default::default()
        }
    }

    #[test]
    fn test_delivers_in_order() {
        let sink = Arc::new(MemoryAuditSink::new());
        let queue = AuditQueue::start(sink.clone(), &config(16)).unwrap();

        for id in 1..=5 {
            assert!(queue.enqueue(record(id)));
        }
        assert!(queue.flush(Duration::from_secs(5)));

        let ids: Vec<u64> = sink.records().iter().map(|r| r.rule_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(queue.stats().delivered, 5);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let sink = Arc::new(GatedSink::new());
        let queue = AuditQueue::start(sink.clone(), &config(2)).unwrap();

        // The worker picks up record 1 and blocks inside the sink.
        queue.enqueue(record(1));
        let start = Instant::now();
        while queue.stats().pending > 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(queue.enqueue(record(2)));
        assert!(queue.enqueue(record(3)));
        assert!(!queue.enqueue(record(4)));
        assert_eq!(queue.stats().dropped, 1);

        sink.open();
        assert!(queue.flush(Duration::from_secs(5)));

        let ids: Vec<u64> = sink.inner.records().iter().map(|r| r.rule_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn test_sink_failures_are_counted() {
        let queue = AuditQueue::start(Arc::new(FailingSink), &config(8)).unwrap();
        queue.enqueue(record(1));
        queue.enqueue(record(2));
        assert!(queue.flush(Duration::from_secs(5)));

        let stats = queue.stats();
        assert_eq!(stats.sink_failures, 2);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn test_shutdown_drains_then_rejects() {
        let sink = Arc::new(MemoryAuditSink::new());
        let queue = AuditQueue::start(sink.clone(), &config(64)).unwrap();
        for id in 0..20 {
            queue.enqueue(record(id));
        }

        queue.shutdown();
        assert_eq!(sink.len(), 20);

        assert!(!queue.enqueue(record(99)));
        assert_eq!(sink.len(), 20);
        // Idempotent.
        queue.shutdown();
    }

    #[test]
    fn test_flush_times_out_while_sink_blocks() {
        let sink = Arc::new(GatedSink::new());
        let queue = AuditQueue::start(sink.clone(), &config(4)).unwrap();
        queue.enqueue(record(1));

        assert!(!queue.flush(Duration::from_millis(20)));
        sink.open();
        assert!(queue.flush(Duration::from_secs(5)));
    }
}
