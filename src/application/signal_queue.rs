use crate::domain::types::Signal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

/// Bounded intake buffer between signal producers and the execution loop.
///
/// Backpressure policy: when full, the oldest queued signal is dropped and
/// counted. Producers never block; the consumer awaits on a notify.
pub struct SignalQueue {
    inner: Mutex<VecDeque<Signal>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, signal: Signal) {
        {
            let mut queue = self.inner.lock().await;
            if queue.len() >= self.capacity {
                if let Some(evicted) = queue.pop_front() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "SignalQueue: Full ({}), dropped oldest signal {}/{}",
                        self.capacity, evicted.va_id, evicted.symbol
                    );
                }
            }
            queue.push_back(signal);
        }
        self.notify.notify_one();
    }

    /// Await the next signal. Single-consumer.
    pub async fn pop(&self) -> Signal {
        loop {
            if let Some(signal) = self.inner.lock().await.pop_front() {
                return signal;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
