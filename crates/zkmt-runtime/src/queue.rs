//! Completion queue
//!
//! FIFO hand-off from the I/O thread (producer) to the completion thread
//! (consumer). The consumer swaps the whole backlog out under the lock and
//! dispatches it after releasing the lock, so a callback may submit new
//! requests without contending with the producer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::completion::CompletionRecord;

struct QueueState {
    records: VecDeque<CompletionRecord>,
    close_requested: bool,
}

/// Records taken in one wakeup of the consumer.
pub struct Batch {
    pub records: VecDeque<CompletionRecord>,
    /// Close was requested when this batch was taken. The producer has
    /// stopped, so after this batch at most a final drain remains.
    pub closing: bool,
}

pub struct CompletionQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    pushed: AtomicU64,
    taken: AtomicU64,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                records: VecDeque::new(),
                close_requested: false,
            }),
            cond: Condvar::new(),
            pushed: AtomicU64::new(0),
            taken: AtomicU64::new(0),
        }
    }

    /// Append a record and wake the consumer.
    pub fn push(&self, record: CompletionRecord) {
        let mut state = self.state.lock();
        state.records.push_back(record);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_one();
    }

    /// Block until records are available or close is requested, then take
    /// everything queued.
    pub fn wait_batch(&self) -> Batch {
        let mut state = self.state.lock();
        while state.records.is_empty() && !state.close_requested {
            self.cond.wait(&mut state);
        }
        self.take_locked(&mut state)
    }

    /// As [`wait_batch`](Self::wait_batch) but gives up after `timeout`,
    /// returning whatever is queued (possibly nothing).
    pub fn wait_batch_timeout(&self, timeout: Duration) -> Batch {
        let mut state = self.state.lock();
        if state.records.is_empty() && !state.close_requested {
            self.cond.wait_for(&mut state, timeout);
        }
        self.take_locked(&mut state)
    }

    /// Take everything queued without blocking.
    pub fn take_all(&self) -> Batch {
        let mut state = self.state.lock();
        self.take_locked(&mut state)
    }

    fn take_locked(&self, state: &mut QueueState) -> Batch {
        let records = std::mem::take(&mut state.records);
        self.taken.fetch_add(records.len() as u64, Ordering::Relaxed);
        Batch {
            records,
            closing: state.close_requested,
        }
    }

    /// Tell the consumer to finish. Idempotent.
    pub fn request_close(&self) {
        let mut state = self.state.lock();
        state.close_requested = true;
        self.cond.notify_all();
    }

    pub fn is_close_requested(&self) -> bool {
        self.state.lock().close_requested
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total records ever pushed
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total records ever taken by the consumer
    pub fn taken(&self) -> u64 {
        self.taken.load(Ordering::Relaxed)
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
