//! N-party startup rendezvous
//!
//! Each participant arrives once and then blocks until every participant
//! has arrived. Observers that are not participants (the thread that spawned
//! them) can wait for the same moment without arriving.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct StartupBarrier {
    /// Participants that have not arrived yet
    remaining: Mutex<usize>,
    cond: Condvar,
}

impl StartupBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            remaining: Mutex::new(parties),
            cond: Condvar::new(),
        }
    }

    /// Arrive, then block until all participants have arrived.
    ///
    /// No fixed arrival order is required.
    pub fn arrive_and_wait(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
        }
        self.cond.notify_all();
        while *remaining > 0 {
            self.cond.wait(&mut remaining);
        }
    }

    /// Block until all participants have arrived, without arriving.
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.cond.wait(&mut remaining);
        }
    }

    /// Like `wait`, bounded. Returns `true` if the barrier opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.cond.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }

    pub fn is_open(&self) -> bool {
        self.remaining() == 0
    }
}
