//! Blocking adapter over the asynchronous API
//!
//! A [`SyncCompletion`] is passed as the callback of an ordinary request.
//! The completion thread fills it in and signals; the calling thread waits
//! on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use zkmt_core::{Acl, ReturnCode, Stat};
use zkmt_runtime::{AclCallback, ChildrenCallback, GetCallback, StatCallback, StringCallback, VoidCallback};

/// One-shot rendezvous between the completion thread and a waiting caller.
pub struct SyncCompletion<T> {
    slot: Mutex<Option<(ReturnCode, T)>>,
    cond: Condvar,
}

impl<T> SyncCompletion<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    /// Record the result and wake waiters. Later calls are ignored.
    pub fn complete(&self, rc: ReturnCode, value: T) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some((rc, value));
            self.cond.notify_all();
        }
    }

    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Block until completed and take the result.
    pub fn wait(&self) -> (ReturnCode, T) {
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.cond.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`. `None` if the result has not arrived.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<(ReturnCode, T)> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return Some(result);
            }
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                return slot.take();
            }
        }
    }
}

impl StringCallback for SyncCompletion<String> {
    fn process_result(&self, rc: ReturnCode, _path: &str, value: &str) {
        self.complete(rc, value.to_string());
    }
}

impl VoidCallback for SyncCompletion<()> {
    fn process_result(&self, rc: ReturnCode, _path: &str) {
        self.complete(rc, ());
    }
}

impl StatCallback for SyncCompletion<Option<Stat>> {
    fn process_result(&self, rc: ReturnCode, _path: &str, stat: Option<&Stat>) {
        self.complete(rc, stat.copied());
    }
}

impl GetCallback for SyncCompletion<Option<(Vec<u8>, Stat)>> {
    fn process_result(&self, rc: ReturnCode, _path: &str, data: &[u8], stat: Option<&Stat>) {
        self.complete(rc, stat.map(|s| (data.to_vec(), *s)));
    }
}

impl ChildrenCallback for SyncCompletion<Option<(Vec<String>, Stat)>> {
    fn process_result(&self, rc: ReturnCode, _path: &str, children: &[String], stat: Option<&Stat>) {
        self.complete(rc, stat.map(|s| (children.to_vec(), *s)));
    }
}

impl AclCallback for SyncCompletion<Option<(Vec<Acl>, Stat)>> {
    fn process_result(&self, rc: ReturnCode, _path: &str, acl: &[Acl], stat: Option<&Stat>) {
        self.complete(rc, stat.map(|s| (acl.to_vec(), *s)));
    }
}
