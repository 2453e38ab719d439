//! Per-handle reference counter
//!
//! Counts the holders that keep a session's engine state alive: the
//! application's handle, both worker threads and every in-flight API call.
//! The decrement that brings the count to zero is the single authorization
//! to tear that state down.

use std::sync::atomic::{AtomicI32, Ordering};

/// Outcome of releasing one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other holders remain
    Live(i32),
    /// This release dropped the last reference; the caller owns teardown
    Zero,
    /// The count was already zero; nothing changed
    AlreadyZero,
}

/// Lock-free 32-bit reference counter with add-and-fetch semantics.
#[derive(Debug)]
pub struct RefCounter(AtomicI32);

impl RefCounter {
    pub const fn new(initial: i32) -> Self {
        Self(AtomicI32::new(initial))
    }

    /// Add one reference, returning the new count.
    #[inline]
    pub fn increment(&self) -> i32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop one reference.
    ///
    /// Never takes the count below zero. Exactly one caller observes
    /// `Release::Zero` per zero crossing.
    pub fn decrement(&self) -> Release {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if current <= 0 {
                return Release::AlreadyZero;
            }
            match self.0.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) if current == 1 => return Release::Zero,
                Ok(_) => return Release::Live(current - 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Adjust by the sign of `delta` (+1, -1 or 0) and return the new count.
    pub fn adjust(&self, delta: i32) -> i32 {
        match delta.signum() {
            1 => self.increment(),
            -1 => match self.decrement() {
                Release::Live(n) => n,
                Release::Zero | Release::AlreadyZero => 0,
            },
            _ => self.get(),
        }
    }

    #[inline]
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }
}
