//! Session state and watch event types

use core::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

/// Connection state of a session as reported by the session engine.
///
/// `Expired` and `AuthFailed` are terminal: the session must be recreated,
/// never resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum State {
    /// Trying to (re)establish a connection
    Connecting = 1,

    /// Connected to a server with a live session
    Connected = 3,

    /// The server expired the session
    Expired = -112,

    /// Authentication was rejected
    AuthFailed = -113,
}

impl State {
    /// Map a raw engine value to a recognized state.
    ///
    /// Returns `None` for anything outside the engine contract.
    pub const fn from_raw(raw: i32) -> Option<State> {
        match raw {
            1 => Some(State::Connecting),
            3 => Some(State::Connected),
            -112 => Some(State::Expired),
            -113 => Some(State::AuthFailed),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Terminal from the client's point of view.
    #[inline]
    pub const fn is_unrecoverable(self) -> bool {
        matches!(self, State::Expired | State::AuthFailed)
    }

    #[inline]
    pub const fn is_connected(self) -> bool {
        matches!(self, State::Connected)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Connecting => "CONNECTING",
            State::Connected => "CONNECTED",
            State::Expired => "EXPIRED_SESSION",
            State::AuthFailed => "AUTH_FAILED",
        };
        f.write_str(name)
    }
}

/// Kind of event delivered to a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Event {
    /// Node was created (exists watch on a missing node)
    Created = 1,
    /// Node was deleted
    Deleted = 2,
    /// Node data changed
    Changed = 3,
    /// Child list changed
    Child = 4,
    /// Session state changed; the path is empty
    Session = -1,
    /// Server stopped watching the node
    NotWatching = -2,
}

impl Event {
    pub const fn from_raw(raw: i32) -> Option<Event> {
        match raw {
            1 => Some(Event::Created),
            2 => Some(Event::Deleted),
            3 => Some(Event::Changed),
            4 => Some(Event::Child),
            -1 => Some(Event::Session),
            -2 => Some(Event::NotWatching),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Session state readable from any thread.
///
/// Written by the I/O thread when a session event arrives, read by
/// application threads through `get_state()`.
#[derive(Debug)]
pub struct AtomicState(AtomicI32);

impl AtomicState {
    pub const fn new(state: State) -> Self {
        Self(AtomicI32::new(state as i32))
    }

    #[inline]
    pub fn load(&self) -> State {
        // Only `store` writes, and it only accepts a `State`.
        match State::from_raw(self.0.load(Ordering::SeqCst)) {
            Some(s) => s,
            None => State::Expired,
        }
    }

    #[inline]
    pub fn store(&self, state: State) {
        self.0.store(state as i32, Ordering::SeqCst);
    }

    /// Store and return the previous state.
    #[inline]
    pub fn swap(&self, state: State) -> State {
        let prev = self.0.swap(state as i32, Ordering::SeqCst);
        State::from_raw(prev).unwrap_or(State::Expired)
    }

    /// Move to `state` unless the session is already unrecoverable.
    ///
    /// Expired and auth-failed sessions are never resumed, so once either
    /// is stored any change is refused and `Err` carries the state in
    /// effect. Returns the previous state on success.
    pub fn transition(&self, state: State) -> Result<State, State> {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            let prev = State::from_raw(current).unwrap_or(State::Expired);
            if prev.is_unrecoverable() && prev != state {
                return Err(prev);
            }
            match self.0.compare_exchange_weak(
                current,
                state as i32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(prev),
                Err(actual) => current = actual,
            }
        }
    }
}
