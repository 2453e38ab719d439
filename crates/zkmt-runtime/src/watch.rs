//! Watch contexts and delivery
//!
//! A [`WatchContext`] binds a user [`Watcher`] to the session's state cell.
//! It is registered with the engine alongside a read request (or as the
//! session's default watcher) and handed back by the engine when the
//! watch fires. Delivery happens on the I/O thread.
//!
//! Session events carry the new session state. It is validated and
//! written to the session before the watcher runs, so the watcher (and
//! any other thread) observes the state the event announces.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};
use zkmt_core::{AtomicState, Event, State};

/// User watch callback. Runs on the I/O thread.
pub trait Watcher: Send + Sync {
    fn process(&self, event: Event, state: State, path: &str);
}

impl<F> Watcher for F
where
    F: Fn(Event, State, &str) + Send + Sync,
{
    fn process(&self, event: Event, state: State, path: &str) {
        self(event, state, path)
    }
}

/// What happens to a context after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Delivered at most once; the engine drops it after firing.
    OneShot,
    /// Stays registered for the life of the session (default watcher).
    Persistent,
}

/// Session event announced a state value outside the known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownState(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// One-shot context had already fired
    Duplicate,
    /// Event code not recognized; watcher not invoked
    UnknownEvent(i32),
    /// Session event tried to leave an unrecoverable state; watcher not
    /// invoked. Carries the state still in effect.
    Refused(State),
}

pub struct WatchContext {
    watcher: Option<Arc<dyn Watcher>>,
    session_state: Arc<AtomicState>,
    policy: DeletionPolicy,
    fired: AtomicBool,
}

impl WatchContext {
    pub fn new(
        watcher: Option<Arc<dyn Watcher>>,
        session_state: Arc<AtomicState>,
        policy: DeletionPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            watcher,
            session_state,
            policy,
            fired: AtomicBool::new(false),
        })
    }

    pub fn one_shot(watcher: Arc<dyn Watcher>, session_state: Arc<AtomicState>) -> Arc<Self> {
        Self::new(Some(watcher), session_state, DeletionPolicy::OneShot)
    }

    pub fn policy(&self) -> DeletionPolicy {
        self.policy
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Validate a raw session state and store it. An unknown value leaves
    /// the session state untouched.
    ///
    /// Returns the state in effect afterwards. That differs from the
    /// announced one when the session is already expired or failed
    /// authentication, which are terminal.
    pub fn apply_session_state(&self, raw_state: i32) -> Result<State, UnknownState> {
        let state = State::from_raw(raw_state).ok_or(UnknownState(raw_state))?;
        match self.session_state.transition(state) {
            Ok(previous) => {
                if previous != state {
                    debug!(from = %previous, to = %state, "session state changed");
                }
                Ok(state)
            }
            Err(terminal) => {
                warn!(state = %terminal, announced = %state, "ignoring state change after terminal state");
                Ok(terminal)
            }
        }
    }

    /// Deliver a watch event.
    ///
    /// `Err` means the event announced an unknown session state. Nothing
    /// was delivered and the caller must treat the session as corrupt.
    pub fn deliver(&self, raw_event: i32, raw_state: i32, path: &str) -> Result<Delivery, UnknownState> {
        let Some(event) = Event::from_raw(raw_event) else {
            warn!(event = raw_event, path, "dropping watch event with unknown type");
            return Ok(Delivery::UnknownEvent(raw_event));
        };

        let state = if event == Event::Session {
            let in_effect = self.apply_session_state(raw_state)?;
            if in_effect.as_raw() != raw_state {
                return Ok(Delivery::Refused(in_effect));
            }
            in_effect
        } else {
            State::from_raw(raw_state).unwrap_or_else(|| self.session_state.load())
        };

        if self.policy == DeletionPolicy::OneShot && self.fired.swap(true, Ordering::AcqRel) {
            warn!(?event, path, "one-shot watch fired twice, ignoring");
            return Ok(Delivery::Duplicate);
        }

        if let Some(watcher) = &self.watcher {
            let outcome = catch_unwind(AssertUnwindSafe(|| watcher.process(event, state, path)));
            if outcome.is_err() {
                error!(?event, path, "watcher panicked");
            }
        }
        Ok(Delivery::Delivered)
    }
}

impl std::fmt::Debug for WatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchContext")
            .field("policy", &self.policy)
            .field("has_watcher", &self.watcher.is_some())
            .field("fired", &self.has_fired())
            .finish()
    }
}

/// Terminate the process after a session event with an unknown state.
///
/// Continuing would hand user code a state outside the enum.
pub fn abort_on_unknown_state(unknown: UnknownState) -> ! {
    error!(state = unknown.0, "session event carried an unknown state, aborting");
    std::process::abort()
}
