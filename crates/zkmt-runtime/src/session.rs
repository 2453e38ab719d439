//! Session handle
//!
//! [`Session`] is a cheap, cloneable reference to one client session. It
//! owns the engine, the state cell, the completion queue, the wakeup
//! channel and the adaptor threads.
//!
//! Lifetime is tracked by a reference counter separate from the `Arc`: the
//! owner holds one reference from `init` until `close`, each adaptor thread
//! holds one while running, and every API call holds one for its duration.
//! When the count reaches zero the engine is released, exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use zkmt_core::{
    init_xid, next_xid, AtomicState, RefCounter, Release, ReturnCode, State, Xid, ZkError, ZkResult,
};

use crate::adaptor::AdaptorThreads;
use crate::completion::{CompletionContext, Route};
use crate::config::SessionConfig;
use crate::engine::{Request, RequestOp, SessionEngine};
use crate::queue::CompletionQueue;
use crate::wakeup::{new_wakeup, Wakeup};
use crate::watch::{DeletionPolicy, WatchContext, Watcher};

pub(crate) struct SessionInner {
    pub(crate) config: SessionConfig,
    pub(crate) engine: Box<dyn SessionEngine>,
    pub(crate) queue: CompletionQueue,
    pub(crate) wakeup: Box<dyn Wakeup>,
    state: Arc<AtomicState>,
    refs: RefCounter,
    close_requested: AtomicBool,
    /// Set by the I/O thread, under `critical`, as it abandons pending work
    io_stopped: AtomicBool,
    released: AtomicBool,
    /// Serializes submission against close and I/O thread exit
    critical: Mutex<()>,
    threads: Mutex<Option<AdaptorThreads>>,
}

/// Holds a session reference for the duration of an API call or thread.
pub(crate) struct ApiGuard<'a> {
    inner: &'a SessionInner,
}

impl Drop for ApiGuard<'_> {
    fn drop(&mut self) {
        self.inner.release_ref();
    }
}

impl SessionInner {
    pub(crate) fn api_enter(&self) -> ApiGuard<'_> {
        self.refs.increment();
        ApiGuard { inner: self }
    }

    fn release_ref(&self) {
        match self.refs.decrement() {
            Release::Live(_) => {}
            Release::Zero => self.finalize(),
            Release::AlreadyZero => warn!("session reference released after teardown"),
        }
    }

    fn finalize(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(session_id = self.engine.session_id(), "releasing session");
        self.engine.release();
    }

    pub(crate) fn enter_critical(&self) -> MutexGuard<'_, ()> {
        self.critical.lock()
    }

    /// Caller must hold the critical section.
    pub(crate) fn mark_io_stopped(&self) {
        self.io_stopped.store(true, Ordering::Release);
    }

    fn is_io_stopped(&self) -> bool {
        self.io_stopped.load(Ordering::Acquire)
    }

    /// Result code for requests abandoned when the session stops.
    pub(crate) fn drain_code(&self) -> ReturnCode {
        match self.state() {
            State::AuthFailed => ReturnCode::AuthFailed,
            State::Expired => ReturnCode::SessionExpired,
            _ if self.engine.is_unrecoverable() => ReturnCode::SessionExpired,
            _ => ReturnCode::Closing,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state.load()
    }

    pub(crate) fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    pub(crate) fn request_close_flag(&self) -> bool {
        self.close_requested.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn wake_io(&self) {
        if let Err(e) = self.wakeup.wake() {
            error!(error = %e, "failed to wake IO thread");
        }
    }

    /// Get queued requests moving. Normally the I/O thread sends them; once
    /// close is requested it may have stopped polling, so flush directly.
    fn send_queue(&self) -> ZkResult<()> {
        if self.is_close_requested() {
            self.engine.flush(self.config.close_timeout)
        } else {
            self.wake_io();
            Ok(())
        }
    }
}

/// Handle to one client session.
///
/// Clones share the session. The adaptor threads run until [`close`]
/// is called; dropping every handle without closing leaves them running.
///
/// [`close`]: Session::close
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session over `engine` and start the adaptor threads.
    ///
    /// Returns once both threads are running. `watcher` becomes the
    /// session's default watcher and receives every session event.
    pub fn init(
        engine: Box<dyn SessionEngine>,
        config: SessionConfig,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ZkResult<Session> {
        config.validate()?;
        init_xid();

        let state = Arc::new(AtomicState::new(State::Connecting));
        engine.set_default_watch(WatchContext::new(
            watcher,
            state.clone(),
            DeletionPolicy::Persistent,
        ));

        let inner = Arc::new(SessionInner {
            config,
            engine,
            queue: CompletionQueue::new(),
            wakeup: new_wakeup()?,
            state,
            refs: RefCounter::new(1),
            close_requested: AtomicBool::new(false),
            io_stopped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            critical: Mutex::new(()),
            threads: Mutex::new(None),
        });

        let threads = match AdaptorThreads::start(&inner) {
            Ok(threads) => threads,
            Err(e) => {
                inner.release_ref();
                return Err(e);
            }
        };
        *inner.threads.lock() = Some(threads);
        // first pass connects without waiting out a poll interval
        inner.wake_io();
        info!(hosts = %inner.config.hosts, "session initialized");
        Ok(Session { inner })
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn session_id(&self) -> i64 {
        self.inner.engine.session_id()
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.inner.state().is_unrecoverable() || self.inner.engine.is_unrecoverable()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_close_requested()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Whether the caller is running on this session's I/O or completion
    /// thread. Blocking on a result from there would never return.
    pub fn on_adaptor_thread(&self) -> bool {
        let me = std::thread::current().id();
        self.inner
            .threads
            .lock()
            .as_ref()
            .map_or(false, |threads| threads.contains(me))
    }

    /// Current reference count (owner, threads, calls in progress)
    pub fn ref_count(&self) -> i32 {
        self.inner.refs.get()
    }

    /// Completions decoded but not yet dispatched
    pub fn pending_completions(&self) -> usize {
        self.inner.queue.len()
    }

    /// Submit a request.
    ///
    /// `route` is the typed callback to run on completion; `None` means
    /// fire and forget. `watcher` registers a one-shot watch and is only
    /// accepted for exists, get and get_children.
    ///
    /// An `Err` means the request was not submitted and no callback will
    /// run for it.
    pub fn submit(
        &self,
        op: RequestOp,
        route: Option<Route>,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ZkResult<Xid> {
        let inner = &*self.inner;
        let _api = inner.api_enter();

        if watcher.is_some() && !op.accepts_watch() {
            return Err(ZkError::BadArguments("operation does not take a watch"));
        }
        let state = inner.state();
        if state.is_unrecoverable() || inner.engine.is_unrecoverable() {
            return Err(ZkError::InvalidState(state));
        }

        let xid = next_xid();
        let completion = route.map(|route| CompletionContext::new(xid, op.path(), route));
        let watch = watcher.map(|w| WatchContext::one_shot(w, inner.state.clone()));
        let name = op.name();
        {
            let _cs = inner.enter_critical();
            if inner.is_close_requested() {
                return Err(ZkError::Closing);
            }
            if inner.is_io_stopped() {
                return Err(ZkError::InvalidState(inner.state()));
            }
            inner.engine.submit(Request {
                xid,
                op,
                completion,
                watch,
            })?;
        }
        debug!(%xid, op = name, "request submitted");
        inner.send_queue()?;
        Ok(xid)
    }

    /// Close the session.
    ///
    /// Starts the engine's close exchange, stops both adaptor threads and
    /// releases the owner reference. Every request still in flight has its
    /// callback invoked with `ReturnCode::Closing` (or the code for an
    /// unrecoverable session). Safe to call from a callback or watcher; the
    /// calling thread is then detached rather than joined.
    pub fn close(&self) -> ZkResult<()> {
        let inner = &*self.inner;
        {
            let _api = inner.api_enter();
            {
                let _cs = inner.enter_critical();
                if inner.request_close_flag() {
                    return Err(ZkError::Closing);
                }
                inner.engine.close();
            }
            info!(session_id = inner.engine.session_id(), "closing session");
            if let Err(e) = inner.send_queue() {
                warn!(error = %e, "flush on close failed");
            }
            inner.wake_io();

            let threads = inner.threads.lock().take();
            if let Some(threads) = threads {
                threads.finish(inner);
            }
        }
        inner.release_ref();
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
