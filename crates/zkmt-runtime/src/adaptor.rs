//! I/O and completion threads
//!
//! The I/O thread drives the session engine: it asks for interest, waits
//! for readiness, drains the wakeup channel and hands readiness to the
//! engine. Engine completions are decoded into the completion queue and
//! watch events are delivered in place.
//!
//! The completion thread drains the queue in FIFO order and runs the user
//! callbacks outside the queue lock.
//!
//! Both threads rendezvous with the starting thread on a 2-party barrier
//! before `start` returns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, error, trace, warn};
use zkmt_core::{ReturnCode, StartupBarrier, ZkResult};

use crate::completion::{CompletionContext, CompletionRecord, Reply};
use crate::engine::{EngineSink, ProcessStatus};
use crate::poll::wait_ready;
use crate::queue::Batch;
use crate::session::SessionInner;
use crate::watch::{abort_on_unknown_state, WatchContext};

/// Number of adaptor threads that must check in before init returns
const THREADS_TO_WAIT: usize = 2;

/// Engine output sink used on the I/O thread.
pub(crate) struct QueueSink<'a> {
    inner: &'a SessionInner,
}

impl<'a> QueueSink<'a> {
    pub(crate) fn new(inner: &'a SessionInner) -> Self {
        Self { inner }
    }
}

impl EngineSink for QueueSink<'_> {
    fn complete(&self, context: CompletionContext, rc: ReturnCode, reply: Reply<'_>) {
        trace!(xid = %context.xid(), %rc, "queueing completion");
        self.inner
            .queue
            .push(CompletionRecord::decode(context, rc, &reply));
    }

    fn watch_event(&self, watch: &WatchContext, event: i32, state: i32, path: &str) {
        if let Err(unknown) = watch.deliver(event, state, path) {
            abort_on_unknown_state(unknown);
        }
    }
}

pub(crate) struct AdaptorThreads {
    io: Option<JoinHandle<()>>,
    completion: Option<JoinHandle<()>>,
}

impl AdaptorThreads {
    /// Spawn both threads and wait until each has checked in.
    pub(crate) fn start(inner: &Arc<SessionInner>) -> ZkResult<Self> {
        let barrier = Arc::new(StartupBarrier::new(THREADS_TO_WAIT));

        let io = {
            let inner = inner.clone();
            let barrier = barrier.clone();
            thread::Builder::new()
                .name(inner.config.io_thread_name())
                .spawn(move || io_thread(inner, barrier))?
        };

        let completion = {
            let inner = inner.clone();
            let barrier = barrier.clone();
            thread::Builder::new()
                .name(inner.config.completion_thread_name())
                .spawn(move || completion_thread(inner, barrier))
        };
        let completion = match completion {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "failed to spawn completion thread");
                // stand in for the missing party so the I/O thread can leave
                inner.request_close_flag();
                barrier.arrive_and_wait();
                inner.wake_io();
                if io.join().is_err() {
                    error!("IO thread panicked");
                }
                return Err(e.into());
            }
        };

        barrier.wait();
        debug!("adaptor threads started");
        Ok(Self {
            io: Some(io),
            completion: Some(completion),
        })
    }

    pub(crate) fn contains(&self, id: ThreadId) -> bool {
        [&self.io, &self.completion]
            .into_iter()
            .flatten()
            .any(|handle| handle.thread().id() == id)
    }

    /// Stop both threads. Joins unless called from one of them, in which
    /// case that thread (and anything it would have to wait on) is
    /// detached instead.
    pub(crate) fn finish(mut self, inner: &SessionInner) {
        let me = thread::current().id();
        let mut on_io_thread = false;

        if let Some(io) = self.io.take() {
            if io.thread().id() == me {
                debug!("close called from the IO thread, detaching");
                on_io_thread = true;
            } else {
                inner.wake_io();
                if io.join().is_err() {
                    error!("IO thread panicked");
                }
            }
        }
        // I/O thread has stopped producing, or will request close itself
        // on its way out
        if !on_io_thread {
            // requests flushed after the I/O thread left
            inner
                .engine
                .abandon_pending(inner.drain_code(), &QueueSink::new(inner));
            inner.queue.request_close();
        }

        if let Some(completion) = self.completion.take() {
            if completion.thread().id() == me {
                debug!("close called from the completion thread, detaching");
            } else if on_io_thread {
                debug!("detaching completion thread");
            } else if completion.join().is_err() {
                error!("completion thread panicked");
            }
        }
    }
}

fn io_thread(inner: Arc<SessionInner>, barrier: Arc<StartupBarrier>) {
    let _api = inner.api_enter();
    barrier.arrive_and_wait();
    debug!(session_id = inner.engine.session_id(), "started IO thread");

    let sink = QueueSink::new(&inner);
    let mut exit_rc = ReturnCode::Closing;
    let mut more_to_do = false;

    while !inner.is_close_requested() {
        let interest = inner.engine.interest();
        let timeout = if more_to_do {
            Duration::ZERO
        } else {
            interest.timeout.min(inner.config.max_poll_interval)
        };

        let ready = match wait_ready(inner.wakeup.as_raw_fd(), &interest, timeout) {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "readiness wait failed");
                Default::default()
            }
        };
        if ready.wakeup {
            inner.wakeup.drain();
        }

        match inner.engine.process(ready.events, &sink) {
            ProcessStatus::Closing => {
                debug!("engine finished closing");
                break;
            }
            ProcessStatus::MoreToDo => more_to_do = true,
            ProcessStatus::Ok => more_to_do = false,
        }

        if inner.engine.is_unrecoverable() || inner.state().is_unrecoverable() {
            exit_rc = inner.drain_code();
            debug!(state = %inner.state(), "session is unrecoverable, leaving IO loop");
            break;
        }
    }

    {
        // submit checks the flag under the same lock, so nothing is
        // accepted once pending work has been abandoned
        let _cs = inner.enter_critical();
        inner.mark_io_stopped();
        inner.engine.abandon_pending(exit_rc, &sink);
    }
    if inner.is_close_requested() {
        inner.queue.request_close();
    }
    debug!("IO thread terminated");
}

fn dispatch_batch(batch: Batch) {
    for record in batch.records {
        let xid = record.xid();
        if catch_unwind(AssertUnwindSafe(|| record.dispatch())).is_err() {
            error!(%xid, "completion callback panicked");
        }
    }
}

fn completion_thread(inner: Arc<SessionInner>, barrier: Arc<StartupBarrier>) {
    let _api = inner.api_enter();
    barrier.arrive_and_wait();
    debug!("started completion thread");

    loop {
        let batch = inner.queue.wait_batch();
        let closing = batch.closing;
        dispatch_batch(batch);
        if closing {
            let rest = inner.queue.take_all();
            if !rest.records.is_empty() {
                debug!(count = rest.records.len(), "final completion drain");
            }
            dispatch_batch(rest);
            break;
        }
    }
    debug!("completion thread terminated");
}
