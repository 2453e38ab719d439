//! Scripted engine for adaptor tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use zkmt_core::{Acl, Event, ReturnCode, Stat, State, ZkError, ZkResult};

use crate::completion::Reply;
use crate::engine::{EngineSink, Interest, IoEvents, ProcessStatus, Request, RequestOp, SessionEngine};
use crate::watch::WatchContext;

#[derive(Default)]
pub(crate) struct Control {
    inbox: SegQueue<Request>,
    inflight: Mutex<VecDeque<Request>>,
    watches: Mutex<Vec<(String, Arc<WatchContext>)>>,
    default_watch: Mutex<Option<Arc<WatchContext>>>,
    events: SegQueue<(i32, i32, String)>,
    connected: AtomicBool,
    pub hold: AtomicBool,
    pub unrecoverable: AtomicBool,
    /// Engine ends the session by itself on its next pass
    pub shutdown: AtomicBool,
    closing: AtomicBool,
    pub released: AtomicUsize,
    pub flushed: AtomicUsize,
}

impl Control {
    /// Queue a session event for the default watcher.
    pub fn session_event(&self, state: i32) {
        self.events.push((Event::Session.as_raw(), state, String::new()));
    }

    pub fn inflight(&self) -> usize {
        self.inflight.lock().len()
    }
}

pub(crate) struct ScriptedEngine {
    ctl: Arc<Control>,
}

impl ScriptedEngine {
    pub fn new() -> (Box<dyn SessionEngine>, Arc<Control>) {
        let ctl = Arc::new(Control::default());
        (Box::new(ScriptedEngine { ctl: ctl.clone() }), ctl)
    }
}

fn reply(request: Request, sink: &dyn EngineSink) {
    let Some(context) = request.completion else {
        return;
    };
    let stat = Stat {
        version: 1,
        ..Stat::default()
    };
    let children = vec!["c1".to_string(), "c2".to_string()];
    let acl = Acl::open_unsafe();
    let reply = match &request.op {
        RequestOp::Create { path, .. } => Reply::Value(path),
        RequestOp::Exists { .. } | RequestOp::SetData { .. } => Reply::Stat(&stat),
        RequestOp::GetData { .. } => Reply::Data {
            data: b"data",
            stat: &stat,
        },
        RequestOp::GetChildren { .. } => Reply::Children {
            children: &children,
            stat: &stat,
        },
        RequestOp::GetAcl { .. } => Reply::Acl { acl: &acl, stat: &stat },
        RequestOp::Multi { .. } => Reply::Multi(&[]),
        _ => Reply::None,
    };
    sink.complete(context, ReturnCode::Ok, reply);
}

impl SessionEngine for ScriptedEngine {
    fn set_default_watch(&self, watch: Arc<WatchContext>) {
        *self.ctl.default_watch.lock() = Some(watch);
    }

    fn session_id(&self) -> i64 {
        0x5eed
    }

    fn interest(&self) -> Interest {
        Interest::idle(Duration::from_millis(50))
    }

    fn process(&self, _ready: IoEvents, sink: &dyn EngineSink) -> ProcessStatus {
        let ctl = &self.ctl;
        let default_watch = ctl.default_watch.lock().clone();
        if !ctl.connected.swap(true, Ordering::AcqRel) {
            if let Some(w) = &default_watch {
                sink.watch_event(w, Event::Session.as_raw(), State::Connected.as_raw(), "");
            }
        }
        while let Some((event, state, path)) = ctl.events.pop() {
            if let Some(w) = &default_watch {
                sink.watch_event(w, event, state, &path);
            }
        }

        let mut inflight = ctl.inflight.lock();
        while let Some(mut request) = ctl.inbox.pop() {
            if let Some(w) = request.watch.take() {
                ctl.watches.lock().push((request.op.path().to_string(), w));
            }
            inflight.push_back(request);
        }
        if !ctl.hold.load(Ordering::Acquire) {
            while let Some(request) = inflight.pop_front() {
                reply(request, sink);
            }
        }
        drop(inflight);

        if ctl.shutdown.load(Ordering::Acquire) {
            return ProcessStatus::Closing;
        }
        if ctl.closing.load(Ordering::Acquire) && ctl.inflight() == 0 {
            return ProcessStatus::Closing;
        }
        ProcessStatus::Ok
    }

    fn is_unrecoverable(&self) -> bool {
        self.ctl.unrecoverable.load(Ordering::Acquire)
    }

    fn submit(&self, request: Request) -> ZkResult<()> {
        if self.ctl.closing.load(Ordering::Acquire) {
            return Err(ZkError::Closing);
        }
        self.ctl.inbox.push(request);
        Ok(())
    }

    fn close(&self) {
        self.ctl.closing.store(true, Ordering::Release);
    }

    fn flush(&self, _timeout: Duration) -> ZkResult<()> {
        self.ctl.flushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn abandon_pending(&self, rc: ReturnCode, sink: &dyn EngineSink) {
        let mut inflight = self.ctl.inflight.lock();
        while let Some(request) = self.ctl.inbox.pop() {
            inflight.push_back(request);
        }
        for request in inflight.drain(..) {
            if let Some(context) = request.completion {
                sink.complete(context, rc, Reply::None);
            }
        }
        self.ctl.watches.lock().clear();
    }

    fn release(&self) {
        self.ctl.released.fetch_add(1, Ordering::AcqRel);
    }
}
