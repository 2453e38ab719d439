//! In-process session engine
//!
//! [`MemoryServer`] holds a node tree shared by any number of sessions.
//! Each [`MemoryEngine`] is one session on it. Requests are applied to the
//! tree when the engine's I/O thread processes them, and watch
//! notifications for a session are posted to that session's mailbox.
//!
//! The mailbox has its own wakeup descriptor which the engine reports as
//! its socket, so a write by one session wakes the I/O thread of every
//! session watching the node, just as server traffic would.
//!
//! Credentials are compared verbatim: `digest` ids are `user:password`
//! strings, not hashed.

mod tree;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zkmt_core::{Event, Id, OpResult, ReturnCode, State, ZkError, ZkResult};
use zkmt_runtime::wakeup::{new_wakeup, Wakeup};
use zkmt_runtime::{
    CompletionContext, EngineSink, Interest, IoEvents, Payload, ProcessStatus, Request, RequestOp,
    SessionEngine, WatchContext,
};

use tree::{Caller, Fire, Tree};

/// How long the I/O thread may sleep with nothing to do
const IDLE_TICK: Duration = Duration::from_millis(500);

enum Notice {
    Node { event: Event, path: String },
    Session(State),
}

struct Mailbox {
    notices: SegQueue<Notice>,
    wakeup: Box<dyn Wakeup>,
}

impl Mailbox {
    fn new() -> ZkResult<Self> {
        Ok(Self {
            notices: SegQueue::new(),
            wakeup: new_wakeup()?,
        })
    }

    fn post(&self, notice: Notice) {
        self.notices.push(notice);
        if let Err(e) = self.wakeup.wake() {
            warn!(error = %e, "failed to wake session");
        }
    }
}

struct ServerInner {
    tree: Mutex<Tree>,
    sessions: Mutex<HashMap<i64, Arc<Mailbox>>>,
    next_session: AtomicI64,
}

/// Shared in-memory node tree.
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                tree: Mutex::new(Tree::new()),
                sessions: Mutex::new(HashMap::new()),
                next_session: AtomicI64::new(0x100),
            }),
        }
    }

    /// Open a new session on this server.
    pub fn connect(&self) -> ZkResult<MemoryEngine> {
        MemoryEngine::new(self.clone())
    }

    /// Number of nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.inner.tree.lock().node_count()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Expire a session as the ensemble would after a missed timeout:
    /// its ephemerals go away and it is told its session has expired.
    pub fn expire(&self, session_id: i64) {
        info!(session_id, "expiring session");
        if let Some(mailbox) = self.end_session(session_id) {
            mailbox.post(Notice::Session(State::Expired));
        }
    }

    fn register(&self, mailbox: Arc<Mailbox>) -> i64 {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        self.inner.sessions.lock().insert(id, mailbox);
        id
    }

    fn end_session(&self, session_id: i64) -> Option<Arc<Mailbox>> {
        let mailbox = self.inner.sessions.lock().remove(&session_id)?;
        let mut fires = Vec::new();
        {
            let mut tree = self.inner.tree.lock();
            tree.forget_session(session_id);
            tree.remove_ephemerals(session_id, &mut fires);
        }
        self.notify(fires);
        Some(mailbox)
    }

    fn is_live(&self, session_id: i64) -> bool {
        self.inner.sessions.lock().contains_key(&session_id)
    }

    fn notify(&self, fires: Vec<Fire>) {
        if fires.is_empty() {
            return;
        }
        let sessions = self.inner.sessions.lock();
        for fire in fires {
            if let Some(mailbox) = sessions.get(&fire.session) {
                mailbox.post(Notice::Node {
                    event: fire.event,
                    path: fire.path,
                });
            }
        }
    }

    /// Apply one request. Returns the result code, the reply, and whether
    /// a watch passed with the request should be kept.
    fn apply(&self, session: i64, auth: &[Id], op: &RequestOp, watch: bool) -> (ReturnCode, Payload, bool) {
        let caller = Caller { session, auth };
        let mut fires = Vec::new();
        let outcome = {
            let mut tree = self.inner.tree.lock();
            match op {
                RequestOp::Create {
                    path,
                    data,
                    acl,
                    mode,
                } => tree
                    .create(&caller, path, data, acl, *mode, &mut fires)
                    .map(|created| (Payload::Value(created), false)),
                RequestOp::Remove { path, version } => tree
                    .remove(&caller, path, *version, &mut fires)
                    .map(|_| (Payload::None, false)),
                RequestOp::Exists { path } => {
                    // an exists watch is left on a missing node too
                    if watch {
                        tree.watch_data(session, path);
                    }
                    match tree.exists(path) {
                        Some(stat) => Ok((Payload::Stat(stat), watch)),
                        None => Err(ReturnCode::NoNode),
                    }
                }
                RequestOp::GetData { path } => {
                    tree.get_data(&caller, path).map(|(data, stat)| {
                        if watch {
                            tree.watch_data(session, path);
                        }
                        (Payload::Data(data, stat), watch)
                    })
                }
                RequestOp::SetData {
                    path,
                    data,
                    version,
                } => tree
                    .set_data(&caller, path, data, *version, &mut fires)
                    .map(|stat| (Payload::Stat(stat), false)),
                RequestOp::GetChildren { path } => {
                    tree.get_children(&caller, path).map(|(children, stat)| {
                        if watch {
                            tree.watch_children(session, path);
                        }
                        (Payload::Children(children, stat), watch)
                    })
                }
                RequestOp::GetAcl { path } => tree
                    .get_acl(path)
                    .map(|(acl, stat)| (Payload::Acl(acl, stat), false)),
                RequestOp::SetAcl { path, version, acl } => tree
                    .set_acl(&caller, path, *version, acl)
                    .map(|_| (Payload::None, false)),
                RequestOp::Sync { path } => match tree.exists(path) {
                    Some(_) => Ok((Payload::None, false)),
                    None => Err(ReturnCode::NoNode),
                },
                RequestOp::Multi { ops } => {
                    let (rc, results) = tree.multi(&caller, ops, &mut fires);
                    if rc.is_ok() {
                        Ok((Payload::Multi(results), false))
                    } else {
                        // callers only see the code; the per-op results
                        // locate the op that failed
                        let failed_at = results
                            .iter()
                            .position(|r| !matches!(r, OpResult::Error { rc: ReturnCode::Ok }));
                        debug!(session, %rc, ?failed_at, "multi rolled back");
                        Err(rc)
                    }
                }
                // handled by the engine
                RequestOp::AddAuth { .. } => Ok((Payload::None, false)),
            }
        };
        self.notify(fires);
        match outcome {
            Ok((payload, keep_watch)) => (ReturnCode::Ok, payload, keep_watch),
            // exists on a missing node keeps its watch to see the create
            Err(ReturnCode::NoNode) if watch && matches!(op, RequestOp::Exists { .. }) => {
                (ReturnCode::NoNode, Payload::None, true)
            }
            Err(rc) => (rc, Payload::None, false),
        }
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side watch tables, keyed by path.
#[derive(Default)]
struct WatchTables {
    data: HashMap<String, Vec<Arc<WatchContext>>>,
    exist: HashMap<String, Vec<Arc<WatchContext>>>,
    child: HashMap<String, Vec<Arc<WatchContext>>>,
}

impl WatchTables {
    fn add(&mut self, op: &RequestOp, rc: ReturnCode, watch: Arc<WatchContext>) {
        let path = op.path().to_string();
        let table = match (op, rc) {
            (RequestOp::Exists { .. }, ReturnCode::NoNode) => &mut self.exist,
            (RequestOp::Exists { .. }, _) | (RequestOp::GetData { .. }, _) => &mut self.data,
            (RequestOp::GetChildren { .. }, _) => &mut self.child,
            _ => return,
        };
        table.entry(path).or_default().push(watch);
    }

    /// Remove and return the watches an event fires.
    fn collect(&mut self, event: Event, path: &str) -> Vec<Arc<WatchContext>> {
        let mut fired = Vec::new();
        let mut take = |table: &mut HashMap<String, Vec<Arc<WatchContext>>>| {
            if let Some(watches) = table.remove(path) {
                fired.extend(watches);
            }
        };
        match event {
            Event::Created | Event::Changed => {
                take(&mut self.data);
                take(&mut self.exist);
            }
            Event::Deleted => {
                take(&mut self.data);
                take(&mut self.exist);
                take(&mut self.child);
            }
            Event::Child => take(&mut self.child),
            Event::Session | Event::NotWatching => {}
        }
        fired
    }

    fn clear(&mut self) {
        self.data.clear();
        self.exist.clear();
        self.child.clear();
    }
}

struct EngineShared {
    server: MemoryServer,
    session_id: i64,
    mailbox: Arc<Mailbox>,
    outbox: SegQueue<Request>,
    /// Sent by a flush after close; answers will never be read. Its lock
    /// also orders `submit` against `abandon_pending`.
    unacked: Mutex<VecDeque<CompletionContext>>,
    abandoned: AtomicBool,
    watches: Mutex<WatchTables>,
    default_watch: Mutex<Option<Arc<WatchContext>>>,
    auth: Mutex<Vec<Id>>,
    connected: AtomicBool,
    closing: AtomicBool,
    ended: AtomicBool,
    unrecoverable: AtomicBool,
}

/// One session on a [`MemoryServer`].
///
/// Cloning gives another handle to the same session, which tests use to
/// inspect it after handing the engine to a client.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<EngineShared>,
}

impl MemoryEngine {
    fn new(server: MemoryServer) -> ZkResult<Self> {
        let mailbox = Arc::new(Mailbox::new()?);
        let session_id = server.register(mailbox.clone());
        debug!(session_id, "memory session opened");
        Ok(Self {
            shared: Arc::new(EngineShared {
                server,
                session_id,
                mailbox,
                outbox: SegQueue::new(),
                unacked: Mutex::new(VecDeque::new()),
                abandoned: AtomicBool::new(false),
                watches: Mutex::new(WatchTables::default()),
                default_watch: Mutex::new(None),
                auth: Mutex::new(Vec::new()),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                unrecoverable: AtomicBool::new(false),
            }),
        })
    }

    /// Session id assigned by the server, whether or not connected yet.
    pub fn assigned_session_id(&self) -> i64 {
        self.shared.session_id
    }

    /// Watches registered by this session and not yet fired.
    pub fn watch_count(&self) -> usize {
        let tables = self.shared.watches.lock();
        [&tables.data, &tables.exist, &tables.child]
            .iter()
            .map(|t| t.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    fn end_on_server(&self) {
        let sh = &self.shared;
        if !sh.ended.swap(true, Ordering::AcqRel) {
            sh.server.end_session(sh.session_id);
            debug!(session_id = sh.session_id, "memory session ended");
        }
    }

    fn session_event(&self, state: State, sink: &dyn EngineSink) {
        let watch = self.shared.default_watch.lock().clone();
        if let Some(watch) = watch {
            sink.watch_event(&watch, Event::Session.as_raw(), state.as_raw(), "");
        }
    }

    fn add_auth(&self, scheme: &str, cert: &str) -> ReturnCode {
        if scheme != "digest" || !cert.contains(':') {
            return ReturnCode::AuthFailed;
        }
        let id = Id::new(scheme, cert);
        let mut auth = self.shared.auth.lock();
        if !auth.contains(&id) {
            auth.push(id);
        }
        ReturnCode::Ok
    }

    fn execute(&self, request: Request, sink: &dyn EngineSink) {
        let sh = &self.shared;
        let Request {
            xid,
            op,
            completion,
            watch,
        } = request;

        let (rc, payload, keep_watch) = match &op {
            RequestOp::AddAuth { scheme, cert } => {
                let rc = self.add_auth(scheme, cert);
                if !rc.is_ok() {
                    warn!(%xid, scheme = %scheme, "authentication failed");
                    sh.mailbox.post(Notice::Session(State::AuthFailed));
                }
                (rc, Payload::None, false)
            }
            _ => {
                let auth = sh.auth.lock().clone();
                sh.server.apply(sh.session_id, &auth, &op, watch.is_some())
            }
        };

        if let (Some(watch), true) = (watch, keep_watch) {
            sh.watches.lock().add(&op, rc, watch);
        }
        if let Some(context) = completion {
            sink.complete(context, rc, payload.as_reply());
        }
    }

    fn deliver_notices(&self, sink: &dyn EngineSink) {
        let sh = &self.shared;
        while let Some(notice) = sh.mailbox.notices.pop() {
            match notice {
                Notice::Session(state) => {
                    if state.is_unrecoverable() {
                        sh.unrecoverable.store(true, Ordering::Release);
                        sh.watches.lock().clear();
                    }
                    self.session_event(state, sink);
                }
                Notice::Node { event, path } => {
                    let fired = sh.watches.lock().collect(event, &path);
                    for watch in fired {
                        sink.watch_event(&watch, event.as_raw(), State::Connected.as_raw(), &path);
                    }
                }
            }
        }
    }
}

impl SessionEngine for MemoryEngine {
    fn set_default_watch(&self, watch: Arc<WatchContext>) {
        *self.shared.default_watch.lock() = Some(watch);
    }

    fn session_id(&self) -> i64 {
        if self.shared.connected.load(Ordering::Acquire) {
            self.shared.session_id
        } else {
            0
        }
    }

    fn interest(&self) -> Interest {
        Interest {
            fd: Some(self.shared.mailbox.wakeup.as_raw_fd()),
            events: IoEvents::READ,
            timeout: IDLE_TICK,
        }
    }

    fn process(&self, ready: IoEvents, sink: &dyn EngineSink) -> ProcessStatus {
        let sh = &self.shared;
        if ready.read {
            sh.mailbox.wakeup.drain();
        }

        if !sh.connected.load(Ordering::Acquire) && !sh.ended.load(Ordering::Acquire) {
            if sh.server.is_live(sh.session_id) {
                sh.connected.store(true, Ordering::Release);
                debug!(session_id = sh.session_id, "memory session connected");
                self.session_event(State::Connected, sink);
            }
        }

        self.deliver_notices(sink);
        if sh.unrecoverable.load(Ordering::Acquire) {
            return ProcessStatus::Ok;
        }

        while let Some(request) = sh.outbox.pop() {
            self.execute(request, sink);
        }

        if sh.closing.load(Ordering::Acquire) {
            self.end_on_server();
            return ProcessStatus::Closing;
        }
        // an auth failure posted while executing
        if !sh.mailbox.notices.is_empty() {
            return ProcessStatus::MoreToDo;
        }
        ProcessStatus::Ok
    }

    fn is_unrecoverable(&self) -> bool {
        self.shared.unrecoverable.load(Ordering::Acquire)
    }

    fn submit(&self, request: Request) -> ZkResult<()> {
        let sh = &self.shared;
        if sh.closing.load(Ordering::Acquire) {
            return Err(ZkError::Closing);
        }
        let _order = sh.unacked.lock();
        if sh.unrecoverable.load(Ordering::Acquire) || sh.abandoned.load(Ordering::Acquire) {
            return Err(ZkError::InvalidState(State::Expired));
        }
        sh.outbox.push(request);
        Ok(())
    }

    fn close(&self) {
        self.shared.closing.store(true, Ordering::Release);
    }

    fn flush(&self, _timeout: Duration) -> ZkResult<()> {
        let sh = &self.shared;
        let mut unacked = sh.unacked.lock();
        while let Some(request) = sh.outbox.pop() {
            let auth = sh.auth.lock().clone();
            if !matches!(request.op, RequestOp::AddAuth { .. }) {
                sh.server.apply(sh.session_id, &auth, &request.op, false);
            }
            if let Some(context) = request.completion {
                unacked.push_back(context);
            }
        }
        drop(unacked);
        if sh.closing.load(Ordering::Acquire) {
            self.end_on_server();
        }
        Ok(())
    }

    fn abandon_pending(&self, rc: ReturnCode, sink: &dyn EngineSink) {
        let sh = &self.shared;
        let pending: Vec<CompletionContext> = {
            let mut unacked = sh.unacked.lock();
            sh.abandoned.store(true, Ordering::Release);
            let mut pending: Vec<_> = unacked.drain(..).collect();
            while let Some(request) = sh.outbox.pop() {
                pending.extend(request.completion);
            }
            pending
        };
        let abandoned = pending.len();
        for context in pending {
            sink.complete(context, rc, zkmt_runtime::Reply::None);
        }
        if abandoned > 0 {
            debug!(count = abandoned, %rc, "abandoned pending requests");
        }
        sh.watches.lock().clear();
        if sh.closing.load(Ordering::Acquire) {
            self.end_on_server();
        }
    }

    fn release(&self) {
        self.end_on_server();
    }
}
