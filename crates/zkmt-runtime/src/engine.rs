//! Session engine seam
//!
//! The engine owns the wire protocol, the connection and the table of
//! in-flight requests. The adaptor drives it from the I/O thread and
//! submits requests to it from application threads. Every completion the
//! engine produces is handed to an [`EngineSink`] while the engine still
//! owns the reply buffers.
//!
//! Contract:
//! - `submit` either retains the request until it is completed through the
//!   sink, or rejects it and drops it. A rejected request's callback never
//!   runs.
//! - Every retained completion context is eventually passed to
//!   `EngineSink::complete`, at the latest by `abandon_pending`.
//! - Watch contexts are passed back through `EngineSink::watch_event`.
//!   One-shot contexts are dropped by the engine after they fire.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use zkmt_core::{Acl, CreateMode, Op, ReturnCode, Xid, ZkResult};

use crate::completion::{CompletionContext, Reply};
use crate::watch::WatchContext;

/// Readiness the engine is interested in, or that was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoEvents {
    pub read: bool,
    pub write: bool,
}

impl IoEvents {
    pub const NONE: IoEvents = IoEvents { read: false, write: false };
    pub const READ: IoEvents = IoEvents { read: true, write: false };
    pub const WRITE: IoEvents = IoEvents { read: false, write: true };
    pub const BOTH: IoEvents = IoEvents { read: true, write: true };

    pub fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

/// What the I/O thread should wait on next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    /// Session socket, if connected or connecting
    pub fd: Option<RawFd>,
    pub events: IoEvents,
    /// Deadline for the engine's next timer-driven step (pings, reconnect)
    pub timeout: Duration,
}

impl Interest {
    /// No socket, wake after `timeout`.
    pub fn idle(timeout: Duration) -> Self {
        Self {
            fd: None,
            events: IoEvents::NONE,
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Ok,
    /// Work remains; poll again without waiting
    MoreToDo,
    /// Engine finished the close exchange; stop the I/O loop
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOp {
    Create {
        path: String,
        data: Vec<u8>,
        acl: Vec<Acl>,
        mode: CreateMode,
    },
    Remove {
        path: String,
        version: i32,
    },
    Exists {
        path: String,
    },
    GetData {
        path: String,
    },
    SetData {
        path: String,
        data: Vec<u8>,
        version: i32,
    },
    GetChildren {
        path: String,
    },
    GetAcl {
        path: String,
    },
    SetAcl {
        path: String,
        version: i32,
        acl: Vec<Acl>,
    },
    Sync {
        path: String,
    },
    AddAuth {
        scheme: String,
        cert: String,
    },
    Multi {
        ops: Vec<Op>,
    },
}

impl RequestOp {
    /// Node path the request targets; empty for auth and multi.
    pub fn path(&self) -> &str {
        match self {
            RequestOp::Create { path, .. }
            | RequestOp::Remove { path, .. }
            | RequestOp::Exists { path }
            | RequestOp::GetData { path }
            | RequestOp::SetData { path, .. }
            | RequestOp::GetChildren { path }
            | RequestOp::GetAcl { path }
            | RequestOp::SetAcl { path, .. }
            | RequestOp::Sync { path } => path,
            RequestOp::AddAuth { .. } | RequestOp::Multi { .. } => "",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RequestOp::Create { .. } => "create",
            RequestOp::Remove { .. } => "remove",
            RequestOp::Exists { .. } => "exists",
            RequestOp::GetData { .. } => "get",
            RequestOp::SetData { .. } => "set",
            RequestOp::GetChildren { .. } => "get_children",
            RequestOp::GetAcl { .. } => "get_acl",
            RequestOp::SetAcl { .. } => "set_acl",
            RequestOp::Sync { .. } => "sync",
            RequestOp::AddAuth { .. } => "add_auth",
            RequestOp::Multi { .. } => "multi",
        }
    }

    /// Whether a watch may be registered with this request.
    pub fn accepts_watch(&self) -> bool {
        matches!(
            self,
            RequestOp::Exists { .. } | RequestOp::GetData { .. } | RequestOp::GetChildren { .. }
        )
    }
}

#[derive(Debug)]
pub struct Request {
    pub xid: Xid,
    pub op: RequestOp,
    /// `None` when the caller supplied no callback
    pub completion: Option<CompletionContext>,
    pub watch: Option<Arc<WatchContext>>,
}

/// Receives engine output on the I/O thread.
pub trait EngineSink {
    /// Report a finished request. `reply` is only valid for this call.
    fn complete(&self, context: CompletionContext, rc: ReturnCode, reply: Reply<'_>);

    /// Report a fired watch with raw event and state codes.
    fn watch_event(&self, watch: &WatchContext, event: i32, state: i32, path: &str);
}

pub trait SessionEngine: Send + Sync {
    /// Install the session-wide watcher. Called once, before the I/O
    /// thread starts.
    fn set_default_watch(&self, watch: Arc<WatchContext>);

    /// Session id, 0 until established
    fn session_id(&self) -> i64;

    fn interest(&self) -> Interest;

    /// Run one protocol step for the observed readiness.
    fn process(&self, ready: IoEvents, sink: &dyn EngineSink) -> ProcessStatus;

    /// Session can never recover (expired or auth failed)
    fn is_unrecoverable(&self) -> bool;

    /// Queue a request. Called from application threads inside the
    /// session's critical section.
    fn submit(&self, request: Request) -> ZkResult<()>;

    /// Start the close exchange. Requests submitted afterwards are
    /// rejected.
    fn close(&self);

    /// Push queued outbound requests to the wire from the calling thread,
    /// waiting at most `timeout`. Used once the I/O thread may no longer
    /// be polling.
    fn flush(&self, timeout: Duration) -> ZkResult<()>;

    /// Complete every retained request with `rc`. Called by the I/O
    /// thread after its loop ends.
    fn abandon_pending(&self, rc: ReturnCode, sink: &dyn EngineSink);

    /// Final teardown once nothing references the session.
    fn release(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_op_path_and_watch() {
        let op = RequestOp::GetData { path: "/a".into() };
        assert_eq!(op.path(), "/a");
        assert_eq!(op.name(), "get");
        assert!(op.accepts_watch());

        let op = RequestOp::AddAuth {
            scheme: "digest".into(),
            cert: "u:p".into(),
        };
        assert_eq!(op.path(), "");
        assert!(!op.accepts_watch());

        let op = RequestOp::Remove {
            path: "/b".into(),
            version: -1,
        };
        assert!(!op.accepts_watch());
    }

    #[test]
    fn test_io_events() {
        assert!(IoEvents::NONE.is_empty());
        assert!(!IoEvents::BOTH.is_empty());
        let idle = Interest::idle(Duration::from_millis(5));
        assert_eq!(idle.fd, None);
        assert!(idle.events.is_empty());
    }
}
