//! Completion routing
//!
//! At submission a typed callback and the request path are boxed into a
//! [`CompletionContext`] that travels through the session engine as an
//! opaque token. When the engine has a reply, the I/O thread decodes it
//! into an owned [`CompletionRecord`] and queues it. The completion thread
//! dispatches the record, which consumes the context: every context is
//! delivered and dropped exactly once.
//!
//! Reply buffers belong to the engine and are only valid for the duration
//! of the sink call, so payloads are copied out on the I/O thread. On a
//! non-success result code nothing is copied.

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};
use zkmt_core::{Acl, OpResult, ReturnCode, Stat, Xid};

use crate::callback::{
    AclCallback, AuthCallback, ChildrenCallback, GetCallback, MultiCallback, StatCallback,
    StringCallback, VoidCallback,
};

/// Reply shape expected by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    String,
    Void,
    Stat,
    Data,
    Children,
    Acl,
    Auth,
    Sync,
    Multi,
}

/// Reply as produced by the engine, borrowing its buffers.
#[derive(Debug, Clone, Copy)]
pub enum Reply<'a> {
    None,
    Value(&'a str),
    Stat(&'a Stat),
    Data { data: &'a [u8], stat: &'a Stat },
    Children { children: &'a [String], stat: &'a Stat },
    Acl { acl: &'a [Acl], stat: &'a Stat },
    Multi(&'a [OpResult]),
}

/// Owned copy of a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Value(String),
    Stat(Stat),
    Data(Vec<u8>, Stat),
    Children(Vec<String>, Stat),
    Acl(Vec<Acl>, Stat),
    Multi(Vec<OpResult>),
}

impl Payload {
    /// Copy a reply out of engine memory. Untrusted on failure, so a
    /// non-success `rc` yields `Payload::None`.
    pub fn copy_from(rc: ReturnCode, reply: &Reply<'_>) -> Payload {
        if !rc.is_ok() {
            return Payload::None;
        }
        match *reply {
            Reply::None => Payload::None,
            Reply::Value(v) => Payload::Value(v.to_owned()),
            Reply::Stat(s) => Payload::Stat(*s),
            Reply::Data { data, stat } => Payload::Data(data.to_vec(), *stat),
            Reply::Children { children, stat } => Payload::Children(children.to_vec(), *stat),
            Reply::Acl { acl, stat } => Payload::Acl(acl.to_vec(), *stat),
            Reply::Multi(results) => Payload::Multi(results.to_vec()),
        }
    }

    /// Borrowed view, for engines that keep replies as owned payloads.
    pub fn as_reply(&self) -> Reply<'_> {
        match self {
            Payload::None => Reply::None,
            Payload::Value(v) => Reply::Value(v),
            Payload::Stat(s) => Reply::Stat(s),
            Payload::Data(data, stat) => Reply::Data { data, stat },
            Payload::Children(children, stat) => Reply::Children { children, stat },
            Payload::Acl(acl, stat) => Reply::Acl { acl, stat },
            Payload::Multi(results) => Reply::Multi(results),
        }
    }

    fn fits(&self, kind: CompletionKind) -> bool {
        matches!(
            (kind, self),
            (CompletionKind::String, Payload::Value(_))
                | (CompletionKind::Void, Payload::None)
                | (CompletionKind::Auth, Payload::None)
                | (CompletionKind::Sync, Payload::None)
                | (CompletionKind::Stat, Payload::Stat(_))
                | (CompletionKind::Data, Payload::Data(..))
                | (CompletionKind::Children, Payload::Children(..))
                | (CompletionKind::Acl, Payload::Acl(..))
                | (CompletionKind::Multi, Payload::Multi(_))
        )
    }
}

/// Typed user callback.
#[derive(Clone)]
pub enum Route {
    String(Arc<dyn StringCallback>),
    Void(Arc<dyn VoidCallback>),
    Stat(Arc<dyn StatCallback>),
    Data(Arc<dyn GetCallback>),
    Children(Arc<dyn ChildrenCallback>),
    Acl(Arc<dyn AclCallback>),
    Auth {
        callback: Arc<dyn AuthCallback>,
        scheme: String,
        cert: String,
    },
    Sync(Arc<dyn VoidCallback>),
    Multi(Arc<dyn MultiCallback>),
}

impl Route {
    pub fn kind(&self) -> CompletionKind {
        match self {
            Route::String(_) => CompletionKind::String,
            Route::Void(_) => CompletionKind::Void,
            Route::Stat(_) => CompletionKind::Stat,
            Route::Data(_) => CompletionKind::Data,
            Route::Children(_) => CompletionKind::Children,
            Route::Acl(_) => CompletionKind::Acl,
            Route::Auth { .. } => CompletionKind::Auth,
            Route::Sync(_) => CompletionKind::Sync,
            Route::Multi(_) => CompletionKind::Multi,
        }
    }
}

/// Per-request context: the typed callback plus the request path.
///
/// Not `Clone`. Dispatch consumes it.
pub struct CompletionContext {
    xid: Xid,
    path: String,
    route: Route,
}

impl CompletionContext {
    pub fn new(xid: Xid, path: impl Into<String>, route: Route) -> Self {
        Self {
            xid,
            path: path.into(),
            route,
        }
    }

    pub fn xid(&self) -> Xid {
        self.xid
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> CompletionKind {
        self.route.kind()
    }

    /// Invoke the callback with a decoded result, consuming the context.
    pub fn dispatch(self, rc: ReturnCode, payload: Payload) {
        let kind = self.kind();
        let (rc, payload) = if rc.is_ok() && !payload.fits(kind) {
            warn!(xid = %self.xid, ?kind, "reply does not match completion kind");
            (ReturnCode::MarshallingError, Payload::None)
        } else {
            (rc, payload)
        };
        trace!(xid = %self.xid, ?kind, %rc, path = %self.path, "dispatching completion");

        let path = self.path.as_str();
        match (&self.route, payload) {
            (Route::String(cb), Payload::Value(value)) => cb.process_result(rc, path, &value),
            (Route::String(cb), _) => cb.process_result(rc, path, ""),
            (Route::Void(cb), _) | (Route::Sync(cb), _) => cb.process_result(rc, path),
            (Route::Stat(cb), Payload::Stat(stat)) => cb.process_result(rc, path, Some(&stat)),
            (Route::Stat(cb), _) => cb.process_result(rc, path, None),
            (Route::Data(cb), Payload::Data(data, stat)) => {
                cb.process_result(rc, path, &data, Some(&stat))
            }
            (Route::Data(cb), _) => cb.process_result(rc, path, &[], None),
            (Route::Children(cb), Payload::Children(children, stat)) => {
                cb.process_result(rc, path, &children, Some(&stat))
            }
            (Route::Children(cb), _) => cb.process_result(rc, path, &[], None),
            (Route::Acl(cb), Payload::Acl(acl, stat)) => {
                cb.process_result(rc, path, &acl, Some(&stat))
            }
            (Route::Acl(cb), _) => cb.process_result(rc, path, &[], None),
            (Route::Auth { callback, scheme, cert }, _) => callback.process_result(rc, scheme, cert),
            (Route::Multi(cb), Payload::Multi(results)) => cb.process_result(rc, &results),
            (Route::Multi(cb), _) => cb.process_result(rc, &[]),
        }
    }
}

impl fmt::Debug for CompletionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionContext")
            .field("xid", &self.xid)
            .field("kind", &self.kind())
            .field("path", &self.path)
            .finish()
    }
}

/// A decoded completion waiting on the completion queue.
#[derive(Debug)]
pub struct CompletionRecord {
    context: CompletionContext,
    rc: ReturnCode,
    payload: Payload,
}

impl CompletionRecord {
    /// Decode an engine reply. Runs on the I/O thread.
    pub fn decode(context: CompletionContext, rc: ReturnCode, reply: &Reply<'_>) -> Self {
        let payload = Payload::copy_from(rc, reply);
        Self {
            context,
            rc,
            payload,
        }
    }

    pub fn xid(&self) -> Xid {
        self.context.xid()
    }

    pub fn rc(&self) -> ReturnCode {
        self.rc
    }

    /// Deliver to the user callback. Runs on the completion thread.
    pub fn dispatch(self) {
        self.context.dispatch(self.rc, self.payload)
    }
}
