//! Client API
//!
//! [`ZooKeeper`] wraps a [`Session`] with one method per operation. Each
//! asynchronous method takes an optional callback and returns as soon as
//! the request is queued; the callback later runs on the completion
//! thread. Blocking variants (`*_sync`) wait for the result on the calling
//! thread and must not be used from a callback or watcher.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;
use zkmt_core::{validate_path, Acl, CreateMode, Op, ReturnCode, State, Stat, Xid, ZkError, ZkResult};
use zkmt_runtime::{
    AclCallback, AuthCallback, ChildrenCallback, GetCallback, MultiCallback, RequestOp, Route,
    Session, SessionConfig, SessionEngine, StatCallback, StringCallback, VoidCallback, Watcher,
};

use crate::sync_call::SyncCompletion;

/// Any version
pub const ANY_VERSION: i32 = -1;

pub struct ZooKeeper {
    session: RwLock<Option<Session>>,
}

impl ZooKeeper {
    /// Uninitialized client. Call [`init`](Self::init) before anything else.
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
        }
    }

    /// Create and initialize a client in one step.
    pub fn connect(
        engine: Box<dyn SessionEngine>,
        config: SessionConfig,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ZkResult<Self> {
        let zk = Self::new();
        zk.init(engine, config, watcher)?;
        Ok(zk)
    }

    /// Start the session. Returns once the adaptor threads are running.
    pub fn init(
        &self,
        engine: Box<dyn SessionEngine>,
        config: SessionConfig,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ZkResult<()> {
        let mut slot = self.session.write();
        if slot.is_some() {
            return Err(ZkError::AlreadyInitialized);
        }
        *slot = Some(Session::init(engine, config, watcher)?);
        Ok(())
    }

    fn session(&self) -> ZkResult<Session> {
        self.session.read().clone().ok_or(ZkError::NotInitialized)
    }

    fn blocking_session(&self) -> ZkResult<Session> {
        let session = self.session()?;
        if session.on_adaptor_thread() {
            return Err(ZkError::BadArguments(
                "blocking call from a callback or watcher",
            ));
        }
        Ok(session)
    }

    /// Close the session. In-flight requests complete with `Closing`.
    pub fn close(&self) -> ZkResult<()> {
        self.session()?.close()
    }

    pub fn state(&self) -> State {
        match self.session.read().as_ref() {
            Some(session) => session.state(),
            None => State::Connecting,
        }
    }

    pub fn session_id(&self) -> i64 {
        self.session
            .read()
            .as_ref()
            .map_or(0, |session| session.session_id())
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map_or(false, |session| session.is_unrecoverable())
    }

    /// Underlying session handle
    pub fn handle(&self) -> ZkResult<Session> {
        self.session()
    }

    // Asynchronous API

    pub fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
        callback: Option<Arc<dyn StringCallback>>,
    ) -> ZkResult<Xid> {
        validate_path(path)?;
        if acl.is_empty() {
            return Err(ZkError::BadArguments("acl is empty"));
        }
        self.session()?.submit(
            RequestOp::Create {
                path: path.to_string(),
                data: data.to_vec(),
                acl: acl.to_vec(),
                mode,
            },
            callback.map(Route::String),
            None,
        )
    }

    pub fn remove(
        &self,
        path: &str,
        version: i32,
        callback: Option<Arc<dyn VoidCallback>>,
    ) -> ZkResult<Xid> {
        validate_path(path)?;
        self.session()?.submit(
            RequestOp::Remove {
                path: path.to_string(),
                version,
            },
            callback.map(Route::Void),
            None,
        )
    }

    /// Stat of a node. A `watcher` is left on the node whether or not it
    /// exists, and fires on its creation, change or deletion.
    pub fn exists(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
        callback: Option<Arc<dyn StatCallback>>,
    ) -> ZkResult<Xid> {
        validate_path(path)?;
        self.session()?.submit(
            RequestOp::Exists {
                path: path.to_string(),
            },
            callback.map(Route::Stat),
            watcher,
        )
    }

    pub fn get(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
        callback: Option<Arc<dyn GetCallback>>,
    ) -> ZkResult<Xid> {
        validate_path(path)?;
        self.session()?.submit(
            RequestOp::GetData {
                path: path.to_string(),
            },
            callback.map(Route::Data),
            watcher,
        )
    }

    pub fn set(
        &self,
        path: &str,
        data: &[u8],
        version: i32,
        callback: Option<Arc<dyn StatCallback>>,
    ) -> ZkResult<Xid> {
        validate_path(path)?;
        self.session()?.submit(
            RequestOp::SetData {
                path: path.to_string(),
                data: data.to_vec(),
                version,
            },
            callback.map(Route::Stat),
            None,
        )
    }

    pub fn get_children(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
        callback: Option<Arc<dyn ChildrenCallback>>,
    ) -> ZkResult<Xid> {
        validate_path(path)?;
        self.session()?.submit(
            RequestOp::GetChildren {
                path: path.to_string(),
            },
            callback.map(Route::Children),
            watcher,
        )
    }

    pub fn get_acl(&self, path: &str, callback: Option<Arc<dyn AclCallback>>) -> ZkResult<Xid> {
        validate_path(path)?;
        self.session()?.submit(
            RequestOp::GetAcl {
                path: path.to_string(),
            },
            callback.map(Route::Acl),
            None,
        )
    }

    pub fn set_acl(
        &self,
        path: &str,
        version: i32,
        acl: &[Acl],
        callback: Option<Arc<dyn VoidCallback>>,
    ) -> ZkResult<Xid> {
        validate_path(path)?;
        if acl.is_empty() {
            return Err(ZkError::BadArguments("acl is empty"));
        }
        self.session()?.submit(
            RequestOp::SetAcl {
                path: path.to_string(),
                version,
                acl: acl.to_vec(),
            },
            callback.map(Route::Void),
            None,
        )
    }

    /// Flush the leader channel for `path`; the callback runs once this
    /// client is caught up.
    pub fn sync(&self, path: &str, callback: Option<Arc<dyn VoidCallback>>) -> ZkResult<Xid> {
        validate_path(path)?;
        self.session()?.submit(
            RequestOp::Sync {
                path: path.to_string(),
            },
            callback.map(Route::Sync),
            None,
        )
    }

    /// Add credentials to the session. A rejected credential moves the
    /// session to `AuthFailed`.
    pub fn add_auth(
        &self,
        scheme: &str,
        cert: &str,
        callback: Option<Arc<dyn AuthCallback>>,
    ) -> ZkResult<Xid> {
        if scheme.is_empty() {
            return Err(ZkError::BadArguments("scheme is empty"));
        }
        let route = callback.map(|callback| Route::Auth {
            callback,
            scheme: scheme.to_string(),
            cert: cert.to_string(),
        });
        self.session()?.submit(
            RequestOp::AddAuth {
                scheme: scheme.to_string(),
                cert: cert.to_string(),
            },
            route,
            None,
        )
    }

    /// Apply `ops` atomically: all succeed or none are applied.
    pub fn multi(&self, ops: Vec<Op>, callback: Option<Arc<dyn MultiCallback>>) -> ZkResult<Xid> {
        if ops.is_empty() {
            return Err(ZkError::BadArguments("multi with no operations"));
        }
        for op in &ops {
            validate_path(op.path())?;
        }
        self.session()?
            .submit(RequestOp::Multi { ops }, callback.map(Route::Multi), None)
    }

    // Blocking API

    /// `Ok(None)` if the node does not exist.
    pub fn exists_sync(&self, path: &str, watcher: Option<Arc<dyn Watcher>>) -> ZkResult<Option<Stat>> {
        self.blocking_session()?;
        let done = SyncCompletion::<Option<Stat>>::new();
        self.exists(path, watcher, Some(done.clone()))?;
        match done.wait() {
            (rc, stat) if rc.is_ok() => Ok(stat),
            (ReturnCode::NoNode, _) => Ok(None),
            (rc, _) => Err(ZkError::Operation(rc)),
        }
    }

    pub fn get_sync(&self, path: &str, watcher: Option<Arc<dyn Watcher>>) -> ZkResult<(Vec<u8>, Stat)> {
        self.blocking_session()?;
        let done = SyncCompletion::<Option<(Vec<u8>, Stat)>>::new();
        self.get(path, watcher, Some(done.clone()))?;
        expect_payload(done.wait())
    }

    pub fn get_children_sync(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> ZkResult<(Vec<String>, Stat)> {
        self.blocking_session()?;
        let done = SyncCompletion::<Option<(Vec<String>, Stat)>>::new();
        self.get_children(path, watcher, Some(done.clone()))?;
        expect_payload(done.wait())
    }

    pub fn get_acl_sync(&self, path: &str) -> ZkResult<(Vec<Acl>, Stat)> {
        self.blocking_session()?;
        let done = SyncCompletion::<Option<(Vec<Acl>, Stat)>>::new();
        self.get_acl(path, Some(done.clone()))?;
        expect_payload(done.wait())
    }

    /// Returns the name of the created node.
    pub fn create_sync(&self, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode) -> ZkResult<String> {
        self.blocking_session()?;
        let done = SyncCompletion::<String>::new();
        self.create(path, data, acl, mode, Some(done.clone()))?;
        match done.wait() {
            (rc, created) if rc.is_ok() => Ok(created),
            (rc, _) => Err(ZkError::Operation(rc)),
        }
    }

    pub fn set_sync(&self, path: &str, data: &[u8], version: i32) -> ZkResult<Stat> {
        self.blocking_session()?;
        let done = SyncCompletion::<Option<Stat>>::new();
        self.set(path, data, version, Some(done.clone()))?;
        match done.wait() {
            (rc, Some(stat)) if rc.is_ok() => Ok(stat),
            (rc, _) if rc.is_ok() => Err(ZkError::Marshalling("set reply without stat".into())),
            (rc, _) => Err(ZkError::Operation(rc)),
        }
    }

    pub fn remove_sync(&self, path: &str, version: i32) -> ZkResult<()> {
        self.blocking_session()?;
        let done = SyncCompletion::<()>::new();
        self.remove(path, version, Some(done.clone()))?;
        match done.wait() {
            (rc, ()) if rc.is_ok() => Ok(()),
            (rc, ()) => Err(ZkError::Operation(rc)),
        }
    }
}

fn expect_payload<T>(result: (ReturnCode, Option<T>)) -> ZkResult<T> {
    match result {
        (rc, Some(value)) if rc.is_ok() => Ok(value),
        (rc, None) if rc.is_ok() => Err(ZkError::Marshalling("reply without payload".into())),
        (rc, _) => Err(ZkError::Operation(rc)),
    }
}

impl Default for ZooKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ZooKeeper {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            if !session.is_closed() {
                if let Err(e) = session.close() {
                    warn!(error = %e, "close on drop failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEngine, MemoryServer};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};
    use zkmt_core::{Event, Id, OpResult};

    fn config() -> SessionConfig {
        SessionConfig::builtin()
            .hosts("memory")
            .max_poll_interval(Duration::from_millis(20))
    }

    fn connect(server: &MemoryServer) -> (ZooKeeper, MemoryEngine) {
        let engine = server.connect().unwrap();
        let zk = ZooKeeper::connect(Box::new(engine.clone()), config(), None).unwrap();
        (zk, engine)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn event_channel() -> (Arc<dyn Watcher>, mpsc::Receiver<(Event, State, String)>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let watcher: Arc<dyn Watcher> = Arc::new(move |e: Event, s: State, p: &str| {
            let _ = tx.lock().send((e, s, p.to_string()));
        });
        (watcher, rx)
    }

    #[test]
    fn test_uninitialized_client() {
        let zk = ZooKeeper::new();
        assert_eq!(zk.state(), State::Connecting);
        assert_eq!(zk.session_id(), 0);
        assert!(matches!(zk.sync("/", None), Err(ZkError::NotInitialized)));
        assert!(matches!(zk.close(), Err(ZkError::NotInitialized)));
    }

    #[test]
    fn test_double_init_rejected() {
        let server = MemoryServer::new();
        let (zk, _) = connect(&server);
        let again = zk.init(Box::new(server.connect().unwrap()), config(), None);
        assert!(matches!(again, Err(ZkError::AlreadyInitialized)));
        zk.close().unwrap();
    }

    #[test]
    fn test_connecting_then_connected() {
        let server = MemoryServer::new();
        let engine = server.connect().unwrap();
        let (watcher, events) = event_channel();
        let zk = ZooKeeper::connect(Box::new(engine.clone()), config(), Some(watcher)).unwrap();
        let (event, state, path) = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((event, state, path.as_str()), (Event::Session, State::Connected, ""));
        assert_eq!(zk.state(), State::Connected);
        assert_eq!(zk.session_id(), engine.assigned_session_id());
        zk.close().unwrap();
    }

    #[test]
    fn test_blocking_round_trip() {
        let server = MemoryServer::new();
        let (zk, _) = connect(&server);
        let start = Instant::now();

        let open = Acl::open_unsafe();
        assert_eq!(
            zk.create_sync("/cfg", b"v1", &open, CreateMode::Persistent).unwrap(),
            "/cfg"
        );
        let (data, stat) = zk.get_sync("/cfg", None).unwrap();
        assert_eq!(data, b"v1");
        assert_eq!(stat.version, 0);

        let stat = zk.set_sync("/cfg", b"v2", 0).unwrap();
        assert_eq!(stat.version, 1);
        assert!(matches!(
            zk.set_sync("/cfg", b"v3", 0),
            Err(ZkError::Operation(ReturnCode::BadVersion))
        ));

        zk.create_sync("/cfg/a", b"", &open, CreateMode::Persistent).unwrap();
        let (children, stat) = zk.get_children_sync("/cfg", None).unwrap();
        assert_eq!(children, vec!["a".to_string()]);
        assert_eq!(stat.num_children, 1);

        let (acl, _) = zk.get_acl_sync("/cfg").unwrap();
        assert_eq!(acl, open);

        assert_eq!(zk.exists_sync("/nope", None).unwrap(), None);
        assert!(zk.exists_sync("/cfg/a", None).unwrap().is_some());
        zk.remove_sync("/cfg/a", ANY_VERSION).unwrap();
        assert!(matches!(
            zk.remove_sync("/cfg/a", ANY_VERSION),
            Err(ZkError::Operation(ReturnCode::NoNode))
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
        zk.close().unwrap();
    }

    #[test]
    fn test_completions_follow_submission_order() {
        let server = MemoryServer::new();
        let (zk, _) = connect(&server);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        let create: Arc<dyn StringCallback> = Arc::new(move |rc: ReturnCode, _: &str, _: &str| {
            l.lock().push(("create", rc));
        });
        let l = log.clone();
        let set: Arc<dyn StatCallback> = Arc::new(move |rc: ReturnCode, _: &str, _: Option<&Stat>| {
            l.lock().push(("set", rc));
        });
        let l = log.clone();
        let get: Arc<dyn GetCallback> =
            Arc::new(move |rc: ReturnCode, _: &str, data: &[u8], _: Option<&Stat>| {
                assert_eq!(data, b"two");
                l.lock().push(("get", rc));
            });
        let l = log.clone();
        let remove: Arc<dyn VoidCallback> = Arc::new(move |rc: ReturnCode, _: &str| {
            l.lock().push(("remove", rc));
        });
        let l = log.clone();
        let exists: Arc<dyn StatCallback> =
            Arc::new(move |rc: ReturnCode, _: &str, stat: Option<&Stat>| {
                assert!(stat.is_none());
                l.lock().push(("exists", rc));
            });

        zk.create("/o", b"one", &Acl::open_unsafe(), CreateMode::Persistent, Some(create))
            .unwrap();
        zk.set("/o", b"two", ANY_VERSION, Some(set)).unwrap();
        zk.get("/o", None, Some(get)).unwrap();
        zk.remove("/o", ANY_VERSION, Some(remove)).unwrap();
        zk.exists("/o", None, Some(exists)).unwrap();

        assert!(wait_for(|| log.lock().len() == 5));
        assert_eq!(
            *log.lock(),
            vec![
                ("create", ReturnCode::Ok),
                ("set", ReturnCode::Ok),
                ("get", ReturnCode::Ok),
                ("remove", ReturnCode::Ok),
                ("exists", ReturnCode::NoNode),
            ]
        );
        zk.close().unwrap();
    }

    #[test]
    fn test_data_watch_fires_once_across_sessions() {
        let server = MemoryServer::new();
        let (reader, reader_engine) = connect(&server);
        let (writer, _) = connect(&server);
        writer
            .create_sync("/w", b"0", &Acl::open_unsafe(), CreateMode::Persistent)
            .unwrap();

        let (watcher, events) = event_channel();
        reader.get_sync("/w", Some(watcher)).unwrap();
        assert_eq!(reader_engine.watch_count(), 1);

        writer.set_sync("/w", b"1", ANY_VERSION).unwrap();
        let (event, _, path) = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((event, path.as_str()), (Event::Changed, "/w"));

        writer.set_sync("/w", b"2", ANY_VERSION).unwrap();
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(reader_engine.watch_count(), 0);

        reader.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_exists_watch_sees_creation() {
        let server = MemoryServer::new();
        let (zk, _) = connect(&server);
        let (other, _) = connect(&server);
        let (watcher, events) = event_channel();
        assert_eq!(zk.exists_sync("/later", Some(watcher)).unwrap(), None);
        other
            .create_sync("/later", b"", &Acl::open_unsafe(), CreateMode::Persistent)
            .unwrap();
        let (event, state, path) = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, Event::Created);
        assert_eq!(state, State::Connected);
        assert_eq!(path, "/later");
        zk.close().unwrap();
        other.close().unwrap();
    }

    #[test]
    fn test_child_watch_and_ephemeral_cleanup() {
        let server = MemoryServer::new();
        let (watching, _) = connect(&server);
        let (owner, _) = connect(&server);
        watching
            .create_sync("/members", b"", &Acl::open_unsafe(), CreateMode::Persistent)
            .unwrap();
        let name = owner
            .create_sync("/members/m-", b"", &Acl::open_unsafe(), CreateMode::EphemeralSequential)
            .unwrap();
        assert_eq!(name, "/members/m-0000000000");

        let (watcher, events) = event_channel();
        let (children, _) = watching.get_children_sync("/members", Some(watcher)).unwrap();
        assert_eq!(children, vec!["m-0000000000".to_string()]);

        owner.close().unwrap();
        let (event, _, path) = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((event, path.as_str()), (Event::Child, "/members"));
        assert!(watching.get_children_sync("/members", None).unwrap().0.is_empty());
        watching.close().unwrap();
    }

    #[test]
    fn test_close_completes_every_queued_request() {
        let server = MemoryServer::new();
        let (zk, _) = connect(&server);
        let codes = Arc::new(Mutex::new(Vec::new()));
        const N: usize = 64;
        for _ in 0..N {
            let codes = codes.clone();
            let cb: Arc<dyn VoidCallback> = Arc::new(move |rc: ReturnCode, _: &str| {
                codes.lock().push(rc);
            });
            zk.sync("/", Some(cb)).unwrap();
        }
        zk.close().unwrap();

        // close joins the completion thread after its final drain
        let codes = codes.lock();
        assert_eq!(codes.len(), N);
        assert!(codes
            .iter()
            .all(|rc| matches!(rc, ReturnCode::Ok | ReturnCode::Closing)));
        // answered requests come first, abandoned ones after
        let answered = codes.iter().take_while(|rc| **rc == ReturnCode::Ok).count();
        assert!(codes[answered..].iter().all(|rc| *rc == ReturnCode::Closing));
        assert!(matches!(zk.sync("/", None), Err(ZkError::Closing)));
    }

    #[test]
    fn test_connects_without_waiting_for_poll_tick() {
        let server = MemoryServer::new();
        let (watcher, events) = event_channel();
        let started = Instant::now();
        let zk = ZooKeeper::connect(
            Box::new(server.connect().unwrap()),
            SessionConfig::builtin().hosts("memory"),
            Some(watcher),
        )
        .unwrap();
        let (event, state, _) = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((event, state), (Event::Session, State::Connected));
        assert!(started.elapsed() < Duration::from_millis(300));
        zk.close().unwrap();
    }

    #[test]
    fn test_expired_session_is_unrecoverable() {
        let server = MemoryServer::new();
        let engine = server.connect().unwrap();
        let (watcher, events) = event_channel();
        let zk = ZooKeeper::connect(Box::new(engine.clone()), config(), Some(watcher)).unwrap();
        zk.create_sync("/eph", b"", &Acl::open_unsafe(), CreateMode::Ephemeral)
            .unwrap();

        server.expire(engine.assigned_session_id());
        let mut expired = false;
        while let Ok((event, state, _)) = events.recv_timeout(Duration::from_secs(5)) {
            if event == Event::Session && state == State::Expired {
                expired = true;
                break;
            }
        }
        assert!(expired);
        assert!(wait_for(|| zk.is_unrecoverable()));
        assert_eq!(zk.state(), State::Expired);
        assert!(matches!(
            zk.get("/eph", None, None),
            Err(ZkError::InvalidState(State::Expired))
        ));
        assert_eq!(server.node_count(), 1);
        zk.close().unwrap();
    }

    #[test]
    fn test_auth_and_acl() {
        let server = MemoryServer::new();
        let (alice, _) = connect(&server);
        let (anon, _) = connect(&server);

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let cb: Arc<dyn AuthCallback> = Arc::new(move |rc: ReturnCode, scheme: &str, cert: &str| {
            let _ = tx.lock().send((rc, scheme.to_string(), cert.to_string()));
        });
        alice.add_auth("digest", "alice:pw", Some(cb)).unwrap();
        let (rc, scheme, cert) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((rc, scheme.as_str(), cert.as_str()), (ReturnCode::Ok, "digest", "alice:pw"));

        let private = vec![Acl::new(zkmt_core::perms::ALL, Id::new("digest", "alice:pw"))];
        alice
            .create_sync("/private", b"s3cret", &private, CreateMode::Persistent)
            .unwrap();
        assert_eq!(alice.get_sync("/private", None).unwrap().0, b"s3cret");
        assert!(matches!(
            anon.get_sync("/private", None),
            Err(ZkError::Operation(ReturnCode::NoAuth))
        ));
        alice.close().unwrap();
        anon.close().unwrap();
    }

    #[test]
    fn test_auth_failure_moves_to_auth_failed() {
        let server = MemoryServer::new();
        let (zk, _) = connect(&server);
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let cb: Arc<dyn AuthCallback> = Arc::new(move |rc: ReturnCode, _: &str, _: &str| {
            *s.lock() = Some(rc);
        });
        zk.add_auth("kerberos", "ticket", Some(cb)).unwrap();
        assert!(wait_for(|| *seen.lock() == Some(ReturnCode::AuthFailed)));
        assert!(wait_for(|| zk.state() == State::AuthFailed));
        assert!(zk.is_unrecoverable());
        zk.close().unwrap();
    }

    #[test]
    fn test_multi_commits_atomically() {
        let server = MemoryServer::new();
        let (zk, _) = connect(&server);
        let open = Acl::open_unsafe();
        zk.create_sync("/m", b"0", &open, CreateMode::Persistent).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let cb: Arc<dyn MultiCallback> = Arc::new(move |rc: ReturnCode, results: &[OpResult]| {
            let _ = tx.lock().send((rc, results.to_vec()));
        });
        let ops = vec![
            Op::Check {
                path: "/m".into(),
                version: 0,
            },
            Op::Create {
                path: "/m/child".into(),
                data: Vec::new(),
                acl: open.clone(),
                mode: CreateMode::Persistent,
            },
            Op::SetData {
                path: "/m".into(),
                data: b"1".to_vec(),
                version: 0,
            },
        ];
        zk.multi(ops.clone(), Some(cb.clone())).unwrap();
        let (rc, results) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(rc, ReturnCode::Ok);
        assert_eq!(results.len(), 3);
        assert_eq!(results[1], OpResult::Create { path: "/m/child".into() });

        // versions moved on, so replaying fails and changes nothing
        zk.multi(ops, Some(cb)).unwrap();
        let (rc, results) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(rc, ReturnCode::BadVersion);
        assert!(results.is_empty());
        assert_eq!(zk.get_sync("/m", None).unwrap().0, b"1");

        assert!(matches!(zk.multi(Vec::new(), None), Err(ZkError::BadArguments(_))));
        zk.close().unwrap();
    }

    #[test]
    fn test_blocking_call_from_callback_is_refused() {
        let server = MemoryServer::new();
        let zk = Arc::new(connect(&server).0);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let inner = Arc::downgrade(&zk);
        let cb: Arc<dyn VoidCallback> = Arc::new(move |_: ReturnCode, _: &str| {
            if let Some(zk) = inner.upgrade() {
                let refused = matches!(zk.get_sync("/", None), Err(ZkError::BadArguments(_)));
                let _ = tx.lock().send(refused);
            }
        });
        zk.sync("/", Some(cb)).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        zk.close().unwrap();
    }

    #[test]
    fn test_argument_validation() {
        let server = MemoryServer::new();
        let (zk, _) = connect(&server);
        assert!(matches!(zk.get("relative", None, None), Err(ZkError::BadArguments(_))));
        assert!(matches!(
            zk.create("/a", b"", &[], CreateMode::Persistent, None),
            Err(ZkError::BadArguments(_))
        ));
        assert!(matches!(zk.add_auth("", "x", None), Err(ZkError::BadArguments(_))));
        zk.close().unwrap();
    }

    #[test]
    fn test_drop_closes_session() {
        let server = MemoryServer::new();
        {
            let (zk, _) = connect(&server);
            zk.create_sync("/tmp", b"", &Acl::open_unsafe(), CreateMode::Ephemeral)
                .unwrap();
            assert_eq!(server.session_count(), 1);
        }
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.node_count(), 1);
    }
}
