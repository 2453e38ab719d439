//! Node tree behind [`MemoryServer`](super::MemoryServer)
//!
//! Plain data structure: every operation returns the result code it
//! would have on a real ensemble and records the watch notifications it
//! triggers. Notifications are delivered by the caller.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use zkmt_core::{perms, Acl, CreateMode, Event, Id, Op, OpResult, ReturnCode, Stat};

/// One watch notification for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fire {
    pub session: i64,
    pub event: Event,
    pub path: String,
}

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
    stat: Stat,
    children: BTreeSet<String>,
}

/// Caller identity for ACL checks.
pub(crate) struct Caller<'a> {
    pub session: i64,
    pub auth: &'a [Id],
}

impl Caller<'_> {
    fn permits(&self, acl: &[Acl], perm: i32) -> bool {
        acl.iter().any(|entry| {
            entry.allows(perm)
                && ((entry.id.scheme == "world" && entry.id.id == "anyone")
                    || self.auth.contains(&entry.id))
        })
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

fn version_matches(expected: i32, actual: i32) -> bool {
    expected == -1 || expected == actual
}

#[derive(Clone)]
pub(crate) struct Tree {
    nodes: HashMap<String, Node>,
    zxid: i64,
    data_watches: HashMap<String, HashSet<i64>>,
    child_watches: HashMap<String, HashSet<i64>>,
}

impl Tree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                acl: Acl::open_unsafe(),
                stat: Stat::default(),
                children: BTreeSet::new(),
            },
        );
        Self {
            nodes,
            zxid: 0,
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn trigger_data(&mut self, path: &str, event: Event, fires: &mut Vec<Fire>) {
        if let Some(sessions) = self.data_watches.remove(path) {
            fires.extend(sessions.into_iter().map(|session| Fire {
                session,
                event,
                path: path.to_string(),
            }));
        }
    }

    fn trigger_child(&mut self, path: &str, event: Event, fires: &mut Vec<Fire>) {
        if let Some(sessions) = self.child_watches.remove(path) {
            fires.extend(sessions.into_iter().map(|session| Fire {
                session,
                event,
                path: path.to_string(),
            }));
        }
    }

    /// Register a data watch. Also used by exists on a missing node.
    pub fn watch_data(&mut self, session: i64, path: &str) {
        self.data_watches
            .entry(path.to_string())
            .or_default()
            .insert(session);
    }

    pub fn watch_children(&mut self, session: i64, path: &str) {
        self.child_watches
            .entry(path.to_string())
            .or_default()
            .insert(session);
    }

    pub fn forget_session(&mut self, session: i64) {
        for sessions in self.data_watches.values_mut() {
            sessions.remove(&session);
        }
        for sessions in self.child_watches.values_mut() {
            sessions.remove(&session);
        }
        self.data_watches.retain(|_, s| !s.is_empty());
        self.child_watches.retain(|_, s| !s.is_empty());
    }

    pub fn create(
        &mut self,
        caller: &Caller<'_>,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
        fires: &mut Vec<Fire>,
    ) -> Result<String, ReturnCode> {
        if acl.is_empty() {
            return Err(ReturnCode::InvalidAcl);
        }
        if path == "/" {
            return Err(ReturnCode::NodeExists);
        }
        let parent_path = parent_of(path).to_string();
        let parent = self.nodes.get(&parent_path).ok_or(ReturnCode::NoNode)?;
        if !caller.permits(&parent.acl, perms::CREATE) {
            return Err(ReturnCode::NoAuth);
        }
        if parent.stat.ephemeral_owner != 0 {
            return Err(ReturnCode::NoChildrenForEphemerals);
        }
        let actual = if mode.is_sequential() {
            format!("{}{:010}", path, parent.stat.cversion)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&actual) {
            return Err(ReturnCode::NodeExists);
        }

        let zxid = self.next_zxid();
        let now = now_ms();
        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            ctime: now,
            mtime: now,
            pzxid: zxid,
            ephemeral_owner: if mode.is_ephemeral() { caller.session } else { 0 },
            data_length: data.len() as i32,
            ..Stat::default()
        };
        self.nodes.insert(
            actual.clone(),
            Node {
                data: data.to_vec(),
                acl: acl.to_vec(),
                stat,
                children: BTreeSet::new(),
            },
        );
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.insert(name_of(&actual).to_string());
            parent.stat.cversion += 1;
            parent.stat.num_children += 1;
            parent.stat.pzxid = zxid;
        }

        self.trigger_data(&actual, Event::Created, fires);
        self.trigger_child(&parent_path, Event::Child, fires);
        Ok(actual)
    }

    pub fn remove(
        &mut self,
        caller: &Caller<'_>,
        path: &str,
        version: i32,
        fires: &mut Vec<Fire>,
    ) -> Result<(), ReturnCode> {
        if path == "/" {
            return Err(ReturnCode::BadArguments);
        }
        let parent_path = parent_of(path).to_string();
        let node = self.nodes.get(path).ok_or(ReturnCode::NoNode)?;
        if let Some(parent) = self.nodes.get(&parent_path) {
            if !caller.permits(&parent.acl, perms::DELETE) {
                return Err(ReturnCode::NoAuth);
            }
        }
        if !version_matches(version, node.stat.version) {
            return Err(ReturnCode::BadVersion);
        }
        if !node.children.is_empty() {
            return Err(ReturnCode::NotEmpty);
        }

        self.nodes.remove(path);
        let zxid = self.next_zxid();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.remove(name_of(path));
            parent.stat.cversion += 1;
            parent.stat.num_children -= 1;
            parent.stat.pzxid = zxid;
        }

        self.trigger_data(path, Event::Deleted, fires);
        self.trigger_child(path, Event::Deleted, fires);
        self.trigger_child(&parent_path, Event::Child, fires);
        Ok(())
    }

    pub fn set_data(
        &mut self,
        caller: &Caller<'_>,
        path: &str,
        data: &[u8],
        version: i32,
        fires: &mut Vec<Fire>,
    ) -> Result<Stat, ReturnCode> {
        let zxid = self.zxid + 1;
        let node = self.nodes.get_mut(path).ok_or(ReturnCode::NoNode)?;
        if !caller.permits(&node.acl, perms::WRITE) {
            return Err(ReturnCode::NoAuth);
        }
        if !version_matches(version, node.stat.version) {
            return Err(ReturnCode::BadVersion);
        }
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = now_ms();
        node.stat.data_length = data.len() as i32;
        let stat = node.stat;
        self.zxid = zxid;

        self.trigger_data(path, Event::Changed, fires);
        Ok(stat)
    }

    pub fn exists(&self, path: &str) -> Option<Stat> {
        self.nodes.get(path).map(|n| n.stat)
    }

    pub fn get_data(&self, caller: &Caller<'_>, path: &str) -> Result<(Vec<u8>, Stat), ReturnCode> {
        let node = self.nodes.get(path).ok_or(ReturnCode::NoNode)?;
        if !caller.permits(&node.acl, perms::READ) {
            return Err(ReturnCode::NoAuth);
        }
        Ok((node.data.clone(), node.stat))
    }

    pub fn get_children(
        &self,
        caller: &Caller<'_>,
        path: &str,
    ) -> Result<(Vec<String>, Stat), ReturnCode> {
        let node = self.nodes.get(path).ok_or(ReturnCode::NoNode)?;
        if !caller.permits(&node.acl, perms::READ) {
            return Err(ReturnCode::NoAuth);
        }
        Ok((node.children.iter().cloned().collect(), node.stat))
    }

    pub fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat), ReturnCode> {
        let node = self.nodes.get(path).ok_or(ReturnCode::NoNode)?;
        Ok((node.acl.clone(), node.stat))
    }

    pub fn set_acl(
        &mut self,
        caller: &Caller<'_>,
        path: &str,
        version: i32,
        acl: &[Acl],
    ) -> Result<(), ReturnCode> {
        if acl.is_empty() {
            return Err(ReturnCode::InvalidAcl);
        }
        let node = self.nodes.get_mut(path).ok_or(ReturnCode::NoNode)?;
        if !caller.permits(&node.acl, perms::ADMIN) {
            return Err(ReturnCode::NoAuth);
        }
        if !version_matches(version, node.stat.aversion) {
            return Err(ReturnCode::BadVersion);
        }
        node.acl = acl.to_vec();
        node.stat.aversion += 1;
        Ok(())
    }

    pub fn check(&self, path: &str, version: i32) -> Result<(), ReturnCode> {
        let node = self.nodes.get(path).ok_or(ReturnCode::NoNode)?;
        if !version_matches(version, node.stat.version) {
            return Err(ReturnCode::BadVersion);
        }
        Ok(())
    }

    /// Apply `ops` atomically. On failure the tree is unchanged and no
    /// notifications are produced.
    ///
    /// A failed multi still returns one result per op: `Ok` before the
    /// failing op, its code at it, `RuntimeInconsistency` after. Clients
    /// only receive the code; the server logs where it failed.
    pub fn multi(
        &mut self,
        caller: &Caller<'_>,
        ops: &[Op],
        fires: &mut Vec<Fire>,
    ) -> (ReturnCode, Vec<OpResult>) {
        let snapshot = self.clone();
        let mut pending = Vec::new();
        let mut results = Vec::with_capacity(ops.len());

        for (index, op) in ops.iter().enumerate() {
            let outcome = match op {
                Op::Create {
                    path,
                    data,
                    acl,
                    mode,
                } => self
                    .create(caller, path, data, acl, *mode, &mut pending)
                    .map(|path| OpResult::Create { path }),
                Op::Remove { path, version } => self
                    .remove(caller, path, *version, &mut pending)
                    .map(|_| OpResult::Remove),
                Op::SetData {
                    path,
                    data,
                    version,
                } => self
                    .set_data(caller, path, data, *version, &mut pending)
                    .map(|stat| OpResult::SetData { stat }),
                Op::Check { path, version } => {
                    self.check(path, *version).map(|_| OpResult::Check)
                }
            };
            match outcome {
                Ok(result) => results.push(result),
                Err(rc) => {
                    *self = snapshot;
                    let mut failed: Vec<OpResult> = (0..index)
                        .map(|_| OpResult::Error { rc: ReturnCode::Ok })
                        .collect();
                    failed.push(OpResult::Error { rc });
                    failed.extend((index + 1..ops.len()).map(|_| OpResult::Error {
                        rc: ReturnCode::RuntimeInconsistency,
                    }));
                    return (rc, failed);
                }
            }
        }
        fires.append(&mut pending);
        (ReturnCode::Ok, results)
    }

    /// Delete every ephemeral node owned by `session`.
    pub fn remove_ephemerals(&mut self, session: i64, fires: &mut Vec<Fire>) {
        let mut owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.stat.ephemeral_owner == session)
            .map(|(p, _)| p.clone())
            .collect();
        owned.sort();
        for path in owned {
            let parent_path = parent_of(&path).to_string();
            self.nodes.remove(&path);
            let zxid = self.next_zxid();
            if let Some(parent) = self.nodes.get_mut(&parent_path) {
                parent.children.remove(name_of(&path));
                parent.stat.cversion += 1;
                parent.stat.num_children -= 1;
                parent.stat.pzxid = zxid;
            }
            self.trigger_data(&path, Event::Deleted, fires);
            self.trigger_child(&path, Event::Deleted, fires);
            self.trigger_child(&parent_path, Event::Child, fires);
        }
    }
}
