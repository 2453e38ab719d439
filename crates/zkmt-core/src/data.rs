//! Node metadata, ACLs and multi-op descriptions.
//!
//! These are plain owned values. Completions copy them out of engine
//! buffers before user callbacks run.

/// Node metadata returned with most read and write replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// Zxid of the change that created the node
    pub czxid: i64,
    /// Zxid of the last data change
    pub mzxid: i64,
    /// Creation time, ms since epoch
    pub ctime: i64,
    /// Last modification time, ms since epoch
    pub mtime: i64,
    /// Data version
    pub version: i32,
    /// Child list version
    pub cversion: i32,
    /// ACL version
    pub aversion: i32,
    /// Owning session id for ephemeral nodes, 0 otherwise
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    /// Zxid of the last child list change
    pub pzxid: i64,
}

/// Permission bits carried by an [`Acl`].
pub mod perms {
    pub const READ: i32 = 1 << 0;
    pub const WRITE: i32 = 1 << 1;
    pub const CREATE: i32 = 1 << 2;
    pub const DELETE: i32 = 1 << 3;
    pub const ADMIN: i32 = 1 << 4;
    pub const ALL: i32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

/// Authentication identity: a scheme and an id within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id {
    pub scheme: String,
    pub id: String,
}

impl Id {
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// The `world:anyone` identity.
    pub fn anyone() -> Self {
        Self::new("world", "anyone")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acl {
    pub perms: i32,
    pub id: Id,
}

impl Acl {
    pub fn new(perms: i32, id: Id) -> Self {
        Self { perms, id }
    }

    /// Completely open ACL.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::new(perms::ALL, Id::anyone())]
    }

    /// World-readable ACL.
    pub fn read_unsafe() -> Vec<Acl> {
        vec![Acl::new(perms::READ, Id::anyone())]
    }

    #[inline]
    pub fn allows(&self, perm: i32) -> bool {
        self.perms & perm == perm
    }
}

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    #[default]
    Persistent,
    /// Removed when the creating session ends
    Ephemeral,
    /// Persistent, with a monotonically increasing suffix appended
    PersistentSequential,
    /// Ephemeral, with a monotonically increasing suffix appended
    EphemeralSequential,
}

impl CreateMode {
    #[inline]
    pub const fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    #[inline]
    pub const fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// One operation inside a multi-op transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
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
    SetData {
        path: String,
        data: Vec<u8>,
        version: i32,
    },
    /// Succeeds only if the node's version matches
    Check {
        path: String,
        version: i32,
    },
}

impl Op {
    pub fn path(&self) -> &str {
        match self {
            Op::Create { path, .. }
            | Op::Remove { path, .. }
            | Op::SetData { path, .. }
            | Op::Check { path, .. } => path,
        }
    }
}

/// Per-operation outcome of a multi-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// Carries the path actually created (sequential suffix included)
    Create { path: String },
    Remove,
    SetData { stat: Stat },
    Check,
    /// This operation failed or was rolled back
    Error { rc: crate::error::ReturnCode },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acl_perms() {
        let acl = Acl::open_unsafe();
        assert!(acl[0].allows(perms::READ | perms::WRITE));
        let ro = Acl::read_unsafe();
        assert!(ro[0].allows(perms::READ));
        assert!(!ro[0].allows(perms::WRITE));
    }

    #[test]
    fn test_create_mode_flags() {
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
    }

    #[test]
    fn test_op_path() {
        let op = Op::Check {
            path: "/a".into(),
            version: 1,
        };
        assert_eq!(op.path(), "/a");
    }
}
