//! User callback traits
//!
//! One trait per result shape. Callbacks run on the completion thread
//! (watchers run on the I/O thread) and must not block for long.
//!
//! On a non-success result code only `rc` and `path` carry meaning: value
//! strings and collections are empty and stats are `None`.
//!
//! Closures with the matching signature implement each trait:
//!
//! ```rust,ignore
//! let cb: Arc<dyn VoidCallback> = Arc::new(|rc: ReturnCode, path: &str| {
//!     println!("{path}: {rc}");
//! });
//! ```

use zkmt_core::{Acl, OpResult, ReturnCode, Stat};

/// Completion for create: `value` is the name of the created node.
pub trait StringCallback: Send + Sync {
    fn process_result(&self, rc: ReturnCode, path: &str, value: &str);
}

/// Completion for remove, sync and set_acl.
pub trait VoidCallback: Send + Sync {
    fn process_result(&self, rc: ReturnCode, path: &str);
}

/// Completion for exists and set.
pub trait StatCallback: Send + Sync {
    fn process_result(&self, rc: ReturnCode, path: &str, stat: Option<&Stat>);
}

/// Completion for get.
pub trait GetCallback: Send + Sync {
    fn process_result(&self, rc: ReturnCode, path: &str, data: &[u8], stat: Option<&Stat>);
}

pub trait ChildrenCallback: Send + Sync {
    fn process_result(&self, rc: ReturnCode, path: &str, children: &[String], stat: Option<&Stat>);
}

pub trait AclCallback: Send + Sync {
    fn process_result(&self, rc: ReturnCode, path: &str, acl: &[Acl], stat: Option<&Stat>);
}

/// Completion for add_auth: receives the scheme and credential it was
/// submitted with.
pub trait AuthCallback: Send + Sync {
    fn process_result(&self, rc: ReturnCode, scheme: &str, cert: &str);
}

pub trait MultiCallback: Send + Sync {
    fn process_result(&self, rc: ReturnCode, results: &[OpResult]);
}

impl<F> StringCallback for F
where
    F: Fn(ReturnCode, &str, &str) + Send + Sync,
{
    fn process_result(&self, rc: ReturnCode, path: &str, value: &str) {
        self(rc, path, value)
    }
}

impl<F> VoidCallback for F
where
    F: Fn(ReturnCode, &str) + Send + Sync,
{
    fn process_result(&self, rc: ReturnCode, path: &str) {
        self(rc, path)
    }
}

impl<F> StatCallback for F
where
    F: Fn(ReturnCode, &str, Option<&Stat>) + Send + Sync,
{
    fn process_result(&self, rc: ReturnCode, path: &str, stat: Option<&Stat>) {
        self(rc, path, stat)
    }
}

impl<F> GetCallback for F
where
    F: Fn(ReturnCode, &str, &[u8], Option<&Stat>) + Send + Sync,
{
    fn process_result(&self, rc: ReturnCode, path: &str, data: &[u8], stat: Option<&Stat>) {
        self(rc, path, data, stat)
    }
}

impl<F> ChildrenCallback for F
where
    F: Fn(ReturnCode, &str, &[String], Option<&Stat>) + Send + Sync,
{
    fn process_result(&self, rc: ReturnCode, path: &str, children: &[String], stat: Option<&Stat>) {
        self(rc, path, children, stat)
    }
}

impl<F> AclCallback for F
where
    F: Fn(ReturnCode, &str, &[Acl], Option<&Stat>) + Send + Sync,
{
    fn process_result(&self, rc: ReturnCode, path: &str, acl: &[Acl], stat: Option<&Stat>) {
        self(rc, path, acl, stat)
    }
}

impl<F> AuthCallback for F
where
    F: Fn(ReturnCode, &str, &str) + Send + Sync,
{
    fn process_result(&self, rc: ReturnCode, scheme: &str, cert: &str) {
        self(rc, scheme, cert)
    }
}

impl<F> MultiCallback for F
where
    F: Fn(ReturnCode, &[OpResult]) + Send + Sync,
{
    fn process_result(&self, rc: ReturnCode, results: &[OpResult]) {
        self(rc, results)
    }
}
