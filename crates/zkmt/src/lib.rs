//! # zkmt - multi-threaded coordination-service client
//!
//! Asynchronous client for a hierarchical key/value coordination service.
//! Every session runs an I/O thread that drives the session engine and a
//! completion thread that runs result callbacks in submission order.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use zkmt::{Acl, CreateMode, MemoryServer, ReturnCode, SessionConfig, ZooKeeper};
//!
//! let server = MemoryServer::new();
//! let zk = ZooKeeper::connect(Box::new(server.connect()?), SessionConfig::from_env(), None)?;
//!
//! zk.create("/app", b"cfg", &Acl::open_unsafe(), CreateMode::Persistent,
//!     Some(Arc::new(|rc: ReturnCode, _: &str, name: &str| {
//!         println!("created {name}: {rc}");
//!     })))?;
//!
//! let (data, stat) = zk.get_sync("/app", None)?;
//! zk.close()?;
//! ```
//!
//! ## Threads
//!
//! ```text
//!   application threads ──submit──▶ engine ◀──process── I/O thread ──watchers
//!                                                         │
//!                                                  completion queue
//!                                                         │
//!                                                         ▼
//!                                                 completion thread ──callbacks
//! ```
//!
//! ## Crates
//!
//! - `zkmt-core` - result codes, states, node data, ids, counters, barrier
//! - `zkmt-runtime` - session handle, adaptor threads, routing, watches
//! - `zkmt` - this crate: client API, blocking adapter, in-memory engine

pub mod client;
pub mod memory;
pub mod sync_call;

pub use client::{ZooKeeper, ANY_VERSION};
pub use memory::{MemoryEngine, MemoryServer};
pub use sync_call::SyncCompletion;

pub use zkmt_core::{
    perms, validate_path, Acl, CreateMode, Event, Id, Op, OpResult, ReturnCode, Stat, State, Xid,
    ZkError, ZkResult,
};
pub use zkmt_runtime::{
    AclCallback, AuthCallback, ChildrenCallback, GetCallback, MultiCallback, Session,
    SessionConfig, SessionEngine, StatCallback, StringCallback, VoidCallback, Watcher,
};
