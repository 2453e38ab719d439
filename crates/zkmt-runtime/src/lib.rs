//! # zkmt-runtime
//!
//! Multi-threaded adaptor for the zkmt client.
//!
//! A session runs two threads next to the application:
//!
//! - the **I/O thread** drives the session engine and delivers watch events
//! - the **completion thread** runs result callbacks in FIFO order
//!
//! ## Modules
//!
//! - `config` - Session configuration (defaults, env, builder)
//! - `callback` - Typed result callback traits
//! - `completion` - Completion contexts, reply decoding and dispatch
//! - `queue` - Completion queue between the two threads
//! - `watch` - Watchers, watch contexts and session-state updates
//! - `engine` - The session engine seam
//! - `wakeup` - Wakeup channel for the I/O thread (eventfd or self-pipe)
//! - `poll` - Readiness wait
//! - `session` - The session handle

pub mod config;
pub mod callback;
pub mod completion;
pub mod queue;
pub mod watch;
pub mod engine;
pub mod wakeup;
pub mod poll;
pub mod session;

mod adaptor;

#[cfg(test)]
mod testing;

pub use config::SessionConfig;
pub use callback::{
    AclCallback, AuthCallback, ChildrenCallback, GetCallback, MultiCallback, StatCallback,
    StringCallback, VoidCallback,
};
pub use completion::{CompletionContext, CompletionKind, CompletionRecord, Payload, Reply, Route};
pub use queue::CompletionQueue;
pub use watch::{DeletionPolicy, Delivery, UnknownState, WatchContext, Watcher};
pub use engine::{EngineSink, Interest, IoEvents, ProcessStatus, Request, RequestOp, SessionEngine};
pub use session::Session;
