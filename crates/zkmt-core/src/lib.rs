//! # zkmt-core
//!
//! Core types for the zkmt multi-threaded coordination-service client.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The adaptor threads, completion routing and the session handle live in
//! `zkmt-runtime`.
//!
//! ## Modules
//!
//! - `error` - Result codes and submission errors
//! - `state` - Session state and watch event enums
//! - `data` - Node metadata, ACLs, multi-op descriptions
//! - `id` - Process-wide correlation id generator
//! - `refcount` - Lock-free reference counter
//! - `barrier` - N-party startup rendezvous

pub mod error;
pub mod state;
pub mod data;
pub mod id;
pub mod refcount;
pub mod barrier;

// Re-exports for convenience
pub use error::{ReturnCode, ZkError, ZkResult};
pub use state::{AtomicState, Event, State};
pub use data::{perms, Acl, CreateMode, Id, Op, OpResult, Stat};
pub use id::{init_xid, next_xid, Xid};
pub use refcount::{RefCounter, Release};
pub use barrier::StartupBarrier;

/// Validate a node path.
///
/// Paths are absolute, slash separated, with no empty or relative segments
/// and no trailing slash (except the root itself).
pub fn validate_path(path: &str) -> ZkResult<()> {
    if path.is_empty() {
        return Err(ZkError::BadArguments("path is empty"));
    }
    if !path.starts_with('/') {
        return Err(ZkError::BadArguments("path must start with '/'"));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(ZkError::BadArguments("path must not end with '/'"));
    }
    if path.contains('\0') {
        return Err(ZkError::BadArguments("path contains a null character"));
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(ZkError::BadArguments("path has an empty segment"));
        }
        if segment == "." || segment == ".." {
            return Err(ZkError::BadArguments("path has a relative segment"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a/b-c/d_1").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("a").is_err());
        assert!(validate_path("/a/").is_err());
        assert!(validate_path("/a//b").is_err());
        assert!(validate_path("/a/../b").is_err());
        assert!(validate_path("/a\0").is_err());
    }
}
