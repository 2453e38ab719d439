//! Correlation ids
//!
//! Every request carries an xid that the protocol layer uses to match
//! responses to requests. Ids come from one process-wide counter.

use core::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Once;
use std::time::{SystemTime, UNIX_EPOCH};

/// Request correlation id
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Xid(i32);

impl Xid {
    #[inline]
    pub const fn new(raw: i32) -> Self {
        Xid(raw)
    }

    #[inline]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({})", self.0)
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static XID: AtomicI32 = AtomicI32::new(0);
static XID_SEED: Once = Once::new();

/// Seed the xid counter from wall-clock seconds.
///
/// Runs at most once per process. Callers racing with the first seed block
/// until it is done, so no id is handed out from an unseeded counter.
/// Session initialization calls this before any worker thread starts.
pub fn init_xid() {
    XID_SEED.call_once(|| {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i32)
            .unwrap_or(1);
        XID.store(seed, Ordering::SeqCst);
    });
}

/// Next correlation id.
///
/// Safe to call from any thread without further synchronization.
/// Wraps around on overflow.
#[inline]
pub fn next_xid() -> Xid {
    init_xid();
    Xid(XID.fetch_add(1, Ordering::SeqCst))
}
