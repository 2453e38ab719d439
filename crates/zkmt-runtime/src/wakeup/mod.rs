//! Wakeup channel for the I/O thread
//!
//! The I/O thread blocks on readiness of the session socket and this
//! channel. Any thread can write to it to force the I/O thread to
//! re-evaluate interest, e.g. after queueing outbound requests or on close.
//! The I/O thread drains it after every wait.

use std::io;
use std::os::unix::io::RawFd;

pub trait Wakeup: Send + Sync {
    /// Interrupt a blocked readiness wait.
    ///
    /// Multiple wakes before a drain coalesce into one readable event.
    fn wake(&self) -> io::Result<()>;

    /// Consume all pending wake signals. Never blocks.
    fn drain(&self);

    /// Descriptor to poll for `POLLIN`
    fn as_raw_fd(&self) -> RawFd;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod eventfd_linux;
        pub use eventfd_linux::EventFdWakeup as PlatformWakeup;
    } else {
        mod pipe;
        pub use pipe::PipeWakeup as PlatformWakeup;
    }
}

/// Create a new platform-appropriate wakeup channel
pub fn new_wakeup() -> io::Result<Box<dyn Wakeup>> {
    Ok(Box::new(PlatformWakeup::create()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readable(fd: RawFd) -> bool {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
        rc == 1 && (pfd.revents & libc::POLLIN) != 0
    }

    #[test]
    fn test_wake_makes_readable() {
        let w = new_wakeup().unwrap();
        assert!(!readable(w.as_raw_fd()));
        w.wake().unwrap();
        assert!(readable(w.as_raw_fd()));
    }

    #[test]
    fn test_drain_clears_coalesced_wakes() {
        let w = new_wakeup().unwrap();
        for _ in 0..100 {
            w.wake().unwrap();
        }
        w.drain();
        assert!(!readable(w.as_raw_fd()));
        // draining an empty channel is harmless
        w.drain();
    }

    #[test]
    fn test_wake_from_other_thread() {
        let w: std::sync::Arc<dyn Wakeup> = std::sync::Arc::from(new_wakeup().unwrap());
        let w2 = w.clone();
        std::thread::spawn(move || w2.wake().unwrap()).join().unwrap();
        assert!(readable(w.as_raw_fd()));
    }
}
