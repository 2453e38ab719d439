//! eventfd-backed wakeup (Linux)
//!
//! Coalescing: multiple `wake()` calls before the I/O thread reads the
//! eventfd result in a single readable event (eventfd counter semantics).

use super::Wakeup;
use nix::errno::Errno;
use std::io;
use std::os::unix::io::RawFd;

pub struct EventFdWakeup {
    fd: RawFd,
}

impl EventFdWakeup {
    /// Create a new nonblocking eventfd. Closed on drop.
    pub fn create() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(Errno::last().into());
        }
        Ok(Self { fd })
    }
}

impl Wakeup for EventFdWakeup {
    fn wake(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // counter would overflow, a wake is already pending
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(errno.into());
        }
        Ok(())
    }

    fn drain(&self) {
        // one read resets the counter to zero
        let mut val: u64 = 0;
        unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for EventFdWakeup {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}
