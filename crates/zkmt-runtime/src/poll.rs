//! Readiness wait for the I/O thread
//!
//! One `poll(2)` over the wakeup channel and, when the engine has one, the
//! session socket.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::engine::{Interest, IoEvents};

/// Result of one wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Wakeup channel is readable and should be drained
    pub wakeup: bool,
    /// Readiness of the session socket
    pub events: IoEvents,
}

fn millis(timeout: Duration) -> libc::c_int {
    timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
}

/// Block until the wakeup channel or the engine's socket is ready, or
/// `timeout` elapses. An interrupted wait reports nothing ready.
pub fn wait_ready(wakeup_fd: RawFd, interest: &Interest, timeout: Duration) -> io::Result<Readiness> {
    let mut fds = [
        libc::pollfd {
            fd: wakeup_fd,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: -1,
            events: 0,
            revents: 0,
        },
    ];
    let mut nfds: libc::nfds_t = 1;
    if let Some(fd) = interest.fd {
        let mut events = 0;
        if interest.events.read {
            events |= libc::POLLIN;
        }
        if interest.events.write {
            events |= libc::POLLOUT;
        }
        fds[1] = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        nfds = 2;
    }

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds, millis(timeout)) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Readiness::default());
        }
        return Err(err);
    }

    let mut ready = Readiness {
        wakeup: fds[0].revents & libc::POLLIN != 0,
        events: IoEvents::NONE,
    };
    if nfds == 2 {
        let revents = fds[1].revents;
        // errors and hangups surface through the engine's next read
        ready.events.read = revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0;
        ready.events.write = revents & libc::POLLOUT != 0;
    }
    Ok(ready)
}
