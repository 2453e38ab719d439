//! Self-pipe wakeup for non-Linux Unix
//!
//! Both ends are nonblocking. A full pipe on `wake()` means a wake is
//! already pending.

use super::Wakeup;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::io::RawFd;

pub struct PipeWakeup {
    read_end: OwnedFd,
    write_end: OwnedFd,
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

impl PipeWakeup {
    pub fn create() -> io::Result<Self> {
        let (read_end, write_end) = nix::unistd::pipe()?;
        set_nonblocking(read_end.as_raw_fd())?;
        set_nonblocking(write_end.as_raw_fd())?;
        Ok(Self { read_end, write_end })
    }
}

impl Wakeup for PipeWakeup {
    fn wake(&self) -> io::Result<()> {
        let byte = 0u8;
        let ret = unsafe {
            libc::write(
                self.write_end.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(errno.into());
        }
        Ok(())
    }

    fn drain(&self) {
        let mut buf = [0u8; 128];
        loop {
            let ret = unsafe {
                libc::read(
                    self.read_end.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if ret <= 0 {
                break;
            }
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        self.read_end.as_raw_fd()
    }
}
