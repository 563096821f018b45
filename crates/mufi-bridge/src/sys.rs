//! Thin wrappers over the libc descriptor calls used by capture and sessions.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Create an anonymous pipe as `(read, write)`, both ends close-on-exec.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1, -1];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // Safety: pipe(2) succeeded, so both descriptors are open and owned by us.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Duplicate one of the process's standard descriptors into an owned handle.
pub(crate) fn dup_std(target: RawFd) -> io::Result<OwnedFd> {
    // Safety: the standard descriptors stay open for the life of the process.
    unsafe { BorrowedFd::borrow_raw(target) }.try_clone_to_owned()
}

/// Point `target` at the same open file as `source`.
pub(crate) fn dup2(source: RawFd, target: RawFd) -> io::Result<()> {
    loop {
        if unsafe { libc::dup2(source, target) } >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Flush Rust's and the C runtime's buffered standard streams.
pub(crate) fn flush_std() {
    use std::io::Write;

    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    // Null flushes every open C stdio stream.
    unsafe {
        libc::fflush(std::ptr::null_mut());
    }
}
