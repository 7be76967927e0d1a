use std::fs::File;
use std::io;

/// Attempt to take an exclusive advisory lock on `file` without blocking.
///
/// Returns an error with kind `WouldBlock` when another process (or another
/// handle in this process) already holds a lock on the same file. The lock is
/// released when the file handle is closed.
#[cfg(unix)]
pub fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    // No advisory locking off unix; single-instance deployments only.
    Ok(())
}
