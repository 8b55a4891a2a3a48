//! Advisory file locking and bounded sentinel spin-waits.
//!
//! The engine has no in-process concurrency of its own: every coordination
//! point is a `flock(2)` advisory lock, a marker file, or an atomic rename,
//! because callers may run many independent processes against the same
//! topic directory (§5). This module centralizes the two primitives every
//! other component builds on: an RAII exclusive-lock guard, and a retry
//! loop with a named backoff schedule for polling a sentinel file.

use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use crate::error::{Error, Result};

/// Holds an exclusive advisory lock for the guard's lifetime.
///
/// Stores the raw fd rather than borrowing the `File`, so a caller can
/// still seek/read/write through the same (still-open) `File` while the
/// lock is held — `flock`'s only requirement is that the fd stay open,
/// not that Rust's borrow checker see a live reference to it. Unlocks on
/// drop so every early-return error path releases the lock without an
/// explicit `unlock` call at each `?`.
pub struct ExclusiveLock {
    fd: RawFd,
}

impl ExclusiveLock {
    /// Block until an exclusive lock on `file` is acquired.
    pub fn acquire(file: &File) -> Result<Self> {
        let fd = file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(Self { fd })
    }

    /// Try to acquire an exclusive lock without blocking.
    ///
    /// Returns `Ok(None)` if another process already holds it.
    pub fn try_acquire(file: &File) -> Result<Option<Self>> {
        let fd = file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(Self { fd }));
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        Err(Error::Io(err))
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.fd, libc::LOCK_UN);
        }
    }
}

/// Poll `is_present(path)` up to `attempts` times, sleeping `interval`
/// between polls, clearing any stat cache the platform might keep.
/// Returns `Ok(())` once `is_present` reports `false`, or `CreateFailed`
/// once the retry budget is exhausted.
///
/// Used for the `lock` sentinel (segment saturation, 500 × 10ms) and the
/// rollover retry loop (100 × 10ms); a bounded loop rather than recursion
/// per the REDESIGN FLAGS, so retry budgets can never grow the stack.
pub fn spin_wait_absent(path: &Path, attempts: u32, interval: Duration, what: &'static str) -> Result<()> {
    for _ in 0..attempts {
        if !path.exists() {
            return Ok(());
        }
        sleep(interval);
    }
    if path.exists() {
        Err(Error::CreateFailed(what))
    } else {
        Ok(())
    }
}

/// Exponential backoff wait for a sentinel to disappear: starts at
/// `start` and doubles `doublings` times, capping at whatever that
/// reaches (1µs → 8192µs over 14 doublings for the delay-rebuild barrier).
pub fn exponential_wait_absent(
    path: &Path,
    start: Duration,
    doublings: u32,
    what: &'static str,
) -> Result<()> {
    let mut delay = start;
    for _ in 0..=doublings {
        if !path.exists() {
            return Ok(());
        }
        sleep(delay);
        delay *= 2;
    }
    if path.exists() {
        Err(Error::CreateFailed(what))
    } else {
        Ok(())
    }
}

/// Run `attempt` up to `retries` times, retrying only on `Error::Io`, and
/// sleeping `interval` between attempts. Used for the bounded write-retry
/// (100×) and read-retry (500× at 1ms) disciplines in §7.
pub fn retry_io<T>(
    retries: u32,
    interval: Duration,
    mut attempt: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut last_err = None;
    for _ in 0..retries {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(Error::Io(err)) => {
                last_err = Some(err);
                sleep(interval);
            }
            Err(other) => return Err(other),
        }
    }
    Err(Error::Io(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "retry budget exhausted")
    })))
}
