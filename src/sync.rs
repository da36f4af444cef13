use std::ffi::CString;
use std::fmt;
use std::ptr::NonNull;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc::{self, c_int, c_uint, sem_t};
use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};
use tracing::{debug, warn};

use crate::error::{Error, Result};

macro_rules! check_err {
    ($call:expr, $err:expr) => {
        if $call < 0 {
            return Err($err(Errno::last()));
        }
    };
}

/// Whether opening a [`NamedSemaphore`] brought the object into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Created,
    Joined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// A POSIX named counting semaphore shared by every process that opens the
/// same name.
///
/// The handle is closed on drop. Unless told otherwise with
/// [`NamedSemaphore::set_unlink_on_drop`], the name is removed as well, so the
/// object disappears once the last open handle is closed.
pub struct NamedSemaphore {
    name: String,
    sem: NonNull<sem_t>,
    creation: Creation,
    limit: u32,
    unlink_on_drop: bool,
}

// POSIX semaphores may be used from any thread.
unsafe impl Send for NamedSemaphore {}

impl NamedSemaphore {
    /// Creates the semaphore with a count of zero, or joins it if the name is
    /// already taken. `limit` caps the count reachable through [`post`].
    ///
    /// [`post`]: NamedSemaphore::post
    pub fn open(name: &str, limit: u32) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| Error::InvalidName {
            name: name.to_string(),
            reason: "contains a NUL byte",
        })?;
        let open_err = |source| Error::SemaphoreOpen {
            name: name.to_string(),
            source,
        };

        loop {
            // O_EXCL makes creation atomic, so exactly one opener sees Created.
            let sem = unsafe {
                libc::sem_open(
                    c_name.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL,
                    0o600 as c_uint,
                    0 as c_uint,
                )
            };
            if let Some(sem) = NonNull::new(sem).filter(|_| sem != libc::SEM_FAILED) {
                return Ok(Self::from_raw(name, sem, Creation::Created, limit));
            }
            match Errno::last() {
                Errno::EEXIST => (),
                errno => return Err(open_err(errno)),
            }

            let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
            if let Some(sem) = NonNull::new(sem).filter(|_| sem != libc::SEM_FAILED) {
                return Ok(Self::from_raw(name, sem, Creation::Joined, limit));
            }
            match Errno::last() {
                // Unlinked between the two calls; try to create it again.
                Errno::ENOENT => continue,
                errno => return Err(open_err(errno)),
            }
        }
    }

    fn from_raw(name: &str, sem: NonNull<sem_t>, creation: Creation, limit: u32) -> Self {
        debug!(name, ?creation, "opened semaphore");
        NamedSemaphore {
            name: name.to_string(),
            sem,
            creation,
            limit,
            unlink_on_drop: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn creation(&self) -> Creation {
        self.creation
    }

    pub fn set_unlink_on_drop(&mut self, unlink: bool) {
        self.unlink_on_drop = unlink;
    }

    /// Increments the count by one.
    pub fn post(&self) -> Result<()> {
        debug!(name = %self.name, "signaling semaphore");
        if self.value()? >= self.limit {
            return Err(Error::SemaphoreOverflow {
                name: self.name.clone(),
                limit: self.limit,
            });
        }
        check_err!(unsafe { libc::sem_post(self.sem.as_ptr()) }, |source| {
            Error::SemaphorePost {
                name: self.name.clone(),
                source,
            }
        });
        Ok(())
    }

    /// Decrements the count, blocking while it is zero.
    ///
    /// `None` waits forever, `Some(Duration::ZERO)` only polls.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        debug!(name = %self.name, ?timeout, "waiting for semaphore");
        let outcome = match timeout {
            None => self.wait_forever()?,
            Some(timeout) if timeout.is_zero() => self.try_wait()?,
            Some(timeout) => self.wait_until(timeout)?,
        };
        debug!(name = %self.name, ?outcome, "semaphore wait finished");
        Ok(outcome)
    }

    fn wait_forever(&self) -> Result<WaitOutcome> {
        loop {
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(WaitOutcome::Signaled);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(self.wait_err(errno)),
            }
        }
    }

    fn try_wait(&self) -> Result<WaitOutcome> {
        loop {
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(WaitOutcome::Signaled);
            }
            match Errno::last() {
                Errno::EAGAIN => return Ok(WaitOutcome::TimedOut),
                Errno::EINTR => continue,
                errno => return Err(self.wait_err(errno)),
            }
        }
    }

    fn wait_until(&self, timeout: Duration) -> Result<WaitOutcome> {
        // sem_timedwait takes an absolute CLOCK_REALTIME deadline.
        let now = clock_gettime(ClockId::CLOCK_REALTIME).map_err(|errno| self.wait_err(errno))?;
        let deadline = now + TimeSpec::from(timeout);
        loop {
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), deadline.as_ref()) } == 0 {
                return Ok(WaitOutcome::Signaled);
            }
            match Errno::last() {
                Errno::ETIMEDOUT => return Ok(WaitOutcome::TimedOut),
                Errno::EINTR => continue,
                errno => return Err(self.wait_err(errno)),
            }
        }
    }

    /// Current count. Only a snapshot: the peer may change it at any moment.
    pub fn value(&self) -> Result<u32> {
        let mut value: c_int = 0;
        check_err!(
            unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) },
            |source| Error::SemaphoreWait {
                name: self.name.clone(),
                source,
            }
        );
        // Linux reports 0 rather than a negative count when there are waiters.
        Ok(value.max(0) as u32)
    }

    fn wait_err(&self, source: Errno) -> Error {
        Error::SemaphoreWait {
            name: self.name.clone(),
            source,
        }
    }
}

/// Removes a semaphore name without opening it. A missing name is not an
/// error.
pub fn unlink_semaphore(name: &str) -> Result<()> {
    let c_name = CString::new(name).map_err(|_| Error::InvalidName {
        name: name.to_string(),
        reason: "contains a NUL byte",
    })?;
    if unsafe { libc::sem_unlink(c_name.as_ptr()) } < 0 {
        match Errno::last() {
            Errno::ENOENT => (),
            source => {
                return Err(Error::SemaphoreOpen {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }
    Ok(())
}

impl fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .field("creation", &self.creation)
            .field("limit", &self.limit)
            .finish()
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        debug!(name = %self.name, "closing semaphore");
        if unsafe { libc::sem_close(self.sem.as_ptr()) } < 0 {
            warn!(name = %self.name, errno = %Errno::last(), "failed to close semaphore");
        }
        if self.unlink_on_drop {
            if let Err(e) = unlink_semaphore(&self.name) {
                warn!(error = %e, "failed to unlink semaphore");
            }
        }
    }
}
