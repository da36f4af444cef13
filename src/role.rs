use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::names::ChannelNames;
use crate::sync::{Creation, NamedSemaphore, WaitOutcome};

/// Arbiter tokens never exceed one; the cap is incidental.
const ARBITER_LIMIT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Streams the input file into the ring.
    Reader,
    /// Drains the ring into the output file.
    Writer,
    /// Superfluous process; must not touch the transfer.
    Exit,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Reader => f.write_str("reader"),
            Role::Writer => f.write_str("writer"),
            Role::Exit => f.write_str("exit"),
        }
    }
}

/// Assigns each starting process one [`Role`].
///
/// The first process to create the arbiter semaphore is the reader and
/// leaves exactly one token behind. The process that takes that token within
/// the timeout is the writer; everyone else exits.
///
/// Keep the arbiter alive for the whole run: dropping it as a participant
/// removes the arbiter name.
#[derive(Debug)]
pub struct RoleArbiter {
    semaphore: NamedSemaphore,
    role: Role,
}

impl RoleArbiter {
    pub fn determine(names: &ChannelNames, timeout: Duration) -> Result<Self> {
        let mut semaphore = NamedSemaphore::open(&names.role(), ARBITER_LIMIT)?;
        let role = match semaphore.creation() {
            Creation::Created => {
                semaphore.post()?;
                Role::Reader
            }
            Creation::Joined => match semaphore.wait(Some(timeout)) {
                Ok(WaitOutcome::Signaled) => Role::Writer,
                Ok(WaitOutcome::TimedOut) => Role::Exit,
                Err(e @ Error::SemaphoreWait { .. }) => {
                    warn!(error = %e, "arbiter wait failed, treating process as superfluous");
                    Role::Exit
                }
                Err(e) => return Err(e),
            },
        };
        if role == Role::Exit {
            // Not a participant: the name belongs to the reader and writer.
            semaphore.set_unlink_on_drop(false);
        }
        debug!(name = %semaphore.name(), creation = ?semaphore.creation(), "arbitration finished");
        info!(%role, "role assigned");
        Ok(RoleArbiter { semaphore, role })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Keeps the arbiter name after this handle is dropped.
    ///
    /// A reader whose writer has attached calls this: the writer may still
    /// be draining, and a process arriving meanwhile must find the arbiter
    /// empty and exit rather than start a new transfer.
    pub fn leave_cleanup_to_writer(&mut self) {
        self.semaphore.set_unlink_on_drop(false);
    }

    pub fn arbiter_name(&self) -> &str {
        self.semaphore.name()
    }
}
