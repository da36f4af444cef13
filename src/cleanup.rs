//! Removal of a channel's named objects when the process is interrupted.
//!
//! Handles are normally released by `Drop`, which does not run when SIGINT
//! or SIGTERM ends the process. Without this, an interrupted reader would
//! leave its arbiter token and filled blocks behind for the next process on
//! the channel to pick up.

use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::names::ChannelNames;
use crate::shm::unlink_shm;
use crate::sync::unlink_semaphore;

/// Exit status after an interrupt, as shells report for SIGINT.
pub const INTERRUPTED: i32 = 130;

static PARTICIPANT: OnceLock<ChannelNames> = OnceLock::new();

/// Installs the SIGINT/SIGTERM handler. Call once, early in `main`.
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        warn!("interrupted, shutting down");
        if let Some(names) = PARTICIPANT.get() {
            unlink_all(names);
        }
        std::process::exit(INTERRUPTED);
    })
    .map_err(|source| Error::SignalHandler { source })
}

/// Marks this process as a reader or writer of `names`, so an interrupt
/// removes them. Processes that exit at arbitration never register.
pub(crate) fn register_participant(names: &ChannelNames) {
    if PARTICIPANT.set(names.clone()).is_err() {
        debug!("participant already registered");
    }
}

/// Removes every name derived for the channel. Open handles elsewhere stay
/// valid; only later opens are affected.
pub fn unlink_all(names: &ChannelNames) {
    let semaphores = [
        names.role(),
        names.empty_blocks(),
        names.blocks_to_write(),
        names.finisher(),
    ];
    for name in semaphores {
        if let Err(e) = unlink_semaphore(&name) {
            warn!(error = %e, "failed to unlink semaphore");
        }
    }
    if let Err(e) = unlink_shm(&names.ring()) {
        warn!(error = %e, "failed to unlink shared memory");
    }
    debug!(channel = %names.channel(), "channel names removed");
}
