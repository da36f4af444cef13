use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::time::Duration;

use tracing::{debug, warn};

use crate::block::{Block, BLOCK_NUM};
use crate::error::{Error, Result};
use crate::ring::RingSegment;
use crate::sync::{NamedSemaphore, WaitOutcome};

/// Which end of the ring a [`Channel`] serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Reader,
    Writer,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Reader => f.write_str("reader"),
            Side::Writer => f.write_str("writer"),
        }
    }
}

/// One side's view of the shared ring.
///
/// Slots are taken from `incoming` and handed to the peer through
/// `outgoing`. Only one slot can be held at a time.
pub struct Channel<'a> {
    segment: NonNull<RingSegment>,
    side: Side,
    incoming: &'a NamedSemaphore,
    outgoing: &'a NamedSemaphore,
    timeout: Duration,
    _ring: PhantomData<&'a mut RingSegment>,
}

impl<'a> Channel<'a> {
    pub(crate) fn new(
        segment: NonNull<RingSegment>,
        side: Side,
        incoming: &'a NamedSemaphore,
        outgoing: &'a NamedSemaphore,
        timeout: Duration,
    ) -> Self {
        Channel {
            segment,
            side,
            incoming,
            outgoing,
            timeout,
            _ring: PhantomData,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Waits for the next slot handed over by the peer.
    ///
    /// A timeout means the peer is dead or stalled: under correct operation
    /// the only process able to supply a token will never do so. It is
    /// reported as [`Error::PeerTimeout`] and the cursor does not move.
    pub fn acquire_slot(&mut self) -> Result<Slot<'_>> {
        self.acquire_slot_with(|| Ok(false))
    }

    /// Like [`Channel::acquire_slot`], but on each timeout asks `keep_waiting`
    /// whether the silence is still expected, e.g. because the peer has not
    /// attached yet.
    pub fn acquire_slot_with<F>(&mut self, mut keep_waiting: F) -> Result<Slot<'_>>
    where
        F: FnMut() -> Result<bool>,
    {
        loop {
            match self.incoming.wait(Some(self.timeout))? {
                WaitOutcome::Signaled => break,
                WaitOutcome::TimedOut if keep_waiting()? => {
                    debug!(side = %self.side, "no slot yet, peer not attached, still waiting");
                }
                WaitOutcome::TimedOut => {
                    return Err(Error::PeerTimeout {
                        name: self.incoming.name().to_string(),
                        timeout: self.timeout,
                    })
                }
            }
        }

        let id = self.advance();
        // The token just taken grants exclusive use of slot `id` until it is
        // posted to `outgoing`.
        let block = unsafe { &mut *(&raw mut (*self.segment.as_ptr()).blocks[id]) };
        debug!(side = %self.side, block = id, "acquired slot");
        Ok(Slot {
            block,
            outgoing: self.outgoing,
            side: self.side,
            released: false,
        })
    }

    fn advance(&mut self) -> usize {
        let ring = self.segment.as_ptr();
        let cursor = unsafe {
            match self.side {
                Side::Reader => &mut *(&raw mut (*ring).next_read),
                Side::Writer => &mut *(&raw mut (*ring).next_write),
            }
        };
        *cursor = (*cursor + 1) % BLOCK_NUM;
        *cursor
    }
}

/// Exclusive access to one block until it is released to the peer.
///
/// Dropping a slot without releasing it flags the block as failed and hands
/// it over anyway, so the peer learns about the failure instead of waiting
/// for a token that never comes.
pub struct Slot<'c> {
    block: &'c mut Block,
    outgoing: &'c NamedSemaphore,
    side: Side,
    released: bool,
}

impl Slot<'_> {
    /// Hands the slot to the peer.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        debug!(side = %self.side, block = self.block.id(), len = self.block.len(), "releasing slot");
        self.outgoing.post()
    }

    /// Flags the slot as failed and hands it to the peer.
    pub fn abort(mut self) -> Result<()> {
        self.block.set_error(true);
        self.released = true;
        warn!(side = %self.side, block = self.block.id(), "handing failed slot to peer");
        self.outgoing.post()
    }
}

impl Deref for Slot<'_> {
    type Target = Block;
    fn deref(&self) -> &Block {
        self.block
    }
}

impl DerefMut for Slot<'_> {
    fn deref_mut(&mut self) -> &mut Block {
        self.block
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.block.set_error(true);
        warn!(side = %self.side, block = self.block.id(), "slot dropped unreleased, handing it over as failed");
        if let Err(e) = self.outgoing.post() {
            warn!(error = %e, "failed to hand over dropped slot");
        }
    }
}
