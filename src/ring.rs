use std::ptr::NonNull;
use std::time::Duration;

use shm_derive::FromShm;
use tracing::{debug, info};

use crate::block::{Block, BLOCK_NUM};
use crate::channel::{Channel, Side};
use crate::error::Result;
use crate::names::ChannelNames;
use crate::shm::{FromShm, Shm};
use crate::sync::NamedSemaphore;

/// Layout of the shared segment.
///
/// `next_read` is only ever written by the reader's channel and
/// `next_write` only by the writer's, so the cursors need no
/// synchronization of their own. Slot ownership is handed over exclusively
/// through the two flow-control semaphores.
#[derive(FromShm)]
#[repr(C)]
pub struct RingSegment {
    pub(crate) next_read: usize,
    pub(crate) next_write: usize,
    pub(crate) blocks: [Block; BLOCK_NUM],
}

impl RingSegment {
    fn construct(&mut self) {
        self.next_read = 0;
        self.next_write = 0;
        for (id, block) in self.blocks.iter_mut().enumerate() {
            block.reset(id);
        }
    }
}

/// The shared ring buffer plus the two flow-control semaphores guarding it.
///
/// `emptyBlocks` counts slots the reader may fill, `blocksToWrite` counts
/// filled slots the writer may drain.
pub struct DataTransfer {
    names: ChannelNames,
    side: Side,
    segment: NonNull<RingSegment>,
    empty_blocks: NamedSemaphore,
    blocks_to_write: NamedSemaphore,
    // Declared last so the mapping outlives any use through `segment`.
    shm: Shm,
    block_timeout: Duration,
}

impl DataTransfer {
    /// Maps the ring named after `names` and opens its semaphores.
    ///
    /// The reader constructs the segment contents. The writer maps whatever
    /// is there and never writes to it until it has been handed a slot:
    /// re-initializing on join would clobber blocks already in flight.
    pub fn open(names: &ChannelNames, side: Side, block_timeout: Duration) -> Result<Self> {
        let mut shm = Shm::create_or_open(&names.ring(), size_of::<RingSegment>())?;
        let view = RingSegment::from_shm_mut(&mut shm)?;
        if side == Side::Reader {
            view.construct();
            debug!(name = %names.ring(), "constructed ring segment");
        }
        let segment = NonNull::from(view);

        let limit = BLOCK_NUM as u32;
        let empty_blocks = NamedSemaphore::open(&names.empty_blocks(), limit)?;
        let blocks_to_write = NamedSemaphore::open(&names.blocks_to_write(), limit)?;

        Ok(DataTransfer {
            names: names.clone(),
            side,
            segment,
            empty_blocks,
            blocks_to_write,
            shm,
            block_timeout,
        })
    }

    pub fn names(&self) -> &ChannelNames {
        &self.names
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Marks every slot empty and hands all of them to the reader.
    ///
    /// Call exactly once, from the reader, before the first acquire. This is
    /// what lets the reader fill the whole ring before a writer attaches.
    pub fn init_reading(&mut self) -> Result<()> {
        assert_eq!(self.side, Side::Reader, "only the reader initializes the ring");
        for id in 0..BLOCK_NUM {
            // The writer has no token yet, so nobody else touches the slots.
            let block = unsafe { &mut *(&raw mut (*self.segment.as_ptr()).blocks[id]) };
            block.set_len(0);
            block.set_error(false);
            self.empty_blocks.post()?;
        }
        info!(channel = %self.names.channel(), slots = BLOCK_NUM, "ring ready for reading");
        Ok(())
    }

    /// Producer view: takes slots from `emptyBlocks`, hands them to
    /// `blocksToWrite`.
    pub fn reader(&mut self) -> Channel<'_> {
        Channel::new(
            self.segment,
            Side::Reader,
            &self.empty_blocks,
            &self.blocks_to_write,
            self.block_timeout,
        )
    }

    /// Consumer view: takes slots from `blocksToWrite`, hands them back to
    /// `emptyBlocks`.
    pub fn writer(&mut self) -> Channel<'_> {
        Channel::new(
            self.segment,
            Side::Writer,
            &self.blocks_to_write,
            &self.empty_blocks,
            self.block_timeout,
        )
    }

    /// Keeps the segment and semaphore names alive after this handle is
    /// dropped. The reader calls this once the writer has attached, since
    /// the writer always finishes last and removes them.
    pub fn leave_cleanup_to_writer(&mut self) {
        self.empty_blocks.set_unlink_on_drop(false);
        self.blocks_to_write.set_unlink_on_drop(false);
        self.shm.set_unlink_on_drop(false);
        debug!(channel = %self.names.channel(), "ring names left to the writer");
    }

    /// Snapshot of `(emptyBlocks, blocksToWrite)` token counts.
    pub fn tokens(&self) -> Result<(u32, u32)> {
        Ok((self.empty_blocks.value()?, self.blocks_to_write.value()?))
    }

    /// Snapshot of `(next_read, next_write)`.
    pub fn cursors(&self) -> (usize, usize) {
        let ptr = self.segment.as_ptr();
        unsafe { ((&raw const (*ptr).next_read).read(), (&raw const (*ptr).next_write).read()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::ArbiterScope;

    fn names(tag: &str) -> ChannelNames {
        let channel = format!("test-ring-{}-{}", tag, std::process::id());
        ChannelNames::new(&channel, ArbiterScope::Channel).unwrap()
    }

    #[test]
    fn init_reading_hands_every_slot_to_reader() {
        let names = names("init");
        let mut ring = DataTransfer::open(&names, Side::Reader, Duration::from_millis(50)).unwrap();
        assert_eq!(ring.tokens().unwrap(), (0, 0));
        ring.init_reading().unwrap();
        assert_eq!(ring.tokens().unwrap(), (BLOCK_NUM as u32, 0));
    }

    #[test]
    fn writer_attach_does_not_reinitialize() {
        let names = names("attach");
        let mut reader = DataTransfer::open(&names, Side::Reader, Duration::from_millis(50)).unwrap();
        reader.init_reading().unwrap();
        {
            let mut channel = reader.reader();
            let mut slot = channel.acquire_slot().unwrap();
            slot.buf_mut()[..3].copy_from_slice(b"abc");
            slot.set_len(3);
            slot.release().unwrap();
        }
        assert_eq!(reader.cursors(), (1, 0));

        let mut writer = DataTransfer::open(&names, Side::Writer, Duration::from_millis(50)).unwrap();
        assert_eq!(writer.cursors(), (1, 0));
        let mut channel = writer.writer();
        let slot = channel.acquire_slot().unwrap();
        assert_eq!(slot.id(), 1);
        assert_eq!(slot.data(), b"abc");
    }

    #[test]
    fn reader_can_leave_names_to_writer() {
        let names = names("handover");
        let mut reader = DataTransfer::open(&names, Side::Reader, Duration::from_millis(50)).unwrap();
        let writer = DataTransfer::open(&names, Side::Writer, Duration::from_millis(50)).unwrap();
        reader.init_reading().unwrap();
        reader.leave_cleanup_to_writer();
        drop(reader);

        // Joining again finds the same semaphores, not fresh ones.
        let late = DataTransfer::open(&names, Side::Writer, Duration::from_millis(50)).unwrap();
        assert_eq!(late.tokens().unwrap(), (BLOCK_NUM as u32, 0));
        drop(late);
        drop(writer);

        let fresh = DataTransfer::open(&names, Side::Writer, Duration::from_millis(50)).unwrap();
        assert_eq!(fresh.tokens().unwrap(), (0, 0));
    }

    #[test]
    fn each_cursor_moves_only_on_its_own_side() {
        let names = names("cursor");
        let mut reader = DataTransfer::open(&names, Side::Reader, Duration::from_millis(50)).unwrap();
        let mut writer = DataTransfer::open(&names, Side::Writer, Duration::from_millis(50)).unwrap();
        reader.init_reading().unwrap();

        for expected in [1, 2, 0] {
            let mut channel = reader.reader();
            let mut slot = channel.acquire_slot().unwrap();
            assert_eq!(slot.id(), expected);
            slot.set_len(0);
            slot.release().unwrap();
            assert_eq!(writer.cursors().1, 0);
        }
        assert_eq!(reader.tokens().unwrap(), (0, BLOCK_NUM as u32));

        let mut channel = writer.writer();
        channel.acquire_slot().unwrap().release().unwrap();
        assert_eq!(reader.cursors(), (0, 1));
    }
}
