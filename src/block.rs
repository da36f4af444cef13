/// Capacity of one block in bytes.
pub const BLOCK_SIZE: usize = 1_000_000;

/// Number of block slots in the ring.
pub const BLOCK_NUM: usize = 3;

/// One transfer unit living in shared memory.
///
/// Only the side holding the token for this slot may touch it, so there is
/// no lock. Every field is valid for any bit pattern; `error` is a `u8`
/// rather than a `bool` for that reason.
#[repr(C)]
pub struct Block {
    id: usize,
    size: usize,
    error: u8,
    data: [u8; BLOCK_SIZE],
}

impl Block {
    pub(crate) fn reset(&mut self, id: usize) {
        self.id = id;
        self.size = 0;
        self.error = 0;
    }

    /// Slot index of this block in the ring.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// A block shorter than [`BLOCK_SIZE`] ends the stream.
    pub fn is_last(&self) -> bool {
        self.size < BLOCK_SIZE
    }

    pub fn is_error(&self) -> bool {
        self.error != 0
    }

    pub fn set_error(&mut self, error: bool) {
        self.error = error as u8;
    }

    /// Whether the length read from shared memory fits the buffer.
    pub fn is_well_formed(&self) -> bool {
        self.size <= BLOCK_SIZE
    }

    /// The valid bytes of the block, never more than [`BLOCK_SIZE`] even if
    /// the stored length is corrupt.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size.min(BLOCK_SIZE)]
    }

    /// The whole buffer, for filling. Follow with [`Block::set_len`].
    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    pub fn set_len(&mut self, size: usize) {
        assert!(size <= BLOCK_SIZE, "block length {size} exceeds {BLOCK_SIZE}");
        self.size = size;
    }

    /// Stores any length, as a foreign or corrupt writer could.
    #[cfg(test)]
    pub(crate) fn force_len(&mut self, size: usize) {
        self.size = size;
    }
}
