use std::num::NonZero;
use std::ops::{Deref, DerefMut};
use std::os::fd::AsFd;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::libc::{c_void, off_t};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::warn;

#[derive(Debug)]
pub(crate) struct MmapRaw {
    pub ptr: NonNull<c_void>,
    pub len: usize,
}

// The mapping is plain memory; synchronizing access is the owner's job.
unsafe impl Send for MmapRaw {}

impl MmapRaw {
    pub fn new<F: AsFd>(
        len: NonZero<usize>,
        prot: ProtFlags,
        flgs: MapFlags,
        file: &F,
        off: off_t,
    ) -> Result<Self, Errno> {
        let ptr = unsafe { mmap(None, len, prot, flgs, file, off)? };
        Ok(MmapRaw {
            ptr,
            len: len.into(),
        })
    }
}

impl Drop for MmapRaw {
    fn drop(&mut self) {
        if let Err(errno) = unsafe { munmap(self.ptr, self.len) } {
            warn!(%errno, len = self.len, "failed to unmap shared memory");
        }
    }
}

impl Deref for MmapRaw {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

impl DerefMut for MmapRaw {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.len) }
    }
}
