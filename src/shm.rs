use std::num::NonZero;
use std::ops::{Deref, DerefMut};

use nix::errno::Errno;
use nix::sys::mman::shm_unlink;
use nix::unistd::ftruncate;
use nix::{
    fcntl::OFlag,
    libc::off_t,
    sys::mman::{shm_open, MapFlags, ProtFlags},
    sys::stat::Mode,
};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mmap_raw::MmapRaw;

/// A typed view over the start of a [`Shm`] mapping.
///
/// Derive it with `#[derive(FromShm)]` on a `#[repr(C)]` struct.
///
/// # Safety
///
/// Every bit pattern must be a valid value of the implementing type, because
/// a joining process views bytes it did not write.
pub unsafe trait FromShm: Sized {
    fn from_shm(shm: &Shm) -> Result<&Self>;
    fn from_shm_mut(shm: &mut Shm) -> Result<&mut Self>;
}

pub struct OpenOptions {
    mode: Mode,
    oflg: OFlag,
    prot: ProtFlags,
    flgs: MapFlags,
    offset: off_t,
}

impl OpenOptions {
    /// Opens `name` and sizes it to exactly `len` bytes before mapping it.
    pub fn map(self, name: &str, len: usize) -> Result<Shm> {
        let name = Self::prepend_slash(name);
        let shm_err = |source| Error::SharedMemory {
            name: name.clone(),
            source,
        };
        let len = NonZero::new(len).ok_or_else(|| shm_err(Errno::EINVAL))?;
        let fd = shm_open(name.as_str(), self.oflg, self.mode).map_err(shm_err)?;
        ftruncate(&fd, len.get() as off_t).map_err(shm_err)?;
        let inner =
            MmapRaw::new(len, self.prot, self.flgs, &fd, self.offset).map_err(shm_err)?;
        debug!(name = %name, len = len.get(), "mapped shared memory");
        Ok(Shm {
            name,
            inner: Some(inner),
            unlink_on_drop: true,
        })
    }

    pub fn create(mut self, create: bool) -> Self {
        if create {
            self.oflg |= OFlag::O_CREAT;
        } else {
            self.oflg &= !OFlag::O_CREAT;
        }
        self
    }

    pub fn read(mut self, readable: bool) -> Self {
        if readable {
            self.prot |= ProtFlags::PROT_READ;
        } else {
            self.prot &= !ProtFlags::PROT_READ;
        }
        self
    }

    pub fn write(mut self, writable: bool) -> Self {
        if writable {
            self.prot |= ProtFlags::PROT_WRITE;
        } else {
            self.prot &= !ProtFlags::PROT_WRITE;
        }
        self
    }

    fn prepend_slash(name: &str) -> String {
        if !name.starts_with('/') {
            String::from("/") + name
        } else {
            String::from(name)
        }
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            mode: Mode::from_bits_truncate(0o600),
            oflg: OFlag::O_RDWR,
            prot: ProtFlags::PROT_NONE,
            flgs: MapFlags::MAP_SHARED,
            offset: 0,
        }
    }
}

/// A named POSIX shared-memory segment mapped into this process.
///
/// Dropping it unmaps the segment and, unless told otherwise with
/// [`Shm::set_unlink_on_drop`], removes the name.
pub struct Shm {
    name: String,
    inner: Option<MmapRaw>,
    unlink_on_drop: bool,
}

impl Shm {
    /// Creates the segment, or maps the existing one, as `len` read/write
    /// bytes. Contents are left untouched.
    pub fn create_or_open(name: &str, len: usize) -> Result<Self> {
        Shm::options()
            .read(true)
            .write(true)
            .create(true)
            .map(name, len)
    }

    pub fn options() -> OpenOptions {
        OpenOptions::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_unlink_on_drop(&mut self, unlink: bool) {
        self.unlink_on_drop = unlink;
    }
}

impl Deref for Shm {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        match &self.inner {
            Some(inner) => inner.deref(),
            None => unreachable!(),
        }
    }
}

impl DerefMut for Shm {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.inner {
            Some(inner) => inner.deref_mut(),
            None => unreachable!(),
        }
    }
}

impl Drop for Shm {
    fn drop(&mut self) {
        drop(self.inner.take());
        if !self.unlink_on_drop {
            debug!(name = %self.name, "unmapped shared memory, name kept");
            return;
        }
        match unlink_shm(&self.name) {
            Ok(()) => debug!(name = %self.name, "released shared memory"),
            Err(e) => warn!(error = %e, "failed to unlink shared memory"),
        }
    }
}

/// Removes a shared-memory name. A missing name is not an error, the peer
/// may have removed it first.
pub fn unlink_shm(name: &str) -> Result<()> {
    match shm_unlink(name) {
        Ok(()) | Err(Errno::ENOENT) => Ok(()),
        Err(source) => Err(Error::SharedMemory {
            name: name.to_string(),
            source,
        }),
    }
}
