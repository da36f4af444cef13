use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::block::{Block, BLOCK_SIZE};
use crate::channel::{Side, Slot};
use crate::cleanup;
use crate::config::TransferOptions;
use crate::error::{Error, Result};
use crate::finisher::Finisher;
use crate::names::ChannelNames;
use crate::ring::DataTransfer;
use crate::role::{Role, RoleArbiter};

/// Runs one process's part of the transfer on `channel`.
///
/// Returns the role this process ended up with; [`Role::Exit`] means another
/// pair already owns the channel and nothing was done.
pub fn run(input: &Path, output: &Path, channel: &str, options: &TransferOptions) -> Result<Role> {
    let names = ChannelNames::new(channel, options.arbiter)?;
    let mut arbiter = RoleArbiter::determine(&names, options.role_timeout)?;
    debug!(arbiter = %arbiter.arbiter_name(), "holding role for the rest of the run");
    if arbiter.role() != Role::Exit {
        cleanup::register_participant(&names);
    }

    match arbiter.role() {
        Role::Reader => {
            // Opened before the ring so the writer can never remove it first.
            let mut finisher = Finisher::open(&names)?;
            let mut ring = DataTransfer::open(&names, Side::Reader, options.block_timeout)?;
            let produced = run_reader(input, &mut ring, &mut finisher);
            if finisher.writer_attached() {
                // The writer may still be draining and always finishes last.
                arbiter.leave_cleanup_to_writer();
                ring.leave_cleanup_to_writer();
                finisher.leave_cleanup_to_writer();
            }
            produced?;
        }
        Role::Writer => {
            let mut ring = DataTransfer::open(&names, Side::Writer, options.block_timeout)?;
            let finisher = Finisher::open(&names)?;
            run_writer(output, &mut ring, &finisher)?;
        }
        Role::Exit => {
            info!("maximum of two processes per channel, this one is superfluous");
        }
    }
    Ok(arbiter.role())
}

/// Reader role on a file.
pub fn run_reader(input: &Path, ring: &mut DataTransfer, finisher: &mut Finisher) -> Result<u64> {
    read_from(input, || File::open(input), ring, finisher)
}

/// Reader role: streams the source opened by `open` into the ring.
///
/// Initializes the ring, produces until a short block has been handed over
/// and then, on every path, waits for the writer to have attached before
/// returning. A source that cannot be opened or read is reported to the
/// writer through a block flagged as failed.
pub fn read_from<R, F>(
    path: &Path,
    open: F,
    ring: &mut DataTransfer,
    finisher: &mut Finisher,
) -> Result<u64>
where
    R: Read,
    F: FnOnce() -> io::Result<R>,
{
    info!(path = %path.display(), "reader started");
    ring.init_reading()?;
    let produced = produce(path, open, ring, finisher);
    if let Err(e) = finisher.wait_for_writer() {
        if produced.is_ok() {
            return Err(e);
        }
        warn!(error = %e, "shutdown handshake failed after an earlier error");
    }
    produced
}

fn produce<R, F>(path: &Path, open: F, ring: &mut DataTransfer, finisher: &mut Finisher) -> Result<u64>
where
    R: Read,
    F: FnOnce() -> io::Result<R>,
{
    let mut channel = ring.reader();
    // Until the writer is known to be attached, silence on `emptyBlocks` is
    // expected and the reader keeps waiting. Afterwards it is fatal.
    let mut keep_waiting = || -> Result<bool> {
        if finisher.writer_attached() {
            return Ok(false);
        }
        finisher.poll()?;
        Ok(true)
    };

    let mut source = match open() {
        Ok(source) => source,
        Err(source) => {
            error!(path = %path.display(), error = %source, "could not open input file");
            channel.acquire_slot_with(&mut keep_waiting)?.abort()?;
            return Err(Error::io(path, source));
        }
    };
    debug!(path = %path.display(), "input file opened");

    let mut total = 0u64;
    loop {
        let mut slot = channel.acquire_slot_with(&mut keep_waiting)?;
        check_peer(&slot)?;
        // A read error drops the slot, which hands it to the writer flagged.
        let len = fill_block(&mut source, slot.buf_mut()).map_err(|e| Error::io(path, e))?;
        slot.set_len(len);
        slot.set_error(false);
        info!(bytes = len, block = slot.id(), "loaded block");
        total += len as u64;
        let last = slot.is_last();
        slot.release()?;
        if last {
            break;
        }
    }
    info!(bytes = total, "file reading finished");
    Ok(total)
}

/// Reads until `buf` is full or the source is exhausted.
pub fn fill_block<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => {
                debug!("end of input reached");
                break;
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writer role on a file. The file is synced to disk before success is
/// reported.
pub fn run_writer(output: &Path, ring: &mut DataTransfer, finisher: &Finisher) -> Result<u64> {
    let (file, total) = write_to(output, || File::create(output), ring, finisher)?;
    file.sync_all().map_err(|e| Error::io(output, e))?;
    info!(path = %output.display(), bytes = total, "file saved");
    Ok(total)
}

/// Writer role: drains the ring into the sink opened by `open`.
///
/// Announces attachment through `finisher` first. The sink is only opened
/// once the first block arrives, so a failed reader leaves no output
/// behind. Returns the flushed sink and the number of bytes written.
pub fn write_to<W, F>(
    path: &Path,
    open: F,
    ring: &mut DataTransfer,
    finisher: &Finisher,
) -> Result<(W, u64)>
where
    W: Write,
    F: FnOnce() -> io::Result<W>,
{
    info!(path = %path.display(), "writer started");
    finisher.signal_attached()?;
    let mut channel = ring.writer();

    let mut slot = channel.acquire_slot()?;
    check_peer(&slot)?;
    let mut sink = match open() {
        Ok(sink) => sink,
        Err(source) => {
            error!(path = %path.display(), error = %source, "could not open output file");
            slot.abort()?;
            return Err(Error::io(path, source));
        }
    };
    debug!(path = %path.display(), "output file opened");

    let mut total = 0u64;
    loop {
        // A write error drops the slot, which hands it back to the reader flagged.
        sink.write_all(slot.data()).map_err(|e| Error::io(path, e))?;
        info!(bytes = slot.len(), block = slot.id(), "wrote block");
        total += slot.len() as u64;
        let last = slot.is_last();
        slot.release()?;
        if last {
            break;
        }
        slot = channel.acquire_slot()?;
        check_peer(&slot)?;
    }
    sink.flush().map_err(|e| Error::io(path, e))?;
    Ok((sink, total))
}

fn check_peer(slot: &Slot<'_>) -> Result<()> {
    let block: &Block = slot;
    if block.is_error() {
        error!(block = block.id(), "peer reported a failure, aborting transfer");
        return Err(Error::PeerFailed { block: block.id() });
    }
    if !block.is_well_formed() {
        error!(block = block.id(), len = block.len(), max = BLOCK_SIZE, "block length out of range");
        return Err(Error::PeerFailed { block: block.id() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn fill_block_retries_short_reads() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut source = Trickle {
            data: &data,
            step: 7,
        };
        let mut buf = [0u8; 64];
        assert_eq!(fill_block(&mut source, &mut buf).unwrap(), 64);
        assert_eq!(&buf[..], &data[..64]);
        assert_eq!(fill_block(&mut source, &mut buf).unwrap(), 36);
        assert_eq!(fill_block(&mut source, &mut buf).unwrap(), 0);
    }

    #[test]
    fn oversized_block_is_a_peer_failure() {
        use crate::names::ArbiterScope;
        use std::time::Duration;

        let channel = format!("test-transfer-oversize-{}", std::process::id());
        let names = ChannelNames::new(&channel, ArbiterScope::Channel).unwrap();
        let timeout = Duration::from_millis(50);
        let mut reader = DataTransfer::open(&names, Side::Reader, timeout).unwrap();
        let mut writer = DataTransfer::open(&names, Side::Writer, timeout).unwrap();
        reader.init_reading().unwrap();
        {
            let mut channel = reader.reader();
            let mut slot = channel.acquire_slot().unwrap();
            slot.force_len(BLOCK_SIZE + 1);
            slot.release().unwrap();
        }
        let mut channel = writer.writer();
        let slot = channel.acquire_slot().unwrap();
        assert!(matches!(check_peer(&slot), Err(Error::PeerFailed { block: 1 })));
        assert_eq!(slot.data().len(), BLOCK_SIZE);
        slot.release().unwrap();
    }

    #[test]
    fn fill_block_surfaces_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk on fire"))
            }
        }
        let mut buf = [0u8; 8];
        assert!(fill_block(&mut Broken, &mut buf).is_err());
        assert_eq!(fill_block(&mut Cursor::new(b"abc"), &mut buf).unwrap(), 3);
    }
}
