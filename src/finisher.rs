use tracing::{debug, info};

use crate::error::Result;
use crate::names::ChannelNames;
use crate::sync::{NamedSemaphore, WaitOutcome};

/// One-shot "writer has attached" flag.
///
/// The writer raises it right after opening the ring. The reader must see it
/// before releasing its own handles, otherwise a fast reader could remove
/// the shared objects before a slow writer ever opened them.
pub struct Finisher {
    semaphore: NamedSemaphore,
    attached: bool,
}

impl Finisher {
    pub fn open(names: &ChannelNames) -> Result<Self> {
        Ok(Finisher {
            semaphore: NamedSemaphore::open(&names.finisher(), 1)?,
            attached: false,
        })
    }

    /// Writer side: announce attachment.
    pub fn signal_attached(&self) -> Result<()> {
        debug!(name = %self.semaphore.name(), "announcing writer attachment");
        self.semaphore.post()
    }

    /// Whether the writer has been seen to attach so far.
    pub fn writer_attached(&self) -> bool {
        self.attached
    }

    /// Reader side: check for the writer without blocking.
    pub fn poll(&mut self) -> Result<bool> {
        if !self.attached
            && self.semaphore.wait(Some(std::time::Duration::ZERO))? == WaitOutcome::Signaled
        {
            info!("writer attached");
            self.attached = true;
        }
        Ok(self.attached)
    }

    /// Reader side: keep the name after dropping, the writer removes it.
    pub fn leave_cleanup_to_writer(&mut self) {
        self.semaphore.set_unlink_on_drop(false);
    }

    /// Reader side: block until the writer has attached.
    pub fn wait_for_writer(&mut self) -> Result<()> {
        if self.poll()? {
            info!("reader detected its writer");
            return Ok(());
        }
        info!("waiting for writer to start and take its role");
        self.semaphore.wait(None)?;
        self.attached = true;
        info!("writer attached, reader finishing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::ArbiterScope;
    use std::thread;
    use std::time::{Duration, Instant};

    fn names(tag: &str) -> ChannelNames {
        let channel = format!("test-finisher-{}-{}", tag, std::process::id());
        ChannelNames::new(&channel, ArbiterScope::Channel).unwrap()
    }

    #[test]
    fn poll_sees_signal_once_and_remembers_it() {
        let names = names("poll");
        let mut reader = Finisher::open(&names).unwrap();
        let writer = Finisher::open(&names).unwrap();
        assert!(!reader.poll().unwrap());
        writer.signal_attached().unwrap();
        assert!(reader.poll().unwrap());
        assert!(reader.poll().unwrap());
        assert!(reader.writer_attached());
        reader.wait_for_writer().unwrap();
    }

    #[test]
    fn reader_blocks_until_late_writer() {
        let names = names("late");
        let mut reader = Finisher::open(&names).unwrap();
        let delay = Duration::from_millis(150);
        let late = {
            let names = names.clone();
            thread::spawn(move || {
                thread::sleep(delay);
                Finisher::open(&names).unwrap().signal_attached().unwrap();
            })
        };
        let start = Instant::now();
        reader.wait_for_writer().unwrap();
        assert!(start.elapsed() >= delay);
        late.join().unwrap();
    }
}
