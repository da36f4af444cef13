//! Copy a file between two independently started processes.
//!
//! The first process to arbitrate becomes the [`Role::Reader`] and streams
//! its input into a ring of [`BLOCK_NUM`] blocks living in POSIX shared
//! memory. The second becomes the [`Role::Writer`] and drains the ring into
//! its output. Two named semaphores hand each slot back and forth, a failed
//! side flags the block it holds so the peer aborts instead of hanging, and a
//! one-shot finisher semaphore keeps the reader alive until the writer has
//! attached.

// Lets `#[derive(FromShm)]` refer to `multicopy::` from inside this crate.
extern crate self as multicopy;

pub mod block;
pub mod channel;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod finisher;
pub mod logging;
mod mmap_raw;
pub mod names;
pub mod ring;
pub mod role;
pub mod shm;
pub mod sync;
pub mod transfer;

pub use block::{Block, BLOCK_NUM, BLOCK_SIZE};
pub use channel::{Channel, Side, Slot};
pub use config::{Args, TransferOptions};
pub use error::{Error, Result};
pub use finisher::Finisher;
pub use names::{ArbiterScope, ChannelNames};
pub use ring::{DataTransfer, RingSegment};
pub use role::{Role, RoleArbiter};
pub use shm::{FromShm, Shm};
pub use sync::{Creation, NamedSemaphore, WaitOutcome};
pub use transfer::run;
