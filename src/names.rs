//! OS object names derived from a channel name.
//!
//! For a channel `c` every participant opens:
//!
//! | object          | name                   |
//! |-----------------|------------------------|
//! | role arbiter    | `/multicopy-c-role`    |
//! | ring segment    | `/multicopy-c-ring`    |
//! | `emptyBlocks`   | `/multicopy-c-empty`   |
//! | `blocksToWrite` | `/multicopy-c-filled`  |
//! | finisher        | `/multicopy-c-finisher`|
//!
//! With a machine-wide arbiter the role semaphore is `/multicopy-role` for
//! every channel.

use crate::error::{Error, Result};

const PREFIX: &str = "/multicopy";

/// Longest accepted channel name. Keeps every derived name well under
/// NAME_MAX once the kernel adds its own `sem.` prefix.
pub const MAX_CHANNEL_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArbiterScope {
    /// One arbiter per channel name.
    #[default]
    Channel,
    /// A single arbiter shared by every transfer on the machine.
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    channel: String,
    arbiter: ArbiterScope,
}

impl ChannelNames {
    pub fn new(channel: &str, arbiter: ArbiterScope) -> Result<Self> {
        let invalid = |reason| Error::InvalidName {
            name: channel.to_string(),
            reason,
        };
        if channel.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if channel.len() > MAX_CHANNEL_LEN {
            return Err(invalid("longer than 200 bytes"));
        }
        if channel.contains('/') {
            return Err(invalid("contains '/'"));
        }
        if channel.contains('\0') {
            return Err(invalid("contains a NUL byte"));
        }
        Ok(ChannelNames {
            channel: channel.to_string(),
            arbiter,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn role(&self) -> String {
        match self.arbiter {
            ArbiterScope::Channel => self.derive("role"),
            ArbiterScope::Global => format!("{}-role", PREFIX),
        }
    }

    pub fn ring(&self) -> String {
        self.derive("ring")
    }

    pub fn empty_blocks(&self) -> String {
        self.derive("empty")
    }

    pub fn blocks_to_write(&self) -> String {
        self.derive("filled")
    }

    pub fn finisher(&self) -> String {
        self.derive("finisher")
    }

    fn derive(&self, suffix: &str) -> String {
        format!("{}-{}-{}", PREFIX, self.channel, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_derived_from_channel() {
        let names = ChannelNames::new("copy1", ArbiterScope::Channel).unwrap();
        assert_eq!(names.role(), "/multicopy-copy1-role");
        assert_eq!(names.ring(), "/multicopy-copy1-ring");
        assert_eq!(names.empty_blocks(), "/multicopy-copy1-empty");
        assert_eq!(names.blocks_to_write(), "/multicopy-copy1-filled");
        assert_eq!(names.finisher(), "/multicopy-copy1-finisher");
    }

    #[test]
    fn global_arbiter_ignores_channel() {
        let a = ChannelNames::new("a", ArbiterScope::Global).unwrap();
        let b = ChannelNames::new("b", ArbiterScope::Global).unwrap();
        assert_eq!(a.role(), b.role());
        assert_ne!(a.ring(), b.ring());
    }

    #[test]
    fn bad_channel_names_are_rejected() {
        let long = "x".repeat(MAX_CHANNEL_LEN + 1);
        for bad in ["", "a/b", "nul\0", long.as_str()] {
            let err = ChannelNames::new(bad, ArbiterScope::Channel).unwrap_err();
            assert!(matches!(err, Error::InvalidName { .. }), "{bad:?}");
        }
        assert!(ChannelNames::new(&"x".repeat(MAX_CHANNEL_LEN), ArbiterScope::Channel).is_ok());
    }
}
