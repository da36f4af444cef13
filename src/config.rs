use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::names::ArbiterScope;

/// Default wait before a joining process gives up on getting a role, and
/// before a silent peer is declared dead.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "multicopy")]
#[command(version, about = "copy a file between two processes through shared memory")]
#[command(
    long_about = "Start the same command twice. The first process becomes the reader and \
streams INPUT into the shared channel, the second becomes the writer and stores it \
as OUTPUT. Any further process started while the pair is arbitrating exits."
)]
pub struct Args {
    #[arg(help = "file streamed into the channel by the reader")]
    pub input: PathBuf,

    #[arg(help = "file written by the writer")]
    pub output: PathBuf,

    #[arg(help = "channel name both processes agree on")]
    pub channel: String,

    #[arg(
        long,
        default_value = "500ms",
        value_parser = humantime::parse_duration,
        help = "how long a joining process waits for the writer role"
    )]
    pub role_timeout: Duration,

    #[arg(
        long,
        default_value = "500ms",
        value_parser = humantime::parse_duration,
        help = "how long to wait for the peer to hand over a block"
    )]
    pub block_timeout: Duration,

    #[arg(long, help = "arbitrate roles through one machine-wide name")]
    pub global_arbiter: bool,

    #[arg(long, help = "also write a debug log file per process into this directory")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    pub fn options(&self) -> TransferOptions {
        TransferOptions {
            role_timeout: self.role_timeout,
            block_timeout: self.block_timeout,
            arbiter: if self.global_arbiter {
                ArbiterScope::Global
            } else {
                ArbiterScope::Channel
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub role_timeout: Duration,
    pub block_timeout: Duration,
    pub arbiter: ArbiterScope,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            role_timeout: DEFAULT_TIMEOUT,
            block_timeout: DEFAULT_TIMEOUT,
            arbiter: ArbiterScope::Channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_timeouts() {
        let args = Args::try_parse_from(["multicopy", "in.bin", "out.bin", "copy"]).unwrap();
        assert_eq!(args.options(), TransferOptions::default());
        assert_eq!(args.channel, "copy");
        assert!(args.log_dir.is_none());
    }

    #[test]
    fn timeouts_and_scope_are_configurable() {
        let args = Args::try_parse_from([
            "multicopy",
            "in.bin",
            "out.bin",
            "copy",
            "--role-timeout",
            "2s",
            "--block-timeout",
            "150ms",
            "--global-arbiter",
        ])
        .unwrap();
        let options = args.options();
        assert_eq!(options.role_timeout, Duration::from_secs(2));
        assert_eq!(options.block_timeout, Duration::from_millis(150));
        assert_eq!(options.arbiter, ArbiterScope::Global);
    }

    #[test]
    fn missing_positional_is_a_usage_error() {
        let err = Args::try_parse_from(["multicopy", "in.bin", "out.bin"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
