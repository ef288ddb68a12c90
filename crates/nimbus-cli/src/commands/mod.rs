//! Command implementations for nimbus

pub mod config;
pub mod endpoint;
pub mod file;
pub mod flavor;
pub mod network;
pub mod server;
pub mod user;
pub mod volume;
pub mod wait;

use std::process::ExitCode;
use std::time::Duration;

pub use config::ConfigCommand;
pub use endpoint::EndpointCommand;
pub use file::FileCommand;
pub use flavor::FlavorCommand;
pub use network::NetworkCommand;
pub use server::ServerCommand;
pub use user::UserCommand;
pub use volume::VolumeCommand;

/// How a command finished, worst last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Completion {
    Success,
    TimedOut,
    Failed,
}

impl Completion {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::Failed => ExitCode::from(3),
            Self::TimedOut => ExitCode::from(4),
        }
    }
}

/// `--timeout` seconds as a duration
pub(crate) fn timeout_arg(secs: Option<u64>) -> Option<Duration> {
    secs.map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_completion_wins() {
        let worst = [Completion::Success, Completion::TimedOut, Completion::Success]
            .into_iter()
            .max();
        assert_eq!(worst, Some(Completion::TimedOut));
        assert_eq!(Completion::TimedOut.max(Completion::Failed), Completion::Failed);
    }
}
