//! Error types for ppmap.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::ProtocolError;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Bridge completed, however the session ended
    Success = 0,
    /// Socket, channel, or configuration setup failed
    InitFailed = 1,
    /// Command line could not be parsed
    Usage = 2,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// The socket setup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStep {
    Create,
    Bind,
    Listen,
    Accept,
    Connect,
    Shutdown,
}

impl fmt::Display for SocketStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            SocketStep::Create => "create",
            SocketStep::Bind => "bind",
            SocketStep::Listen => "listen",
            SocketStep::Accept => "accept",
            SocketStep::Connect => "connect",
            SocketStep::Shutdown => "shutdown",
        };
        f.write_str(step)
    }
}

/// Main error type for ppmap.
#[derive(Debug, Error)]
pub enum Error {
    #[error("socket {step} failed: {source}")]
    Socket {
        step: SocketStep,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open channel {}: {source}", path.display())]
    ChannelOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    #[error("relay task failed: {0}")]
    RelayTask(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn socket(step: SocketStep, source: std::io::Error) -> Self {
        Error::Socket { step, source }
    }

    /// Returns the exit code for this error.
    ///
    /// Only setup failures ever reach the top level. Faults after both
    /// relays started are kept in the session report instead.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::InitFailed
    }
}

/// Result type alias for ppmap operations.
pub type Result<T> = std::result::Result<T, Error>;
