//! Error types for the stetho-adb crate.
//!
//! One enum covers every layer. Variants fall into two groups: failures the
//! user can act on (bad configuration, device or process not found) and
//! failures that indicate a broken peer or a bug. See [`Error::is_human_readable`].

use std::io;

/// Unified error type for adb and dumpapp operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad port, device or process configuration
    #[error("{0}")]
    Config(String),

    /// The daemon could not be reached, or a write failed
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// The peer closed the stream in the middle of a frame
    #[error("Unexpected end of stream while reading {context} ({expected} bytes expected)")]
    TruncatedStream {
        expected: usize,
        context: &'static str,
    },

    /// The daemon answered FAIL to a service selection
    #[error("Service selection failed: {reason}")]
    ServiceSelection { reason: String },

    #[error("Failure to target device {device}: {reason}")]
    TargetDevice { device: String, reason: String },

    #[error("Failure to target process {socket}: {reason} (is it running?)")]
    TargetProcess { socket: String, reason: String },

    #[error("No stetho-enabled processes running")]
    NoProcesses,

    #[error(
        "Multiple stetho-enabled processes available:\n{}Use -p <process> or the environment variable STETHO_PROCESS to select one",
        format_process_list(.processes)
    )]
    AmbiguousProcesses { processes: Vec<String> },

    /// A command argument that can't be framed
    #[error("{0}")]
    InvalidArgument(String),

    /// Reading local stdin or writing local stdout/stderr failed
    #[error("Local I/O error: {0}")]
    LocalIo(#[source] io::Error),

    /// The peer sent bytes that do not fit the protocol
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// An operation was attempted in the wrong connection state
    #[error("Invalid connection state: {0}")]
    InvalidState(&'static str),
}

fn format_process_list(processes: &[String]) -> String {
    processes.iter().fold(String::new(), |mut out, process| {
        out.push('\t');
        out.push_str(process);
        out.push('\n');
        out
    })
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Whether this error should be shown to the user as a plain message.
    ///
    /// Everything else is treated as an internal failure and reported with
    /// full diagnostic detail.
    #[must_use]
    pub fn is_human_readable(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidArgument(_)
                | Self::TargetDevice { .. }
                | Self::TargetProcess { .. }
                | Self::NoProcesses
                | Self::AmbiguousProcesses { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
