/*!
 * Error types for Sluice
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SluiceError>;

#[derive(Debug)]
pub enum SluiceError {
    /// Reading the hash universe or baseline index failed
    SourceIo { path: PathBuf, source: io::Error },

    /// Writing a persistent artifact failed
    WriteIo { path: PathBuf, source: io::Error },

    /// A batch partition did not conserve its input
    ConservationViolation {
        batch_id: String,
        cracked: usize,
        remaining: usize,
        expected: usize,
    },

    /// The remote worker process never started
    LaunchFailed { session: String, log_tail: String },

    /// Transport stayed down longer than the reconnect ceiling
    ConnectionLost { waited_secs: u64 },

    /// Remote work exceeded the wall-clock ceiling
    CompletionTimeout { session: String, waited_secs: u64 },

    /// Two consecutive checks found no process, no session, and a
    /// log without a terminal status line
    UnexpectedStop { session: String, log_tail: String },

    /// A pre-flight requirement was not met
    PreflightFailed { check: String, detail: String },

    /// The persisted state document could not be parsed
    StateCorruption { path: PathBuf, detail: String },

    /// Another orchestrator holds the state lock
    StateLocked { path: PathBuf },

    /// Insufficient local disk space
    InsufficientDiskSpace { required: u64, available: u64 },

    /// Configuration error
    Config(String),

    /// Remote transport error
    Transport(crate::remote::TransportError),

    /// Generic I/O error
    Io(io::Error),

    /// Generic error with message
    Other(String),
}

impl SluiceError {
    /// Check if this error is fatal (should not retry or continue)
    pub fn is_fatal(&self) -> bool {
        match self {
            // These are fatal - abort the run
            SluiceError::ConservationViolation { .. } => true,
            SluiceError::StateCorruption { .. } => true,
            SluiceError::StateLocked { .. } => true,
            SluiceError::Config(_) => true,
            SluiceError::InsufficientDiskSpace { .. } => true,
            SluiceError::SourceIo { .. } => true,
            SluiceError::WriteIo { .. } => true,

            // These end the current attack or batch, not the run
            SluiceError::LaunchFailed { .. } => false,
            SluiceError::ConnectionLost { .. } => false,
            SluiceError::CompletionTimeout { .. } => false,
            SluiceError::UnexpectedStop { .. } => false,
            SluiceError::PreflightFailed { .. } => false,
            SluiceError::Transport(_) => false,
            SluiceError::Io(_) => false,
            SluiceError::Other(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            SluiceError::Transport(e) => e.is_retriable(),
            SluiceError::Io(io_err) => Self::is_io_transient(io_err),
            SluiceError::ConnectionLost { .. } => true,
            _ => false,
        }
    }

    /// Check if an I/O error is transient
    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | WriteZero
        )
    }

    /// Process exit code for this error: 2 for pre-flight failures,
    /// 1 for everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            SluiceError::PreflightFailed { .. } => 2,
            _ => 1,
        }
    }

    /// Suggested operator action, printed alongside the failure
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            SluiceError::ConnectionLost { .. } | SluiceError::CompletionTimeout { .. } => {
                Some("the remote session was left running; re-run with the same arguments to resume")
            }
            SluiceError::UnexpectedStop { .. } => {
                Some("inspect the remote log tail, then re-run with the same arguments")
            }
            SluiceError::PreflightFailed { .. } => {
                Some("fix the named pre-flight condition and re-run")
            }
            SluiceError::StateLocked { .. } => {
                Some("another orchestrator may be running; remove the lock file if it is stale")
            }
            SluiceError::StateCorruption { .. } => {
                Some("restore the state file from the last known-good copy; no automatic repair is attempted")
            }
            _ => None,
        }
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            SluiceError::SourceIo { .. } => ErrorCategory::SourceIo,
            SluiceError::WriteIo { .. } => ErrorCategory::WriteIo,
            SluiceError::ConservationViolation { .. } => ErrorCategory::Integrity,
            SluiceError::LaunchFailed { .. } => ErrorCategory::Launch,
            SluiceError::ConnectionLost { .. } | SluiceError::Transport(_) => {
                ErrorCategory::Network
            }
            SluiceError::CompletionTimeout { .. } => ErrorCategory::Timeout,
            SluiceError::UnexpectedStop { .. } => ErrorCategory::RemoteStop,
            SluiceError::PreflightFailed { .. } => ErrorCategory::Preflight,
            SluiceError::StateCorruption { .. } | SluiceError::StateLocked { .. } => {
                ErrorCategory::State
            }
            SluiceError::InsufficientDiskSpace { .. } => ErrorCategory::Resource,
            SluiceError::Config(_) => ErrorCategory::Configuration,
            SluiceError::Io(_) => ErrorCategory::IoError,
            SluiceError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Reading source data (hash universe, baseline index)
    SourceIo,
    /// Writing persistent artifacts
    WriteIo,
    /// Data integrity errors (conservation)
    Integrity,
    /// Remote launch errors
    Launch,
    /// Network/transport errors
    Network,
    /// Wall-clock timeouts
    Timeout,
    /// Unexpected remote termination
    RemoteStop,
    /// Pre-flight check failures
    Preflight,
    /// State document errors
    State,
    /// Resource availability errors (disk space)
    Resource,
    /// Configuration errors
    Configuration,
    /// Generic I/O errors
    IoError,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::SourceIo => write!(f, "source-io"),
            ErrorCategory::WriteIo => write!(f, "write-io"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Launch => write!(f, "launch"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::RemoteStop => write!(f, "remote-stop"),
            ErrorCategory::Preflight => write!(f, "preflight"),
            ErrorCategory::State => write!(f, "state"),
            ErrorCategory::Resource => write!(f, "resource"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for SluiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SluiceError::SourceIo { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            SluiceError::WriteIo { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
            SluiceError::ConservationViolation {
                batch_id,
                cracked,
                remaining,
                expected,
            } => {
                write!(
                    f,
                    "Conservation violation in batch {}: {} cracked + {} uncracked != {} input hashes",
                    batch_id, cracked, remaining, expected
                )
            }
            SluiceError::LaunchFailed { session, log_tail } => {
                write!(
                    f,
                    "Remote worker failed to launch in session '{}'; log tail: {}",
                    session,
                    if log_tail.is_empty() { "<empty>" } else { log_tail.as_str() }
                )
            }
            SluiceError::ConnectionLost { waited_secs } => {
                write!(
                    f,
                    "Transport stayed down for {} seconds, beyond the reconnect ceiling",
                    waited_secs
                )
            }
            SluiceError::CompletionTimeout {
                session,
                waited_secs,
            } => {
                write!(
                    f,
                    "Session '{}' did not complete within {} seconds",
                    session, waited_secs
                )
            }
            SluiceError::UnexpectedStop { session, log_tail } => {
                write!(
                    f,
                    "Session '{}' stopped without a terminal status; log tail: {}",
                    session,
                    if log_tail.is_empty() { "<empty>" } else { log_tail.as_str() }
                )
            }
            SluiceError::PreflightFailed { check, detail } => {
                write!(f, "Pre-flight check '{}' failed: {}", check, detail)
            }
            SluiceError::StateCorruption { path, detail } => {
                write!(
                    f,
                    "State document {} is corrupt: {}",
                    path.display(),
                    detail
                )
            }
            SluiceError::StateLocked { path } => {
                write!(f, "State is locked by {}", path.display())
            }
            SluiceError::InsufficientDiskSpace {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient disk space: {} bytes required, {} bytes available",
                    required, available
                )
            }
            SluiceError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            SluiceError::Transport(err) => {
                write!(f, "Transport error: {}", err)
            }
            SluiceError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            SluiceError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for SluiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SluiceError::SourceIo { source, .. } => Some(source),
            SluiceError::WriteIo { source, .. } => Some(source),
            SluiceError::Io(err) => Some(err),
            SluiceError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SluiceError {
    fn from(err: io::Error) -> Self {
        SluiceError::Io(err)
    }
}

impl From<serde_json::Error> for SluiceError {
    fn from(err: serde_json::Error) -> Self {
        SluiceError::Other(format!("JSON error: {}", err))
    }
}

impl From<crate::remote::TransportError> for SluiceError {
    fn from(err: crate::remote::TransportError) -> Self {
        SluiceError::Transport(err)
    }
}
