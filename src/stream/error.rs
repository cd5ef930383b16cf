use std::{error::Error, fmt, io};

use serde::{Deserialize, Serialize};

use super::session::CoordinatorState;

/// The class of failure carried by an [`ErrorRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ModuleLoad,   // The compute engine failed to initialize
    Parse,        // One streamed payload was malformed
    Execution,    // The engine failed during a run
    ChannelCrash, // The background context died without a normal error message
}

impl ErrorKind {
    /// Whether this error ends the channel instance, requiring a reload.
    pub fn is_channel_fatal(self) -> bool {
        matches!(self, ErrorKind::ModuleLoad | ErrorKind::ChannelCrash)
    }

    /// Whether this error interrupts anything at all.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorKind::Parse)
    }
}

/// An error surfaced to the display layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            ErrorKind::ModuleLoad => "module load error",
            ErrorKind::Parse => "stream parse error",
            ErrorKind::Execution => "execution error",
            ErrorKind::ChannelCrash => "channel crash",
        };
        write!(f, "{label}: {}", self.message)
    }
}

/// Failures reported by a compute engine or its loader.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine could not be initialized.
    Load(String),
    /// The engine raised while running.
    Execution(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(msg) => write!(f, "failed to load compute engine: {msg}"),
            Self::Execution(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for EngineError {}

/// Failures of the compute channel handle itself.
#[derive(Debug)]
pub enum ChannelError {
    /// The channel was terminated and accepts no further operations.
    Terminated,
    /// A run is already in flight on this channel.
    Busy,
    /// The background thread could not be spawned.
    Spawn(io::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => write!(f, "compute channel has been terminated"),
            Self::Busy => write!(f, "compute channel is already running a session"),
            Self::Spawn(e) => write!(f, "failed to spawn compute channel thread: {e}"),
        }
    }
}

impl Error for ChannelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(e: io::Error) -> Self {
        Self::Spawn(e)
    }
}

/// A point that would break the epoch sequence of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceError {
    pub expected: u32,
    pub got: u32,
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch sequence broken: expected epoch {}, got {}",
            self.expected, self.got
        )
    }
}

impl Error for SequenceError {}

/// Why the coordinator refused a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestRejected {
    /// Runs are only accepted in the `Ready` state.
    NotReady(CoordinatorState),
    /// The learning rate must be finite and strictly positive.
    InvalidLearningRate(f64),
    /// A session is active, so the channel cannot be replaced.
    SessionActive,
    /// The channel refused the request or is gone.
    ChannelUnavailable(String),
}

impl fmt::Display for RequestRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady(state) => write!(f, "coordinator is not ready (state: {state:?})"),
            Self::InvalidLearningRate(lr) => write!(f, "invalid learning rate: {lr}"),
            Self::SessionActive => write!(f, "a training session is still running"),
            Self::ChannelUnavailable(msg) => write!(f, "compute channel unavailable: {msg}"),
        }
    }
}

impl Error for RequestRejected {}

/// Failures while loading the demo configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: String, source: io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read '{path}': {source}"),
            Self::Parse(e) => write!(f, "invalid JSON: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_load_and_crash_are_channel_fatal() {
        assert!(ErrorKind::ModuleLoad.is_channel_fatal());
        assert!(ErrorKind::ChannelCrash.is_channel_fatal());
        assert!(!ErrorKind::Execution.is_channel_fatal());
        assert!(!ErrorKind::Parse.is_channel_fatal());
        assert!(!ErrorKind::Parse.is_fatal());
        assert!(ErrorKind::Execution.is_fatal());
    }

    #[test]
    fn record_display_names_the_kind() {
        let record = ErrorRecord::new(ErrorKind::Execution, "boom");
        assert_eq!(record.to_string(), "execution error: boom");
    }
}
