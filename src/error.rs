//! Error types for the log spooler.
//!
//! - [`CommandError`]: synchronous rejection of an `initialize`/`cancel` command.
//! - [`SourceError`]: failure of a log source after streaming began.
//! - [`ConfigError`]: unreadable or invalid spooler configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::WorkerState;

/// Why a command was invalid for the worker's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("worker has not been initialised")]
    NotInitialized,

    #[error("worker has already been initialised")]
    AlreadyInitialized,

    #[error("worker has terminated")]
    Terminated,
}

impl ProtocolViolation {
    /// The violation raised by a non-initialize command in `state`.
    pub(crate) fn for_state(state: WorkerState) -> Self {
        match state {
            WorkerState::Uninitialized => ProtocolViolation::NotInitialized,
            WorkerState::Streaming => ProtocolViolation::AlreadyInitialized,
            WorkerState::Terminated => ProtocolViolation::Terminated,
        }
    }
}

/// Returned to the issuer of a command. Never changes worker state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid argument '{argument}': {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: String,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),
}

impl CommandError {
    pub fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
        CommandError::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, CommandError::ProtocolViolation(_))
    }

    pub fn violation(&self) -> Option<ProtocolViolation> {
        match self {
            CommandError::ProtocolViolation(violation) => Some(*violation),
            CommandError::InvalidArgument { .. } => None,
        }
    }
}

/// A log source failed. Terminal for the worker that observed it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("pod {0} not found")]
    NotFound(String),

    #[error("failed to open log stream: {0}")]
    Open(String),

    #[error("failed to read log line: {0}")]
    Read(String),

    #[error("{0}")]
    Other(String),
}

impl From<kube::Error> for SourceError {
    fn from(err: kube::Error) -> Self {
        if let kube::Error::Api(status) = &err
            && status.code == 404
        {
            return SourceError::NotFound(status.message.clone());
        }
        SourceError::Open(err.to_string())
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Read(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_for_state() {
        assert_eq!(
            ProtocolViolation::for_state(WorkerState::Uninitialized),
            ProtocolViolation::NotInitialized
        );
        assert_eq!(
            ProtocolViolation::for_state(WorkerState::Streaming),
            ProtocolViolation::AlreadyInitialized
        );
        assert_eq!(
            ProtocolViolation::for_state(WorkerState::Terminated),
            ProtocolViolation::Terminated
        );
    }

    #[test]
    fn test_command_error_display() {
        let err = CommandError::invalid_argument("pod_name", "cannot be empty");
        assert_eq!(
            err.to_string(),
            "invalid argument 'pod_name': cannot be empty"
        );
        assert!(!err.is_protocol_violation());

        let err: CommandError = ProtocolViolation::Terminated.into();
        assert!(err.is_protocol_violation());
        assert_eq!(err.violation(), Some(ProtocolViolation::Terminated));
        assert_eq!(err.to_string(), "protocol violation: worker has terminated");
    }

    #[test]
    fn test_io_error_maps_to_read() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(SourceError::from(io), SourceError::Read(_)));
    }
}
