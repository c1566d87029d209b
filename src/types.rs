use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{CommandError, SourceError};

/// Identifies one container log stream.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct StreamTarget {
    pub pod_name: String,
    /// Not required if the pod only has a single container.
    pub container_name: Option<String>,
    pub pod_namespace: String,
}

impl StreamTarget {
    pub fn new(pod_name: impl Into<String>, pod_namespace: impl Into<String>) -> Self {
        Self {
            pod_name: pod_name.into(),
            container_name: None,
            pod_namespace: pod_namespace.into(),
        }
    }

    pub fn with_container(mut self, container_name: impl Into<String>) -> Self {
        self.container_name = Some(container_name.into());
        self
    }

    /// Rejects empty or whitespace-only pod and namespace names.
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.pod_name.trim().is_empty() {
            return Err(CommandError::invalid_argument(
                "pod_name",
                "cannot be empty or entirely composed of whitespace",
            ));
        }
        if self.pod_namespace.trim().is_empty() {
            return Err(CommandError::invalid_argument(
                "pod_namespace",
                "cannot be empty or entirely composed of whitespace",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container_name {
            Some(container) => write!(
                f,
                "{}/{}/{}",
                self.pod_namespace, self.pod_name, container
            ),
            None => write!(f, "{}/{}", self.pod_namespace, self.pod_name),
        }
    }
}

/// Lifecycle phase of a stream worker, as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Streaming,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Uninitialized => "uninitialized",
            WorkerState::Streaming => "streaming",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// A single line streamed from a container log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub target: StreamTarget,
    pub line: String,
    pub received_at: DateTime<Utc>,
}

/// The log stream failed after streaming began.
#[derive(Debug, Clone)]
pub struct ErrorNotification {
    pub target: StreamTarget,
    pub cause: SourceError,
}

/// The end of the log has been reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfStream {
    pub target: StreamTarget,
}

/// Everything a worker can deliver to its subscriber.
///
/// Each variant carries the full [`StreamTarget`] so one subscriber can be
/// fed by many workers.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    LogEntry(LogEntry),
    Error(ErrorNotification),
    EndOfStream(EndOfStream),
}

impl StreamMessage {
    pub fn target(&self) -> &StreamTarget {
        match self {
            StreamMessage::LogEntry(entry) => &entry.target,
            StreamMessage::Error(error) => &error.target,
            StreamMessage::EndOfStream(end) => &end.target,
        }
    }

    /// True for [`StreamMessage::Error`] and [`StreamMessage::EndOfStream`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamMessage::LogEntry(_))
    }
}
