use tokio::sync::oneshot;

use crate::error::{CommandError, SourceError};
use crate::subscriber::SubscriberRef;
use crate::types::StreamTarget;

/// Request initialisation of a stream worker.
#[derive(Clone)]
pub struct Initialize {
    pub target: StreamTarget,
    /// Receives every message the worker produces.
    pub subscriber: SubscriberRef,
}

impl Initialize {
    /// Targets the only container of a single-container pod.
    pub fn new(
        pod_name: impl Into<String>,
        pod_namespace: impl Into<String>,
        subscriber: SubscriberRef,
    ) -> Self {
        Self::for_target(StreamTarget::new(pod_name, pod_namespace), subscriber)
    }

    pub fn for_target(target: StreamTarget, subscriber: SubscriberRef) -> Self {
        Self { target, subscriber }
    }

    pub fn with_container(mut self, container_name: impl Into<String>) -> Self {
        self.target.container_name = Some(container_name.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), CommandError> {
        self.target.validate()?;
        if self.subscriber.is_closed() {
            return Err(CommandError::invalid_argument(
                "subscriber",
                "subscriber is closed",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Initialize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initialize")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Initialize(Initialize),
    Cancel,
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Initialize(_) => "initialize",
            Command::Cancel => "cancel",
        }
    }
}

#[derive(Debug)]
pub(crate) enum SourceEvent {
    Line(String),
    Failed(SourceError),
    Completed,
}

impl SourceEvent {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, SourceEvent::Line(_))
    }
}

pub(crate) type Reply = oneshot::Sender<Result<(), CommandError>>;

/// One item of a worker's mailbox.
#[derive(Debug)]
pub(crate) enum Envelope {
    Command { command: Command, reply: Reply },
    Source(SourceEvent),
}
