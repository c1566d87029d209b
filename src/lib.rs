//! Per-container Kubernetes log streaming workers.
//!
//! A [`StreamWorker`] follows one container log from a [`LogSource`] and
//! delivers every line, plus one terminal message, to a [`Subscriber`].
//! A [`StreamHost`] creates workers on demand and routes `initialize` and
//! `cancel` commands to them by [`WorkerId`].

pub mod config;
pub mod error;
pub mod host;
pub mod kubernetes;
pub mod memory;
pub mod source;
pub mod subscriber;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::{ErrorPolicy, SpoolConfig, WorkerConfig};
pub use error::{CommandError, ConfigError, ProtocolViolation, SourceError};
pub use host::{StreamHost, WorkerId};
pub use kubernetes::KubeLogSource;
pub use memory::{MemoryFeed, MemoryLogSource};
pub use source::{LineStream, LogSource, LogSourceRef};
pub use subscriber::{Subscriber, SubscriberRef};
pub use types::{EndOfStream, ErrorNotification, LogEntry, StreamMessage, StreamTarget, WorkerState};
pub use worker::{Initialize, StreamWorker, WorkerHandle};
