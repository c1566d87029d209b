//! In-process log source fed through channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::SourceError;
use crate::source::{LineStream, LogSource};
use crate::types::StreamTarget;

type Feed = mpsc::UnboundedReceiver<Result<String, SourceError>>;

/// A [`LogSource`] whose lines are pushed by the caller.
///
/// Each target gets one feed, created with [`MemoryLogSource::feed`]. Lines
/// pushed before the worker subscribes are buffered. Subscribing to a target
/// without a feed yields a single [`SourceError::NotFound`].
#[derive(Default)]
pub struct MemoryLogSource {
    feeds: Mutex<HashMap<StreamTarget, Feed>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `target` and returns the handle used to drive its log.
    pub fn feed(&self, target: StreamTarget) -> MemoryFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(target, rx);
        MemoryFeed { tx }
    }

    /// Number of subscriptions handed out so far.
    pub fn subscriptions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of subscription streams that have been dropped.
    pub fn subscriptions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl LogSource for MemoryLogSource {
    fn subscribe(&self, target: &StreamTarget) -> LineStream {
        let feed = self
            .feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(target);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let guard = CloseGuard(self.closed.clone());

        match feed {
            Some(rx) => {
                debug!("[{}] Memory feed subscribed", target);
                UnboundedReceiverStream::new(rx)
                    .map(move |item| {
                        let _held = &guard;
                        item
                    })
                    .boxed()
            }
            None => {
                let err = SourceError::NotFound(target.to_string());
                stream::once(async move {
                    let _held = guard;
                    Err::<String, SourceError>(err)
                })
                .boxed()
            }
        }
    }
}

struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Producer side of one memory feed. Dropping it completes the log.
pub struct MemoryFeed {
    tx: mpsc::UnboundedSender<Result<String, SourceError>>,
}

impl MemoryFeed {
    /// Pushes one line. Returns false once the subscriber side is gone.
    pub fn line(&self, line: impl Into<String>) -> bool {
        self.tx.send(Ok(line.into())).is_ok()
    }

    /// Fails the log with `cause`.
    pub fn fail(self, cause: SourceError) {
        let _ = self.tx.send(Err(cause));
    }

    pub fn complete(self) {}

    /// True once the subscription stream was dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
