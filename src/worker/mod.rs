//! # StreamWorker: one container log, one subscriber.
//!
//! A worker is a tokio task draining a single ordered mailbox. Commands from
//! callers and events from the log source share that mailbox, so state
//! transitions never race with each other.
//!
//! ```text
//!                 Initialize (valid)
//! Uninitialized ─────────────────────► Streaming
//!                                         │ Cancel / source error / source end
//!                                         ▼
//!                                     Terminated ──► task exits
//! ```
//!
//! ## Rules
//! - Invalid commands are rejected with a [`CommandError`] and change nothing.
//! - The subscription lives in a [`SubscriptionSlot`]; whoever claims it is
//!   the only one allowed to dispose it or publish a terminal message.
//! - Nothing reaches the subscriber once the worker is `Terminated`.
//! - A subscriber that closes mid-stream stops the worker on the next line,
//!   without a terminal message.

mod protocol;
mod subscription;

use std::ops::ControlFlow;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use protocol::Initialize;
pub(crate) use protocol::{Command, Envelope, Reply, SourceEvent};
pub(crate) use subscription::{Subscription, SubscriptionSlot};

use crate::config::{ErrorPolicy, WorkerConfig};
use crate::error::{CommandError, ProtocolViolation, SourceError};
use crate::source::LogSourceRef;
use crate::subscriber::SubscriberRef;
use crate::types::{
    EndOfStream, ErrorNotification, LogEntry, StreamMessage, StreamTarget, WorkerState,
};

/// Data held while streaming.
struct Streaming {
    target: StreamTarget,
    subscriber: SubscriberRef,
    subscription: SubscriptionSlot,
}

enum Phase {
    Uninitialized,
    Streaming(Streaming),
    Terminated,
}

impl Phase {
    fn state(&self) -> WorkerState {
        match self {
            Phase::Uninitialized => WorkerState::Uninitialized,
            Phase::Streaming(_) => WorkerState::Streaming,
            Phase::Terminated => WorkerState::Terminated,
        }
    }
}

pub struct StreamWorker {
    phase: Phase,
    source: LogSourceRef,
    config: WorkerConfig,
    /// Handed to the subscription pump; weak so that dropping every handle
    /// of an idle worker lets it exit.
    mailbox: mpsc::WeakSender<Envelope>,
    state: watch::Sender<WorkerState>,
}

impl StreamWorker {
    /// Spawns a detached worker and returns its handle.
    pub fn spawn(source: LogSourceRef, config: WorkerConfig) -> WorkerHandle {
        let (handle, _join) = Self::spawn_with_shutdown(source, config, CancellationToken::new());
        handle
    }

    /// Spawns a worker that also stops when `shutdown` is cancelled.
    pub(crate) fn spawn_with_shutdown(
        source: LogSourceRef,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> (WorkerHandle, JoinHandle<()>) {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(WorkerState::Uninitialized);

        let worker = StreamWorker {
            phase: Phase::Uninitialized,
            source,
            config,
            mailbox: mailbox_tx.downgrade(),
            state: state_tx,
        };
        let join = tokio::spawn(worker.run(mailbox_rx, shutdown));

        let handle = WorkerHandle {
            mailbox: mailbox_tx,
            state: state_rx,
        };
        (handle, join)
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<Envelope>, shutdown: CancellationToken) {
        loop {
            let envelope = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Worker shutdown requested in state {}", self.phase.state());
                    break;
                }
                envelope = mailbox.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let flow = match envelope {
                Envelope::Command { command, reply } => self.handle_command(command, reply),
                Envelope::Source(event) => self.handle_source_event(event),
            };
            if flow.is_break() {
                break;
            }
        }
        // Teardown happens in Drop so that a panicking handler releases the
        // subscription too.
    }

    fn handle_command(&mut self, command: Command, reply: Reply) -> ControlFlow<()> {
        let name = command.name();
        let state = self.phase.state();
        let (result, flow) = match (state, command) {
            (WorkerState::Uninitialized, Command::Initialize(init)) => {
                (self.initialize(init), ControlFlow::Continue(()))
            }
            (WorkerState::Streaming, Command::Cancel) => self.cancel(),
            (state, _) => (
                Err(ProtocolViolation::for_state(state).into()),
                ControlFlow::Continue(()),
            ),
        };
        if let Err(e) = &result {
            debug!("Rejected {} command: {}", name, e);
        }
        // The issuer may have stopped waiting.
        let _ = reply.send(result);
        flow
    }

    fn initialize(&mut self, init: Initialize) -> Result<(), CommandError> {
        init.validate()?;
        let Some(mailbox) = self.mailbox.upgrade() else {
            return Err(ProtocolViolation::Terminated.into());
        };

        let Initialize { target, subscriber } = init;
        let lines = self.source.subscribe(&target);
        let subscription = Subscription::open(target.clone(), lines, mailbox);
        info!("[{}] Started streaming logs", target);

        self.transition(Phase::Streaming(Streaming {
            target,
            subscriber,
            subscription: SubscriptionSlot::holding(subscription),
        }));
        Ok(())
    }

    fn cancel(&mut self) -> (Result<(), CommandError>, ControlFlow<()>) {
        if let Phase::Streaming(streaming) = &mut self.phase {
            match streaming.subscription.claim() {
                Some(subscription) => {
                    info!("[{}] Log streaming cancelled", streaming.target);
                    subscription.dispose();
                }
                None => debug!(
                    "[{}] Cancel found subscription already released",
                    streaming.target
                ),
            }
        }
        self.transition(Phase::Terminated);
        (Ok(()), ControlFlow::Break(()))
    }

    fn handle_source_event(&mut self, event: SourceEvent) -> ControlFlow<()> {
        let state = self.phase.state();
        let Phase::Streaming(streaming) = &mut self.phase else {
            debug!("Discarding {:?} received in state {}", event, state);
            return ControlFlow::Continue(());
        };

        match event {
            SourceEvent::Line(_) if streaming.subscriber.is_closed() => {
                self.subscriber_gone();
                ControlFlow::Break(())
            }
            SourceEvent::Line(line) => {
                streaming.subscriber.deliver(StreamMessage::LogEntry(LogEntry {
                    target: streaming.target.clone(),
                    line,
                    received_at: Utc::now(),
                }));
                ControlFlow::Continue(())
            }
            SourceEvent::Failed(cause) => self.stream_failed(cause),
            SourceEvent::Completed => self.stream_completed(),
        }
    }

    fn stream_failed(&mut self, cause: SourceError) -> ControlFlow<()> {
        let Phase::Streaming(streaming) = &mut self.phase else {
            return ControlFlow::Continue(());
        };
        let Some(subscription) = streaming.subscription.claim() else {
            return ControlFlow::Continue(());
        };

        match self.config.error_policy {
            ErrorPolicy::Reporting => {
                warn!("[{}] Log stream failed: {}", streaming.target, cause);
                streaming
                    .subscriber
                    .deliver(StreamMessage::Error(ErrorNotification {
                        target: streaming.target.clone(),
                        cause,
                    }));
            }
            ErrorPolicy::Silent => {
                debug!(
                    "[{}] Log stream failed, not reporting: {}",
                    streaming.target, cause
                );
            }
        }
        subscription.dispose();
        self.transition(Phase::Terminated);
        ControlFlow::Break(())
    }

    fn stream_completed(&mut self) -> ControlFlow<()> {
        let Phase::Streaming(streaming) = &mut self.phase else {
            return ControlFlow::Continue(());
        };
        let Some(subscription) = streaming.subscription.claim() else {
            return ControlFlow::Continue(());
        };

        info!("[{}] Log stream ended", streaming.target);
        streaming
            .subscriber
            .deliver(StreamMessage::EndOfStream(EndOfStream {
                target: streaming.target.clone(),
            }));
        subscription.dispose();
        self.transition(Phase::Terminated);
        ControlFlow::Break(())
    }

    /// The subscriber can no longer receive anything: stop like an external
    /// kill, with no terminal message.
    fn subscriber_gone(&mut self) {
        if let Phase::Streaming(streaming) = &mut self.phase
            && let Some(subscription) = streaming.subscription.claim()
        {
            info!("[{}] Subscriber gone, stopping", streaming.target);
            subscription.dispose();
        }
        self.transition(Phase::Terminated);
    }

    fn transition(&mut self, phase: Phase) {
        let state = phase.state();
        self.phase = phase;
        self.state.send_replace(state);
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        if let Phase::Streaming(streaming) = &mut self.phase
            && let Some(subscription) = streaming.subscription.claim()
        {
            info!("[{}] Worker stopped while streaming", streaming.target);
            subscription.dispose();
        }
        self.transition(Phase::Terminated);
    }
}

/// Caller-side reference to a running [`StreamWorker`].
///
/// Cheap to clone. Results of `initialize` and `cancel` come back to the
/// caller; stream output goes only to the subscriber.
#[derive(Clone)]
pub struct WorkerHandle {
    mailbox: mpsc::Sender<Envelope>,
    state: watch::Receiver<WorkerState>,
}

impl WorkerHandle {
    pub async fn initialize(&self, init: Initialize) -> Result<(), CommandError> {
        self.request(Command::Initialize(init)).await
    }

    pub async fn cancel(&self) -> Result<(), CommandError> {
        self.request(Command::Cancel).await
    }

    async fn request(&self, command: Command) -> Result<(), CommandError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(Envelope::Command { command, reply })
            .await
            .map_err(|_| ProtocolViolation::Terminated)?;
        // A dropped reply means the worker stopped before reaching the command.
        response.await.map_err(|_| ProtocolViolation::Terminated)?
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == WorkerState::Terminated
    }

    /// Resolves once the worker has reached [`WorkerState::Terminated`].
    pub async fn terminated(&self) {
        let mut state = self.state.clone();
        // Err means the worker is gone, which also means terminated.
        let _ = state
            .wait_for(|state| *state == WorkerState::Terminated)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLogSource;
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn setup() -> (Arc<MemoryLogSource>, WorkerHandle) {
        let source = Arc::new(MemoryLogSource::new());
        let handle = StreamWorker::spawn(source.clone(), WorkerConfig::default());
        (source, handle)
    }

    #[tokio::test]
    async fn test_starts_uninitialized() {
        let (_source, handle) = setup();
        assert_eq!(handle.state(), WorkerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_cancel_before_initialize_is_not_initialized() {
        let (source, handle) = setup();
        let err = handle.cancel().await.unwrap_err();
        assert_eq!(err.violation(), Some(ProtocolViolation::NotInitialized));
        assert_eq!(handle.state(), WorkerState::Uninitialized);
        assert_eq!(source.subscriptions_opened(), 0);
    }

    #[tokio::test]
    async fn test_double_initialize_keeps_subscription() {
        let (source, handle) = setup();
        let target = StreamTarget::new("web-1", "default");
        let feed = source.feed(target.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber: SubscriberRef = Arc::new(tx);

        handle
            .initialize(Initialize::for_target(target.clone(), subscriber.clone()))
            .await
            .unwrap();
        assert_eq!(handle.state(), WorkerState::Streaming);

        let err = handle
            .initialize(Initialize::for_target(target, subscriber))
            .await
            .unwrap_err();
        assert_eq!(err.violation(), Some(ProtocolViolation::AlreadyInitialized));
        assert_eq!(handle.state(), WorkerState::Streaming);
        assert_eq!(source.subscriptions_opened(), 1);

        feed.line("still flowing");
        let msg = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(msg, StreamMessage::LogEntry(ref e) if e.line == "still flowing"));
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_invalid_argument() {
        let (source, handle) = setup();
        let (tx, rx) = mpsc::unbounded_channel::<StreamMessage>();
        drop(rx);
        let err = handle
            .initialize(Initialize::new("web-1", "default", Arc::new(tx)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidArgument {
                argument: "subscriber",
                ..
            }
        ));
        assert_eq!(handle.state(), WorkerState::Uninitialized);
        assert_eq!(source.subscriptions_opened(), 0);
    }

    #[tokio::test]
    async fn test_silent_policy_swallows_error() {
        let source = Arc::new(MemoryLogSource::new());
        let handle = StreamWorker::spawn(
            source.clone(),
            WorkerConfig::default().with_error_policy(ErrorPolicy::Silent),
        );
        let target = StreamTarget::new("web-1", "default");
        let feed = source.feed(target.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle
            .initialize(Initialize::for_target(target, Arc::new(tx)))
            .await
            .unwrap();
        feed.line("before");
        feed.fail(SourceError::Other("timeout".to_string()));

        tokio::time::timeout(WAIT, handle.terminated()).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, StreamMessage::LogEntry(ref e) if e.line == "before"));
        // Worker dropped its subscriber, so the channel ends without an error message.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_idle_worker() {
        let source = Arc::new(MemoryLogSource::new());
        let (handle, join) = StreamWorker::spawn_with_shutdown(
            source,
            WorkerConfig::default(),
            CancellationToken::new(),
        );
        let observer = handle.state.clone();
        drop(handle);
        tokio::time::timeout(WAIT, join).await.unwrap().unwrap();
        assert_eq!(*observer.borrow(), WorkerState::Terminated);
    }

    #[tokio::test]
    async fn test_shutdown_token_disposes_subscription() {
        let source = Arc::new(MemoryLogSource::new());
        let shutdown = CancellationToken::new();
        let (handle, join) = StreamWorker::spawn_with_shutdown(
            source.clone(),
            WorkerConfig::default(),
            shutdown.clone(),
        );
        let target = StreamTarget::new("web-1", "default");
        let feed = source.feed(target.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle
            .initialize(Initialize::for_target(target, Arc::new(tx)))
            .await
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(WAIT, join).await.unwrap().unwrap();
        assert!(handle.is_terminated());

        tokio::time::timeout(WAIT, async {
            while !feed.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(source.subscriptions_closed(), 1);
        // External kill publishes no terminal message.
        assert!(rx.recv().await.is_none());
    }
}
