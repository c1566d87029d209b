use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use super::protocol::{Envelope, SourceEvent};
use crate::source::LineStream;
use crate::types::StreamTarget;

/// An open log source subscription.
///
/// A pump task reads the line stream and forwards every event into the
/// owning worker's mailbox. Disposing (or dropping) aborts the pump, which
/// drops the stream and with it the underlying connection.
pub(crate) struct Subscription {
    target: StreamTarget,
    pump: AbortHandle,
}

impl Subscription {
    pub(crate) fn open(
        target: StreamTarget,
        mut lines: LineStream,
        mailbox: mpsc::Sender<Envelope>,
    ) -> Self {
        let label = target.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = match lines.next().await {
                    Some(Ok(line)) => SourceEvent::Line(line),
                    Some(Err(cause)) => SourceEvent::Failed(cause),
                    None => SourceEvent::Completed,
                };
                let terminal = event.is_terminal();
                if mailbox.send(Envelope::Source(event)).await.is_err() {
                    debug!("[{}] Worker mailbox closed, stopping pump", label);
                    return;
                }
                if terminal {
                    return;
                }
            }
        });

        Self {
            target,
            pump: handle.abort_handle(),
        }
    }

    pub(crate) fn dispose(self) {
        debug!("[{}] Disposing log subscription", self.target);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Holds at most one subscription and hands it out at most once.
///
/// Every path that disposes the subscription or publishes a terminal message
/// must first win [`SubscriptionSlot::claim`].
#[derive(Default)]
pub(crate) struct SubscriptionSlot(Option<Subscription>);

impl SubscriptionSlot {
    pub(crate) fn holding(subscription: Subscription) -> Self {
        Self(Some(subscription))
    }

    pub(crate) fn claim(&mut self) -> Option<Subscription> {
        self.0.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLogSource;
    use crate::source::LogSource;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pump_forwards_in_order_then_completes() {
        let source = MemoryLogSource::new();
        let target = StreamTarget::new("web-1", "default");
        let feed = source.feed(target.clone());
        feed.line("a");
        feed.line("b");
        feed.complete();

        let (tx, mut rx) = mpsc::channel(8);
        let _subscription = Subscription::open(target.clone(), source.subscribe(&target), tx);

        let mut seen = Vec::new();
        while let Some(Envelope::Source(event)) = rx.recv().await {
            let terminal = event.is_terminal();
            seen.push(format!("{:?}", event));
            if terminal {
                break;
            }
        }
        assert_eq!(seen, vec!["Line(\"a\")", "Line(\"b\")", "Completed"]);
    }

    #[tokio::test]
    async fn test_claim_is_once() {
        let source = MemoryLogSource::new();
        let target = StreamTarget::new("web-1", "default");
        let feed = source.feed(target.clone());
        let (tx, _rx) = mpsc::channel(8);

        let mut slot = SubscriptionSlot::holding(Subscription::open(
            target.clone(),
            source.subscribe(&target),
            tx,
        ));
        let subscription = slot.claim().expect("first claim wins");
        assert!(slot.claim().is_none());

        subscription.dispose();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !feed.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream released after dispose");
        assert_eq!(source.subscriptions_closed(), 1);
    }
}
