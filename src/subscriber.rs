use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::types::StreamMessage;

/// Receives the messages produced by stream workers.
///
/// Delivery is fire-and-forget: `deliver` must not block and never replies
/// to the worker.
pub trait Subscriber: Send + Sync + 'static {
    fn deliver(&self, message: StreamMessage);

    /// A subscriber that can no longer receive anything. Workers refuse to
    /// initialise against one.
    fn is_closed(&self) -> bool {
        false
    }
}

pub type SubscriberRef = Arc<dyn Subscriber>;

impl Subscriber for mpsc::UnboundedSender<StreamMessage> {
    fn deliver(&self, message: StreamMessage) {
        if self.send(message).is_err() {
            warn!("Subscriber channel closed; dropping message");
        }
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

impl Subscriber for mpsc::Sender<StreamMessage> {
    fn deliver(&self, message: StreamMessage) {
        match self.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!("[{}] Subscriber channel full; dropping message", message.target());
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                warn!("[{}] Subscriber channel closed; dropping message", message.target());
            }
        }
    }

    fn is_closed(&self) -> bool {
        mpsc::Sender::is_closed(self)
    }
}
