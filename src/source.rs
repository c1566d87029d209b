use std::sync::Arc;

use futures::stream::BoxStream;

use crate::error::SourceError;
use crate::types::StreamTarget;

/// Lines of one container log, in emission order.
///
/// The stream ending is a normal completion; an `Err` item is a failure and
/// nothing after it is read.
pub type LineStream = BoxStream<'static, Result<String, SourceError>>;

/// Something that can tail a container log.
///
/// Subscribing is cheap and lazy: connection problems surface as the first
/// `Err` item of the returned stream, not as a failure of `subscribe`.
/// Dropping the stream releases the underlying connection.
pub trait LogSource: Send + Sync + 'static {
    fn subscribe(&self, target: &StreamTarget) -> LineStream;
}

pub type LogSourceRef = Arc<dyn LogSource>;
