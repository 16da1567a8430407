use crate::common::Event;
use futures::stream::BoxStream;

/// A lazy, unbounded stream of recorder notifications. Delivery is
/// at-least-once; the same revision may arrive twice.
pub trait EventSource: Send {
    /// Consumes the source. A source cannot be restarted.
    fn into_stream(self: Box<Self>) -> BoxStream<'static, Event>;

    fn name(&self) -> &'static str;
}
