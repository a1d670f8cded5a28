//! Per-session ordered event stream.
//!
//! A transport hands one `EventStream` out per `connect()`; the matching
//! `EventSender` stays with whatever produces events (the bridge reader task
//! or the mock). Events arrive in the order they were sent.

use super::traits::{TransportError, TransportEvent, TransportResult};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Receiving side of a session's events
pub type EventStream = UnboundedReceiverStream<TransportEvent>;

/// New stream and the sender feeding it
pub fn event_channel() -> (EventStream, EventSender) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (UnboundedReceiverStream::new(receiver), EventSender { sender })
}

/// Producing side of a session's events
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSender {
    /// Fails with `NotConnected` once the consumer dropped the stream
    pub fn send(&self, event: TransportEvent) -> TransportResult<()> {
        self.sender
            .send(event)
            .map_err(|_| TransportError::NotConnected)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
