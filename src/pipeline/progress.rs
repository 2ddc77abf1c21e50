use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::models::ProgressEvent;

/// Receives progress events at stage boundaries
pub trait ProgressSink: Send {
    fn emit(&mut self, event: ProgressEvent);
}

/// Discards every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&mut self, _event: ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent) + Send,
{
    fn emit(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Forwards events into a channel; a dropped receiver is not an error
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&mut self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress receiver dropped; event discarded");
        }
    }
}
