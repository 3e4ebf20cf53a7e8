//! Where a session's [`StatusUpdate`]s go.

use genctl_core::status::StatusUpdate;
use tokio::sync::broadcast;

/// Observer of one session's status stream.
///
/// Called from the session task, possibly at high frequency. Must not
/// block.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, update: StatusUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(StatusUpdate) + Send + Sync,
{
    fn publish(&self, update: StatusUpdate) {
        self(update)
    }
}

/// Fans status updates out to any number of subscribers.
///
/// Slow subscribers lag and miss updates rather than stalling the session.
#[derive(Clone)]
pub struct ChannelSink {
    sender: broadcast::Sender<StatusUpdate>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.sender.subscribe()
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, update: StatusUpdate) {
        // No subscribers is fine.
        let _ = self.sender.send(update);
    }
}
