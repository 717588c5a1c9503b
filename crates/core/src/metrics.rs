//! Metrics sinks.
//!
//! The manager emits a [`pv_protocol::Event`] for every state transition,
//! syncer call, retry and reconciliation change. How those events are
//! counted, exported or shown is up to the sink; the manager never formats
//! metrics itself.
//!
//! Sinks are called from worker tasks after the table lock is released, so
//! they must be cheap and must not block.
//!
//! # Example
//!
//! ```rust
//! use pv_core::metrics::MetricsSink;
//! use pv_protocol::Event;
//!
//! struct LoggingSink;
//!
//! impl MetricsSink for LoggingSink {
//!     fn emit(&self, event: &Event) {
//!         tracing::info!(?event, "process event");
//!     }
//! }
//! ```

use pv_protocol::Event;
use tokio::sync::mpsc;

/// Receives manager events.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn emit(&self, _event: &Event) {}
}

/// Forwards events into a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelMetricsSink {
    tx: mpsc::Sender<Event>,
}

impl ChannelMetricsSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// A sink and the receiving end of a channel with `capacity` slots.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl MetricsSink for ChannelMetricsSink {
    fn emit(&self, event: &Event) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(event.clone()) {
            tracing::trace!(process_id = %dropped.process_id(), "metrics channel full, event dropped");
        }
    }
}

impl<F> MetricsSink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn emit(&self, event: &Event) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pv_protocol::ProcessId;
    use std::sync::Arc;

    fn purged(id: &str) -> Event {
        Event::ProcessPurged {
            process_id: ProcessId::new(id).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_drops_when_full() {
        let (sink, mut rx) = ChannelMetricsSink::channel(2);

        sink.emit(&purged("a"));
        sink.emit(&purged("b"));
        sink.emit(&purged("c"));

        assert_eq!(rx.recv().await, Some(purged("a")));
        assert_eq!(rx.recv().await, Some(purged("b")));
        assert!(rx.try_recv().is_err(), "third event was dropped");
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelMetricsSink::channel(1);
        drop(rx);
        sink.emit(&purged("a"));
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |event: &Event| seen.lock().push(event.process_id().clone())
        };

        sink.emit(&purged("x"));
        NoopMetricsSink.emit(&purged("y"));

        assert_eq!(*seen.lock(), vec![ProcessId::new("x").unwrap()]);
    }
}
