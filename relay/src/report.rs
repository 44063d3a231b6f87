//! Completion reporting.
//!
//! The pipeline only computes the completion event. What happens to it is
//! decided by the [`ReportSink`] passed to [`Pipeline::spawn`](crate::Pipeline::spawn).

use std::io::Write;
use std::sync::mpsc::Sender;

use parking_lot::Mutex;
use serde::Serialize;

use crate::operation::{OpId, Operation};
use crate::time::{Duration, Millis};
use crate::trace::{info, warn};

/// A finalized operation and its end-to-end latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    pub id: OpId,
    /// Client that finalized the operation.
    pub client: usize,
    /// `completion_time - dispatch_time`, truncated to whole milliseconds.
    pub latency: Duration<Millis>,
}

impl CompletionEvent {
    /// Builds the event for a finalized record, `None` if it is not finalized.
    #[must_use]
    pub fn from_operation(op: &Operation, client: usize) -> Option<Self> {
        Some(Self {
            id: op.id(),
            client,
            latency: op.latency()?,
        })
    }
}

#[derive(Serialize)]
struct CompletionLine {
    id: OpId,
    client: usize,
    latency_ms: u64,
}

impl Serialize for CompletionEvent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CompletionLine {
            id: self.id,
            client: self.client,
            latency_ms: self.latency.as_u64(),
        }
        .serialize(serializer)
    }
}

/// Receives one event per finalized operation.
///
/// Called from client stage threads, possibly concurrently.
pub trait ReportSink: Send + Sync {
    fn completed(&self, event: CompletionEvent);
}

impl<F> ReportSink for F
where
    F: Fn(CompletionEvent) + Send + Sync,
{
    fn completed(&self, event: CompletionEvent) {
        self(event);
    }
}

/// Emits completions as `info` events. Silent without the `tracing` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn completed(&self, event: CompletionEvent) {
        info!(
            id = %event.id,
            client = event.client,
            latency_ms = event.latency.as_u64(),
            "operation completed"
        );
    }
}

/// Prints one human-readable line per completion to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn completed(&self, event: CompletionEvent) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not take a client stage down with it.
        let written = writeln!(
            out,
            "Operation {} is ready to be read! It took {} millisecs",
            event.id,
            event.latency.as_u64()
        );
        if written.is_err() {
            warn!(id = %event.id, "failed to write completion line");
        }
    }
}

/// Forwards completions over a [`std::sync::mpsc`] channel.
///
/// Events are dropped once the receiver is gone.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Sender<CompletionEvent>>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: Sender<CompletionEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl ReportSink for ChannelSink {
    fn completed(&self, event: CompletionEvent) {
        let _ = self.tx.lock().send(event);
    }
}

/// Keeps every completion in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<CompletionEvent>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events received so far, in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<CompletionEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for CollectingSink {
    fn completed(&self, event: CompletionEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::time::now;

    fn event(id: i32, ms: u64) -> CompletionEvent {
        CompletionEvent {
            id: OpId::new(id),
            client: 0,
            latency: Duration::from_millis(ms),
        }
    }

    #[test]
    fn event_requires_finalized_record() {
        let start = now();
        let mut op = Operation::dispatched_at(OpId::new(4), start);
        assert!(CompletionEvent::from_operation(&op, 1).is_none());

        op.complete(start + std::time::Duration::from_millis(3));
        let ev = CompletionEvent::from_operation(&op, 1).unwrap();
        assert_eq!(ev.id, OpId::new(4));
        assert_eq!(ev.client, 1);
        // TSC conversion may land a hair either side of 3ms.
        assert!((2..=3).contains(&ev.latency.as_u64()));
    }

    #[test]
    fn collecting_sink_keeps_arrival_order() {
        let sink = CollectingSink::new();
        sink.completed(event(2, 1));
        sink.completed(event(0, 5));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events()[0].id, OpId::new(2));
        assert_eq!(sink.events()[1].id, OpId::new(0));
    }

    #[test]
    fn channel_sink_forwards_and_tolerates_closed_receiver() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.completed(event(1, 0));
        assert_eq!(rx.recv().unwrap(), event(1, 0));

        drop(rx);
        sink.completed(event(2, 0));
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let sink: Arc<dyn ReportSink> = Arc::new(move |_ev: CompletionEvent| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        sink.completed(event(0, 0));
        sink.completed(event(1, 0));
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn event_serializes_latency_in_millis() {
        let json = serde_json::to_string(&event(7, 12)).unwrap();
        assert_eq!(json, r#"{"id":7,"client":0,"latency_ms":12}"#);
    }
}
