//! Single-consumer event channel with back-pressure and monotone timestamps.
//!
//! The engine produces events; exactly one external reader consumes them.
//! The channel is bounded and `emit` awaits free capacity, so consumer
//! back-pressure suspends the engine rather than dropping events. The sink
//! stamps every event with an epoch-millis timestamp clamped to be
//! monotonically non-decreasing across the stream.

use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use futures_util::Stream;
use strata_types::event::{EventKind, ExecutionEvent};
use tokio::sync::mpsc;

/// Default bounded capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Create a connected sink/stream pair.
pub fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventSink {
            tx,
            last_ts: Arc::new(AtomicI64::new(0)),
        },
        EventStream { rx },
    )
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Producer half. Cloning shares the timestamp clamp with the original.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ExecutionEvent>,
    last_ts: Arc<AtomicI64>,
}

impl EventSink {
    /// Stamp and emit an event, waiting for channel capacity if needed.
    ///
    /// Returns `false` when the consumer is gone; the engine treats that as
    /// a cancelled run.
    pub async fn emit(&self, kind: EventKind) -> bool {
        let now = Utc::now().timestamp_millis();
        let prev = self.last_ts.fetch_max(now, Ordering::AcqRel);
        let event = ExecutionEvent {
            timestamp: now.max(prev),
            kind,
        };
        self.tx.send(event).await.is_ok()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Consumer half: the lazy event sequence handed to the gateway.
pub struct EventStream {
    rx: mpsc::Receiver<ExecutionEvent>,
}

impl EventStream {
    /// Receive the next event; `None` once the run has terminated and the
    /// buffer is drained.
    pub async fn next(&mut self) -> Option<ExecutionEvent> {
        self.rx.recv().await
    }

    /// Drain the remaining stream into a vector. Test helper.
    pub async fn collect(mut self) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = ExecutionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
