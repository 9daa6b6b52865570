//! Bounded-responsibility FIFO queue for out-of-band decision commands.
//!
//! External callers enqueue; only the executor's decision gates take.
//! `await_command` relies on the channel's wait primitive -- a timed-out
//! wait consumes O(1) wakeups and leaves the queue untouched. The receiver
//! sits behind a fair async mutex, so concurrent awaiters drain commands in
//! enqueue order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use strata_types::command::{CommandError, DecisionCommand};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// FIFO queue of [`DecisionCommand`]s with an awaitable, at-most-once take.
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<DecisionCommand>,
    rx: Mutex<mpsc::UnboundedReceiver<DecisionCommand>>,
    total: AtomicU64,
    processed: AtomicU64,
}

/// Queue counters: commands ever enqueued and commands taken by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub total_commands: u64,
    pub processed_commands: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            total: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        }
    }

    /// Append a command to the tail. Never blocks.
    pub fn enqueue(&self, cmd: DecisionCommand) {
        self.total.fetch_add(1, Ordering::Relaxed);
        // The receiver lives as long as the queue, so send cannot fail.
        let _ = self.tx.send(cmd);
    }

    /// Validate raw JSON and enqueue it. Invalid commands are rejected
    /// without touching the queue.
    pub fn ingest(&self, raw: Value) -> Result<(), CommandError> {
        let cmd = DecisionCommand::from_value(raw)?;
        self.enqueue(cmd);
        Ok(())
    }

    /// Take the head command, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the timeout elapses; nothing is consumed in that
    /// case. A command enqueued before the call returns immediately.
    pub async fn await_command(&self, timeout: Duration) -> Option<DecisionCommand> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(cmd)) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                Some(cmd)
            }
            // Sender is owned by `self`, so the channel never closes while
            // the queue is alive; this arm is unreachable in practice.
            Ok(None) => None,
            Err(_elapsed) => None,
        }
    }

    /// Drain all queued commands without blocking.
    pub fn drain(&self) -> Vec<DecisionCommand> {
        let mut rx = match self.rx.try_lock() {
            Ok(rx) => rx,
            // An awaiter holds the receiver; it will consume the head.
            Err(_) => return Vec::new(),
        };
        let mut drained = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            drained.push(cmd);
        }
        self.processed
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_commands: self.total.load(Ordering::Relaxed),
            processed_commands: self.processed.load(Ordering::Relaxed),
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CommandQueue")
            .field("total_commands", &stats.total_commands)
            .field("processed_commands", &stats.processed_commands)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
