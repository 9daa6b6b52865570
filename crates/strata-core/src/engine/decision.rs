//! HIL and AIL decision gates.
//!
//! Both gates follow the deferred pattern: build the request context, emit
//! the `decision_required` event, and only then start awaiting the command
//! queue. Emitting and blocking must never be fused into one step -- a
//! consumer that observes the event has to be able to unblock the engine by
//! enqueueing a command.
//!
//! The gates are policy-free: they translate commands into verdicts and
//! report timeouts; the executor decides what a timeout or rejection means
//! for the run.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use strata_types::command::DecisionCommand;
use strata_types::event::{DecisionType, EventKind};
use tokio::time::Instant;
use uuid::Uuid;

use crate::engine::queue::CommandQueue;
use crate::event::EventSink;

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Outcome of a HIL approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HilVerdict {
    Approved,
    Rejected { feedback: Option<String> },
    /// An abort command arrived while waiting for approval.
    Aborted { reason: Option<String> },
    TimedOut,
}

/// Outcome of an AIL review gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AilVerdict {
    Continue,
    Abort { reason: Option<String> },
    Replan { new_requirement: String },
    TimedOut,
}

// ---------------------------------------------------------------------------
// DecisionGate
// ---------------------------------------------------------------------------

/// Emits decision-required events and awaits the matching commands.
pub struct DecisionGate {
    queue: Arc<CommandQueue>,
    sink: EventSink,
}

impl DecisionGate {
    pub fn new(queue: Arc<CommandQueue>, sink: EventSink) -> Self {
        Self { queue, sink }
    }

    /// Run a HIL approval gate: emit the event, then await a response.
    ///
    /// Approval and permission-escalation responses resolve the gate;
    /// an abort command forces termination; unrelated commands are dropped
    /// with a log line and the wait continues on the remaining time.
    pub async fn await_approval(
        &self,
        context: Value,
        checkpoint_id: Option<Uuid>,
        timeout: Duration,
    ) -> HilVerdict {
        self.sink
            .emit(EventKind::DecisionRequired {
                decision_type: DecisionType::Hil,
                context,
                checkpoint_id,
            })
            .await;

        let deadline = Instant::now() + timeout;
        loop {
            let Some(cmd) = self.take_until(deadline).await else {
                return HilVerdict::TimedOut;
            };
            match cmd {
                DecisionCommand::ApprovalResponse {
                    approved, feedback, ..
                } => {
                    return if approved {
                        HilVerdict::Approved
                    } else {
                        HilVerdict::Rejected { feedback }
                    };
                }
                DecisionCommand::PermissionEscalationResponse { approved, feedback } => {
                    return if approved {
                        HilVerdict::Approved
                    } else {
                        HilVerdict::Rejected { feedback }
                    };
                }
                DecisionCommand::Abort { reason } => {
                    return HilVerdict::Aborted { reason };
                }
                other => {
                    tracing::debug!(command = ?other, "ignoring command at HIL gate");
                }
            }
        }
    }

    /// Run an AIL review gate: emit the event, then await a verdict.
    pub async fn await_review(&self, context: Value, timeout: Duration) -> AilVerdict {
        self.sink
            .emit(EventKind::DecisionRequired {
                decision_type: DecisionType::Ail,
                context,
                checkpoint_id: None,
            })
            .await;

        let deadline = Instant::now() + timeout;
        loop {
            let Some(cmd) = self.take_until(deadline).await else {
                return AilVerdict::TimedOut;
            };
            match cmd {
                DecisionCommand::Continue { .. } => return AilVerdict::Continue,
                DecisionCommand::Abort { reason } => return AilVerdict::Abort { reason },
                DecisionCommand::ReplanDag { new_requirement } => {
                    return AilVerdict::Replan { new_requirement };
                }
                other => {
                    tracing::debug!(command = ?other, "ignoring command at AIL gate");
                }
            }
        }
    }

    /// Await the next command, bounded by the remaining time to deadline.
    async fn take_until(&self, deadline: Instant) -> Option<DecisionCommand> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        self.queue.await_command(remaining).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_types::event::ExecutionEvent;

    fn gate_with_stream(capacity: usize) -> (DecisionGate, crate::event::EventStream, Arc<CommandQueue>) {
        let queue = Arc::new(CommandQueue::new());
        let (sink, stream) = crate::event::channel(capacity);
        (DecisionGate::new(Arc::clone(&queue), sink), stream, queue)
    }

    fn approval(approved: bool) -> DecisionCommand {
        DecisionCommand::ApprovalResponse {
            approved,
            feedback: None,
            checkpoint_id: None,
        }
    }

    // -----------------------------------------------------------------------
    // Deferred pattern
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn event_is_observable_before_gate_unblocks() {
        let (gate, mut stream, queue) = gate_with_stream(8);

        // The responder only enqueues after it has seen the event, so the
        // gate must have emitted before it started waiting.
        let responder = tokio::spawn(async move {
            let event = stream.next().await.expect("decision event");
            match event.kind {
                EventKind::DecisionRequired { decision_type, .. } => {
                    assert_eq!(decision_type, DecisionType::Hil);
                }
                other => panic!("unexpected event: {other:?}"),
            }
            queue.enqueue(approval(true));
        });

        let verdict = gate
            .await_approval(json!({"layer_index": 0}), None, Duration::from_secs(2))
            .await;
        assert_eq!(verdict, HilVerdict::Approved);
        responder.await.unwrap();
    }

    // -----------------------------------------------------------------------
    // HIL verdicts
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn rejection_carries_feedback() {
        let (gate, _stream, queue) = gate_with_stream(8);
        queue.enqueue(DecisionCommand::ApprovalResponse {
            approved: false,
            feedback: Some("wrong layer".to_string()),
            checkpoint_id: None,
        });

        let verdict = gate
            .await_approval(json!({}), None, Duration::from_secs(1))
            .await;
        assert_eq!(
            verdict,
            HilVerdict::Rejected {
                feedback: Some("wrong layer".to_string())
            }
        );
    }

    #[tokio::test]
    async fn escalation_response_resolves_approval_gate() {
        let (gate, _stream, queue) = gate_with_stream(8);
        queue.enqueue(DecisionCommand::PermissionEscalationResponse {
            approved: true,
            feedback: None,
        });

        let verdict = gate
            .await_approval(json!({}), None, Duration::from_secs(1))
            .await;
        assert_eq!(verdict, HilVerdict::Approved);
    }

    #[tokio::test]
    async fn abort_command_forces_hil_abort() {
        let (gate, _stream, queue) = gate_with_stream(8);
        queue.enqueue(DecisionCommand::Abort {
            reason: Some("operator abort".to_string()),
        });

        let verdict = gate
            .await_approval(json!({}), None, Duration::from_secs(1))
            .await;
        assert_eq!(
            verdict,
            HilVerdict::Aborted {
                reason: Some("operator abort".to_string())
            }
        );
    }

    #[tokio::test]
    async fn unrelated_commands_are_skipped_not_consumed_as_verdicts() {
        let (gate, _stream, queue) = gate_with_stream(8);
        queue.enqueue(DecisionCommand::Continue { reason: None });
        queue.enqueue(approval(true));

        let verdict = gate
            .await_approval(json!({}), None, Duration::from_secs(1))
            .await;
        assert_eq!(verdict, HilVerdict::Approved);
    }

    #[tokio::test]
    async fn hil_times_out_without_command() {
        let (gate, _stream, _queue) = gate_with_stream(8);
        let verdict = gate
            .await_approval(json!({}), None, Duration::from_millis(100))
            .await;
        assert_eq!(verdict, HilVerdict::TimedOut);
    }

    // -----------------------------------------------------------------------
    // AIL verdicts
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn review_maps_commands_to_verdicts() {
        let (gate, _stream, queue) = gate_with_stream(8);

        queue.enqueue(DecisionCommand::Continue { reason: None });
        assert_eq!(
            gate.await_review(json!({}), Duration::from_secs(1)).await,
            AilVerdict::Continue
        );

        queue.enqueue(DecisionCommand::Abort {
            reason: Some("x".to_string()),
        });
        assert_eq!(
            gate.await_review(json!({}), Duration::from_secs(1)).await,
            AilVerdict::Abort {
                reason: Some("x".to_string())
            }
        );

        queue.enqueue(DecisionCommand::ReplanDag {
            new_requirement: "split step 2".to_string(),
        });
        assert_eq!(
            gate.await_review(json!({}), Duration::from_secs(1)).await,
            AilVerdict::Replan {
                new_requirement: "split step 2".to_string()
            }
        );
    }

    #[tokio::test]
    async fn review_emits_ail_event_then_times_out() {
        let (gate, mut stream, _queue) = gate_with_stream(8);

        let verdict = gate
            .await_review(json!({"layer_index": 2}), Duration::from_millis(80))
            .await;
        assert_eq!(verdict, AilVerdict::TimedOut);

        let event: ExecutionEvent = stream.next().await.unwrap();
        match event.kind {
            EventKind::DecisionRequired { decision_type, context, .. } => {
                assert_eq!(decision_type, DecisionType::Ail);
                assert_eq!(context["layer_index"], 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
