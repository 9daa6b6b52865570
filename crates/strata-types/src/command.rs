//! Out-of-band decision commands fed to the engine.
//!
//! Commands are externally supplied JSON, tagged by `kind`. Validation is
//! tolerant of unknown keys (forward compatibility) but strict about the
//! discriminator and the declared types of known optional fields. A bad
//! command must never crash the engine -- it is rejected at ingest.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// DecisionCommand
// ---------------------------------------------------------------------------

/// A decision command enqueued by a human operator or a reviewing agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionCommand {
    /// Response to a HIL approval request.
    ApprovalResponse {
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
        #[serde(
            rename = "checkpointId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        checkpoint_id: Option<String>,
    },
    /// AIL verdict: proceed with the next layer.
    Continue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Abort the workflow.
    Abort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// AIL verdict: terminate the run and request a replanned DAG.
    ReplanDag { new_requirement: String },
    /// Response to a permission-escalation request raised at a HIL gate.
    PermissionEscalationResponse {
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
}

impl DecisionCommand {
    /// Validate and parse a raw JSON value into a command.
    ///
    /// Accepts unknown keys alongside the declared fields; rejects a missing
    /// or unknown `kind`, and declared fields whose JSON type does not match.
    pub fn from_value(raw: Value) -> Result<Self, CommandError> {
        let kind_ok = raw
            .get("kind")
            .and_then(Value::as_str)
            .is_some_and(|k| !k.is_empty());
        if !kind_ok {
            return Err(CommandError::MissingKind);
        }
        serde_json::from_value(raw).map_err(|e| CommandError::Invalid(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// CommandError
// ---------------------------------------------------------------------------

/// Rejection reason for an externally-supplied command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The `kind` discriminator is missing, empty, or not a string.
    #[error("command-invalid: missing or empty 'kind'")]
    MissingKind,

    /// The payload does not match the declared shape for its kind.
    #[error("command-invalid: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
