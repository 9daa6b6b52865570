//! Tool permission policy document.
//!
//! The policy enumerates tool-id patterns under three decisions. Patterns
//! are exact ids (`fs:write`) or prefix globs (`fs:*`). Tools that no
//! pattern matches fall back to the document default, and a missing default
//! means `ask` -- the safe choice, forcing a HIL gate before the tool runs.

use serde::{Deserialize, Serialize};

/// Decision for a resolved tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    /// Run without an approval gate.
    Allow,
    /// Require HIL approval before the layer runs.
    #[default]
    Ask,
    /// Fail the task with a permanent error before invocation.
    Deny,
}

/// The persisted permission document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub ask: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    /// Decision for tools no pattern matches. Missing means `ask`.
    #[serde(default)]
    pub default: PermissionDecision,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
