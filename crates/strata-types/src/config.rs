//! Executor configuration.
//!
//! All knobs have serde defaults so a partial (or empty) TOML/JSON document
//! yields a working configuration: HIL and AIL enabled, AIL reviewing only
//! on errors, generous timeouts, unbounded intra-layer parallelism, and
//! checkpointing on.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default HIL approval timeout (10 minutes).
pub const DEFAULT_HIL_TIMEOUT_MS: u64 = 600_000;

/// Default AIL review timeout (2 minutes).
pub const DEFAULT_AIL_TIMEOUT_MS: u64 = 120_000;

/// Default per-task timeout (5 minutes).
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 300_000;

/// Default checkpoint I/O timeout (10 seconds).
pub const DEFAULT_CHECKPOINT_IO_TIMEOUT_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for a controlled run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub hil: HilConfig,
    #[serde(default)]
    pub ail: AilConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Maximum tasks running concurrently within a layer. None = unbounded.
    #[serde(default)]
    pub layer_parallelism: Option<usize>,
    /// Set to false to suppress checkpoints (ephemeral runs).
    #[serde(default = "default_true")]
    pub checkpoints: bool,
}

/// Human-in-the-loop gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HilConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `always` gates every layer; `never` leaves only the permission-driven
    /// trigger (an `ask` tool in the upcoming layer still fires the gate).
    #[serde(default)]
    pub approval_required: ApprovalRequired,
}

impl Default for HilConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            approval_required: ApprovalRequired::Never,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRequired {
    Always,
    #[default]
    Never,
}

/// Agent-in-the-loop gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AilConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub decision_points: DecisionPoints,
    /// What an AIL timeout maps to. Default: abort.
    #[serde(default)]
    pub timeout_action: AilTimeoutAction,
}

impl Default for AilConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decision_points: DecisionPoints::OnError,
            timeout_action: AilTimeoutAction::Abort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPoints {
    /// Review between every pair of layers.
    PerLayer,
    /// Review only after a layer with at least one failed task.
    #[default]
    OnError,
    /// Never review automatically.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AilTimeoutAction {
    #[default]
    Abort,
    Continue,
}

/// Timeouts for every blocking wait the engine performs, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_hil_timeout")]
    pub hil_ms: u64,
    #[serde(default = "default_ail_timeout")]
    pub ail_ms: u64,
    #[serde(default = "default_task_timeout")]
    pub task_ms: u64,
    #[serde(default = "default_checkpoint_io_timeout")]
    pub checkpoint_io_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            hil_ms: DEFAULT_HIL_TIMEOUT_MS,
            ail_ms: DEFAULT_AIL_TIMEOUT_MS,
            task_ms: DEFAULT_TASK_TIMEOUT_MS,
            checkpoint_io_ms: DEFAULT_CHECKPOINT_IO_TIMEOUT_MS,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_hil_timeout() -> u64 {
    DEFAULT_HIL_TIMEOUT_MS
}

fn default_ail_timeout() -> u64 {
    DEFAULT_AIL_TIMEOUT_MS
}

fn default_task_timeout() -> u64 {
    DEFAULT_TASK_TIMEOUT_MS
}

fn default_checkpoint_io_timeout() -> u64 {
    DEFAULT_CHECKPOINT_IO_TIMEOUT_MS
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ExecutorConfig = toml::from_str("").unwrap();
        assert!(config.hil.enabled);
        assert_eq!(config.hil.approval_required, ApprovalRequired::Never);
        assert!(config.ail.enabled);
        assert_eq!(config.ail.decision_points, DecisionPoints::OnError);
        assert_eq!(config.timeouts.hil_ms, DEFAULT_HIL_TIMEOUT_MS);
        assert!(config.layer_parallelism.is_none());
        assert!(config.checkpoints);
    }

    #[test]
    fn partial_toml_overrides_selected_knobs() {
        let doc = r#"
            layer_parallelism = 4

            [hil]
            approval_required = "always"

            [ail]
            decision_points = "per_layer"
            timeout_action = "continue"

            [timeouts]
            hil_ms = 500
        "#;
        let config: ExecutorConfig = toml::from_str(doc).unwrap();
        assert_eq!(config.hil.approval_required, ApprovalRequired::Always);
        assert_eq!(config.ail.decision_points, DecisionPoints::PerLayer);
        assert_eq!(config.ail.timeout_action, AilTimeoutAction::Continue);
        assert_eq!(config.timeouts.hil_ms, 500);
        assert_eq!(config.timeouts.ail_ms, DEFAULT_AIL_TIMEOUT_MS);
        assert_eq!(config.layer_parallelism, Some(4));
    }
}
