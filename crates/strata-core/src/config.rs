//! Configuration document loading.
//!
//! The executor configuration and the permission policy are both persisted
//! as TOML documents alongside the engine. Parsing lives here so the types
//! crate stays free of parser dependencies.

use strata_types::config::ExecutorConfig;
use strata_types::permission::PermissionPolicy;

/// Configuration document parse failure.
#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(String);

/// Parse an [`ExecutorConfig`] from a TOML document.
pub fn load_config(document: &str) -> Result<ExecutorConfig, ConfigError> {
    toml::from_str(document).map_err(|e| ConfigError(e.to_string()))
}

/// Parse a [`PermissionPolicy`] from a TOML document.
pub fn load_policy(document: &str) -> Result<PermissionPolicy, ConfigError> {
    toml::from_str(document).map_err(|e| ConfigError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::config::ApprovalRequired;
    use strata_types::permission::PermissionDecision;

    #[test]
    fn loads_full_config_document() {
        let config = load_config(
            r#"
            [hil]
            enabled = true
            approval_required = "always"

            [timeouts]
            hil_ms = 300
            "#,
        )
        .unwrap();
        assert_eq!(config.hil.approval_required, ApprovalRequired::Always);
        assert_eq!(config.timeouts.hil_ms, 300);
    }

    #[test]
    fn loads_policy_document() {
        let policy = load_policy(
            r#"
            allow = ["json:*"]
            deny = ["shell:exec"]
            "#,
        )
        .unwrap();
        assert_eq!(policy.allow, vec!["json:*"]);
        assert_eq!(policy.default, PermissionDecision::Ask);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(load_config("hil = [").is_err());
        assert!(load_policy("allow = 3").is_err());
    }
}
