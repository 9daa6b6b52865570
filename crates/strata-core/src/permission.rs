//! Tool permission resolution.
//!
//! The resolver compiles a [`PermissionPolicy`] document into matchers and
//! answers `resolve(tool_id)` with allow/ask/deny. Matching is
//! longest-pattern-wins across the three lists; an exact id beats a prefix
//! glob of the same stem, and ties between decisions fall toward the more
//! restrictive one (deny > ask > allow). Tools nothing matches get the
//! policy default, which itself defaults to `ask`.

use strata_types::permission::{PermissionDecision, PermissionPolicy};

// ---------------------------------------------------------------------------
// PermissionResolver
// ---------------------------------------------------------------------------

/// Maps tool identifiers to permission decisions.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    patterns: Vec<(String, PermissionDecision)>,
    default: PermissionDecision,
}

impl PermissionResolver {
    /// Build a resolver from a policy document.
    pub fn new(policy: PermissionPolicy) -> Self {
        let mut patterns = Vec::with_capacity(
            policy.allow.len() + policy.ask.len() + policy.deny.len(),
        );
        for p in policy.allow {
            patterns.push((p, PermissionDecision::Allow));
        }
        for p in policy.ask {
            patterns.push((p, PermissionDecision::Ask));
        }
        for p in policy.deny {
            patterns.push((p, PermissionDecision::Deny));
        }
        Self {
            patterns,
            default: policy.default,
        }
    }

    /// A resolver that answers `ask` for everything (no policy on disk).
    pub fn ask_everything() -> Self {
        Self::new(PermissionPolicy::default())
    }

    /// Resolve a tool identifier to a decision.
    pub fn resolve(&self, tool_id: &str) -> PermissionDecision {
        let mut best: Option<(usize, PermissionDecision)> = None;
        for (pattern, decision) in &self.patterns {
            let Some(strength) = match_strength(pattern, tool_id) else {
                continue;
            };
            let replace = match best {
                None => true,
                Some((current, current_decision)) => {
                    strength > current
                        || (strength == current
                            && restrictiveness(*decision) > restrictiveness(current_decision))
                }
            };
            if replace {
                best = Some((strength, *decision));
            }
        }
        best.map(|(_, d)| d).unwrap_or(self.default)
    }
}

/// Match strength of a pattern against a tool id, or None on no match.
///
/// An exact match outranks a glob with the same prefix length.
fn match_strength(pattern: &str, tool_id: &str) -> Option<usize> {
    if let Some(prefix) = pattern.strip_suffix('*') {
        tool_id.starts_with(prefix).then_some(2 * prefix.len())
    } else {
        (pattern == tool_id).then_some(2 * pattern.len() + 1)
    }
}

fn restrictiveness(decision: PermissionDecision) -> u8 {
    match decision {
        PermissionDecision::Allow => 0,
        PermissionDecision::Ask => 1,
        PermissionDecision::Deny => 2,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(allow: &[&str], ask: &[&str], deny: &[&str]) -> PermissionResolver {
        PermissionResolver::new(PermissionPolicy {
            allow: allow.iter().map(|s| s.to_string()).collect(),
            ask: ask.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
            default: PermissionDecision::Ask,
        })
    }

    #[test]
    fn exact_match_resolves() {
        let r = resolver(&["json:parse"], &[], &["shell:exec"]);
        assert_eq!(r.resolve("json:parse"), PermissionDecision::Allow);
        assert_eq!(r.resolve("shell:exec"), PermissionDecision::Deny);
    }

    #[test]
    fn unresolved_tool_defaults_to_ask() {
        let r = resolver(&["json:parse"], &[], &[]);
        assert_eq!(r.resolve("unknown:tool"), PermissionDecision::Ask);
        assert_eq!(
            PermissionResolver::ask_everything().resolve("anything"),
            PermissionDecision::Ask
        );
    }

    #[test]
    fn glob_prefix_matches() {
        let r = resolver(&["json:*"], &[], &[]);
        assert_eq!(r.resolve("json:parse"), PermissionDecision::Allow);
        assert_eq!(r.resolve("json:stringify"), PermissionDecision::Allow);
        assert_eq!(r.resolve("yaml:parse"), PermissionDecision::Ask);
    }

    #[test]
    fn longest_pattern_wins() {
        // fs:* allowed broadly, but fs:write:* must ask and fs:write:etc denied.
        let r = resolver(&["fs:*"], &["fs:write:*"], &["fs:write:etc"]);
        assert_eq!(r.resolve("fs:read"), PermissionDecision::Allow);
        assert_eq!(r.resolve("fs:write:home"), PermissionDecision::Ask);
        assert_eq!(r.resolve("fs:write:etc"), PermissionDecision::Deny);
    }

    #[test]
    fn exact_beats_glob_of_same_stem() {
        let r = resolver(&["net:fetch"], &[], &["net:fetch*"]);
        assert_eq!(r.resolve("net:fetch"), PermissionDecision::Allow);
        assert_eq!(r.resolve("net:fetchall"), PermissionDecision::Deny);
    }

    #[test]
    fn equal_strength_tie_falls_to_restrictive() {
        let r = resolver(&["db:*"], &[], &["db:*"]);
        assert_eq!(r.resolve("db:query"), PermissionDecision::Deny);
    }

    #[test]
    fn policy_default_deny_applies_to_unmatched() {
        let r = PermissionResolver::new(PermissionPolicy {
            allow: vec!["json:*".to_string()],
            ask: vec![],
            deny: vec![],
            default: PermissionDecision::Deny,
        });
        assert_eq!(r.resolve("json:parse"), PermissionDecision::Allow);
        assert_eq!(r.resolve("other:tool"), PermissionDecision::Deny);
    }
}
