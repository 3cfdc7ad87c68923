//! Route permissions
//!
//! `import` governs what this node is willing to receive from its peers,
//! `export` governs what it is willing to send them.

use super::subject::{covers, intersects, matches, FULL_WILDCARD, SINGLE_WILDCARD};
use serde::{Deserialize, Serialize};

/// Allow/deny subject pattern lists
///
/// A subject passes when some allow pattern matches it and no deny pattern
/// does. An empty allow list lets nothing through. A lone `*` or `>` in the
/// allow list lets everything through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPermission {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl SubjectPermission {
    pub fn new(allow: Vec<String>) -> Self {
        Self {
            allow,
            deny: Vec::new(),
        }
    }

    pub fn allow_all() -> Self {
        Self::new(vec![SINGLE_WILDCARD.to_string()])
    }

    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn with_deny(mut self, deny: Vec<String>) -> Self {
        self.deny = deny;
        self
    }

    pub fn is_allow_all(&self) -> bool {
        self.allow
            .iter()
            .any(|p| p == SINGLE_WILDCARD || p == FULL_WILDCARD)
    }

    pub fn is_deny_all(&self) -> bool {
        self.allow.is_empty()
    }

    /// Check a literal message subject
    pub fn allows(&self, subject: &str) -> bool {
        if self.deny.iter().any(|d| matches(d, subject)) {
            return false;
        }
        self.is_allow_all() || self.allow.iter().any(|a| matches(a, subject))
    }

    /// Check a subscription pattern
    ///
    /// Interest passes if it can match at least one allowed subject and is not
    /// entirely covered by a deny pattern. Individual messages are still
    /// filtered with [`allows`](Self::allows).
    pub fn allows_interest(&self, pattern: &str) -> bool {
        if self.deny.iter().any(|d| covers(d, pattern)) {
            return false;
        }
        self.is_allow_all() || self.allow.iter().any(|a| intersects(a, pattern))
    }

    /// Add an allow pattern; false if it was already present
    pub fn add_allow(&mut self, pattern: &str) -> bool {
        if self.allow.iter().any(|a| a == pattern) {
            return false;
        }
        self.allow.push(pattern.to_string());
        true
    }
}

/// Permissions applied to every route connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePermissions {
    pub import: SubjectPermission,
    pub export: SubjectPermission,
}

impl Default for RoutePermissions {
    fn default() -> Self {
        Self {
            import: SubjectPermission::allow_all(),
            export: SubjectPermission::allow_all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn perm(allow: &[&str]) -> SubjectPermission {
        SubjectPermission::new(allow.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_empty_allow_is_deny_all() {
        let p = SubjectPermission::deny_all();
        assert!(p.is_deny_all());
        assert!(!p.allows("dchat.dm.abc.msg"));
        assert!(!p.allows_interest(">"));
    }

    #[test]
    fn test_star_is_allow_all() {
        let p = SubjectPermission::allow_all();
        assert!(p.allows("dchat.grp.g1.msg"));
        assert!(p.allows_interest("dchat.>"));
    }

    #[test]
    fn test_allow_patterns() {
        let p = perm(&["dchat.dm.*.msg", "_INBOX.*"]);
        assert!(p.allows("dchat.dm.abc.msg"));
        assert!(p.allows("_INBOX.xyz"));
        assert!(!p.allows("dchat.grp.g1.msg"));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let p = perm(&[">"]).with_deny(vec!["secret.>".to_string()]);
        assert!(p.allows("public.a"));
        assert!(!p.allows("secret.a"));
        assert!(!p.allows_interest("secret.*"));
        assert!(p.allows_interest(">"));
    }

    #[test]
    fn test_interest_filtering() {
        let p = perm(&["dchat.dm.*.msg"]);
        assert!(p.allows_interest("dchat.dm.*.msg"));
        assert!(p.allows_interest("dchat.dm.abc.msg"));
        assert!(p.allows_interest("dchat.>"));
        assert!(!p.allows_interest("dchat.grp.*.msg"));
    }

    #[test]
    fn test_add_allow_is_idempotent() {
        let mut p = perm(&["a.*"]);
        assert!(p.add_allow("b.*"));
        assert!(!p.add_allow("b.*"));
        assert_eq!(p.allow, vec!["a.*".to_string(), "b.*".to_string()]);
    }

    fn pattern() -> impl Strategy<Value = String> {
        (
            prop::collection::vec(prop_oneof!["[abc]", Just("*".to_string())], 1..4),
            any::<bool>(),
        )
            .prop_map(|(mut tokens, tail)| {
                if tail {
                    tokens.push(">".to_string());
                }
                tokens.join(".")
            })
    }

    proptest! {
        #[test]
        fn prop_interest_agrees_with_allows_for_literals(
            allow in pattern(),
            deny in pattern(),
            subject in prop::collection::vec("[abc]", 1..5),
        ) {
            let subject = subject.join(".");
            let p = perm(&[allow.as_str()]).with_deny(vec![deny.clone()]);

            prop_assert_eq!(p.allows_interest(&subject), p.allows(&subject));
            let allowed = p.is_allow_all() || matches(&allow, &subject);
            prop_assert_eq!(p.allows(&subject), allowed && !matches(&deny, &subject));
        }
    }
}
