//! Individual governance rules and their match semantics.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::MemoryInput;

/// A rule's `match` clause. All specified fields must hold (AND).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleMatch {
    /// Exact kind match.
    pub kind: Option<String>,
    /// Exact key match.
    pub key: Option<String>,
    /// Exact speaker match.
    pub speaker: Option<String>,
    /// Non-empty intersection with the memory's tags.
    pub tags: Option<Vec<String>>,
    /// Regex search against the memory's content. An invalid pattern
    /// makes the rule a non-match; it never aborts evaluation.
    pub content: Option<String>,
}

/// One governance rule: a match clause plus the metadata it contributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRule {
    #[serde(skip)]
    pub category: String,
    #[serde(rename = "match", default)]
    pub matcher: RuleMatch,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryRule {
    /// Whether this rule matches the normalized memory input.
    pub fn matches(&self, m: &MemoryInput) -> bool {
        if let Some(kind) = &self.matcher.kind {
            if kind != &m.kind {
                return false;
            }
        }

        if let Some(key) = &self.matcher.key {
            if key != &m.key {
                return false;
            }
        }

        if let Some(speaker) = &self.matcher.speaker {
            if m.speaker.as_deref() != Some(speaker.as_str()) {
                return false;
            }
        }

        if let Some(rule_tags) = &self.matcher.tags {
            let overlap = rule_tags.iter().any(|t| m.tags.iter().any(|mt| mt == t));
            if !overlap {
                return false;
            }
        }

        if let Some(pattern) = &self.matcher.content {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(&m.content) {
                        return false;
                    }
                }
                Err(e) => {
                    // Invalid regex in a rule file: treat as non-match.
                    debug!(pattern = %pattern, "invalid rule regex: {e}");
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(kind: &str, content: &str) -> MemoryInput {
        MemoryInput {
            kind: kind.to_string(),
            key: "k".to_string(),
            content: content.to_string(),
            tags: vec!["health".to_string()],
            speaker: Some("taylor".to_string()),
            ts: None,
        }
    }

    fn rule(matcher: RuleMatch) -> MemoryRule {
        MemoryRule {
            category: "never_store".to_string(),
            matcher,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn fields_are_anded() {
        let r = rule(RuleMatch {
            kind: Some("fact".to_string()),
            content: Some("secret".to_string()),
            ..Default::default()
        });
        assert!(r.matches(&input("fact", "a secret thing")));
        assert!(!r.matches(&input("fact", "nothing here")));
        assert!(!r.matches(&input("event", "a secret thing")));
    }

    #[test]
    fn tags_match_on_intersection() {
        let r = rule(RuleMatch {
            tags: Some(vec!["finance".to_string(), "health".to_string()]),
            ..Default::default()
        });
        assert!(r.matches(&input("fact", "x")));

        let r = rule(RuleMatch {
            tags: Some(vec!["finance".to_string()]),
            ..Default::default()
        });
        assert!(!r.matches(&input("fact", "x")));
    }

    #[test]
    fn invalid_regex_is_a_non_match() {
        let r = rule(RuleMatch {
            content: Some("([unclosed".to_string()),
            ..Default::default()
        });
        assert!(!r.matches(&input("fact", "anything")));
    }

    #[test]
    fn empty_match_clause_matches_everything() {
        let r = rule(RuleMatch::default());
        assert!(r.matches(&input("fact", "x")));
    }
}
