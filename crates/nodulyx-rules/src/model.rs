//! Classification rule model.
//!
//! Rules are created and updated by external rule administrators and are
//! read-only to the classifier. Evaluation order is total and deterministic:
//! priority descending, ties broken by the stable sequence number — never by
//! incidental storage order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Conjunctive match criteria for one rule.
///
/// A rule carrying v2 criteria (`min_v2_count` or a non-empty `v2_fields`
/// set) is evaluated with the v2 predicate only. A rule carrying an exact
/// `session_count` matches on session equality alone. All other rules
/// require the full conjunction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCriteria {
    /// Inclusive lower bound on populated legacy characteristic fields.
    #[serde(default)]
    pub min_legacy_chars: Option<u32>,
    /// Inclusive upper bound on populated legacy characteristic fields.
    #[serde(default)]
    pub max_legacy_chars: Option<u32>,
    /// Exact session-count equality, overriding all other criteria.
    #[serde(default)]
    pub session_count: Option<u32>,
    #[serde(default)]
    pub requires_header: bool,
    #[serde(default)]
    pub requires_modality: bool,
    #[serde(default)]
    pub requires_reason: bool,
    /// Legacy characteristic fields that must all be populated.
    #[serde(default)]
    pub required_chars: BTreeSet<String>,
    /// Fields the case expects; doubles as the ExpectedButMissing vocabulary
    /// during mapping.
    #[serde(default)]
    pub expected_fields: BTreeSet<String>,
    /// v2 vocabulary fields this rule keys on.
    #[serde(default)]
    pub v2_fields: BTreeSet<String>,
    /// Minimum populated v2 fields for a v2 match.
    #[serde(default)]
    pub min_v2_count: Option<u32>,
}

impl RuleCriteria {
    pub fn is_v2(&self) -> bool {
        self.min_v2_count.is_some() || !self.v2_fields.is_empty()
    }
}

/// One named classification rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub id: Uuid,
    /// Unique rule name; also the case name assigned on a match.
    pub name: String,
    /// Higher priority evaluates earlier.
    pub priority: i32,
    /// Stable tie-breaker within a priority band.
    pub sequence: i32,
    pub format_type: String,
    pub active: bool,
    pub criteria: RuleCriteria,
    pub created_at: DateTime<Utc>,
}

impl ClassificationRule {
    pub fn new(name: &str, priority: i32, sequence: i32, criteria: RuleCriteria) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            priority,
            sequence,
            format_type: if criteria.is_v2() { "v2" } else { "legacy" }.to_string(),
            active: true,
            criteria,
            created_at: Utc::now(),
        }
    }

    /// Total evaluation order: priority descending, then sequence ascending.
    pub fn evaluation_order(rules: &mut [ClassificationRule]) {
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.sequence.cmp(&b.sequence))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_order_is_priority_then_sequence() {
        let mut rules = vec![
            ClassificationRule::new("low", 10, 0, RuleCriteria::default()),
            ClassificationRule::new("high_b", 50, 2, RuleCriteria::default()),
            ClassificationRule::new("high_a", 50, 1, RuleCriteria::default()),
        ];
        ClassificationRule::evaluation_order(&mut rules);
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["high_a", "high_b", "low"]);
    }

    #[test]
    fn test_v2_detection() {
        let mut c = RuleCriteria::default();
        assert!(!c.is_v2());
        c.min_v2_count = Some(5);
        assert!(c.is_v2());
    }
}
