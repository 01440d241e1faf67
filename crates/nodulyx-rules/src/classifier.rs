//! Structure classifier.
//!
//! Evaluates a feature vector against the cached rule snapshot. Given the
//! same vector and the same snapshot the result is always identical: the
//! snapshot is pre-sorted into a total order and matching is pure.
//!
//! v2-format matching short-circuits ahead of the main pass, so a v2 rule
//! preempts any non-v2 rule regardless of relative priority. This mirrors
//! how the rule administrators order their rule sets in practice: a document
//! that speaks the 9-field vocabulary is never a legacy document.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use nodulyx_common::{NodulyxError, Result, XmlDocument};

use crate::cache::RuleCache;
use crate::features::{extract_features, StructuralFeatureVector};
use crate::model::{ClassificationRule, RuleCriteria};

/// Case assigned when no rule matches.
pub const UNKNOWN_STRUCTURE: &str = "Unknown_Structure";

/// Case assigned to a document that fails to parse. No rule is consulted
/// and the cache is never touched for such a document.
pub const XML_PARSE_ERROR: &str = "XML_Parse_Error";

/// Outcome of classifying one document.
#[derive(Debug, Clone)]
pub struct Classification {
    pub case_name: String,
    /// Id of the matching rule, for per-rule statistics. None for
    /// `Unknown_Structure` and `XML_Parse_Error`.
    pub rule_id: Option<Uuid>,
    /// The derived vector; None when the document did not parse.
    pub features: Option<StructuralFeatureVector>,
    /// Expected-field vocabulary of the matched rule, for downstream
    /// missing-vs-not-applicable tagging. Empty without a match.
    pub expected_fields: BTreeSet<String>,
}

impl Classification {
    fn parse_error() -> Self {
        Self {
            case_name: XML_PARSE_ERROR.to_string(),
            rule_id: None,
            features: None,
            expected_fields: BTreeSet::new(),
        }
    }
}

/// Classifier front end over the rule cache.
pub struct StructureClassifier {
    cache: Arc<RuleCache>,
}

impl StructureClassifier {
    pub fn new(cache: Arc<RuleCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Classify raw XML text. Unparsable input yields `XML_Parse_Error`
    /// without a repository or cache call.
    pub async fn classify_document(&self, xml: &str) -> Result<Classification> {
        let doc = match XmlDocument::parse_str(xml) {
            Ok(doc) => doc,
            Err(NodulyxError::XmlSyntax(msg)) => {
                debug!(error = %msg, "Document failed to parse");
                return Ok(Classification::parse_error());
            }
            Err(e) => return Err(e),
        };
        self.classify_tree(&doc).await
    }

    /// Classify an already-parsed tree.
    pub async fn classify_tree(&self, doc: &XmlDocument) -> Result<Classification> {
        let features = extract_features(doc);
        let rules = self.cache.get_active_rules().await?;
        Ok(classify(&features, &rules))
    }
}

/// Pure rule evaluation over a sorted snapshot. First match wins.
pub fn classify(
    features: &StructuralFeatureVector,
    rules: &[ClassificationRule],
) -> Classification {
    // v2 short-circuit pass.
    for rule in rules.iter().filter(|r| r.active && r.criteria.is_v2()) {
        if matches_v2(&rule.criteria, features) {
            debug!(rule = %rule.name, "v2 rule matched");
            return matched(rule, features);
        }
    }

    // Main priority-ordered pass over non-v2 rules.
    for rule in rules.iter().filter(|r| r.active && !r.criteria.is_v2()) {
        if matches_criteria(&rule.criteria, features) {
            debug!(rule = %rule.name, "Rule matched");
            return matched(rule, features);
        }
    }

    Classification {
        case_name: UNKNOWN_STRUCTURE.to_string(),
        rule_id: None,
        features: Some(features.clone()),
        expected_fields: BTreeSet::new(),
    }
}

fn matched(rule: &ClassificationRule, features: &StructuralFeatureVector) -> Classification {
    Classification {
        case_name: rule.name.clone(),
        rule_id: Some(rule.id),
        features: Some(features.clone()),
        expected_fields: rule.criteria.expected_fields.clone(),
    }
}

fn matches_v2(c: &RuleCriteria, f: &StructuralFeatureVector) -> bool {
    let min = c.min_v2_count.unwrap_or(1);
    if f.v2_field_count < min {
        return false;
    }
    let populated = &f.v2_characteristic_fields;
    c.expected_fields.iter().all(|e| populated.contains(e))
        && c.v2_fields.iter().all(|e| populated.contains(e))
}

fn matches_criteria(c: &RuleCriteria, f: &StructuralFeatureVector) -> bool {
    // An exact session count matches on equality alone.
    if let Some(n) = c.session_count {
        return f.session_count == n;
    }

    let legacy_count = f.legacy_count();
    if let Some(min) = c.min_legacy_chars {
        if legacy_count < min {
            return false;
        }
    }
    if let Some(max) = c.max_legacy_chars {
        if legacy_count > max {
            return false;
        }
    }
    if c.requires_reason && !f.has_reason() {
        return false;
    }
    if c.requires_header && !f.header_present {
        return false;
    }
    if c.requires_modality && !f.has_modality {
        return false;
    }
    let legacy = &f.legacy_characteristic_fields;
    c.required_chars.iter().all(|x| legacy.contains(x))
        && c.expected_fields.iter().all(|x| legacy.contains(x))
}
