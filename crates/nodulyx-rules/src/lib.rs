//! nodulyx-rules — Structural classification of annotation documents.
//!
//! A document's structural shape varies across data-collection eras. This
//! crate extracts a feature vector from the parsed tree and evaluates it
//! against a prioritized, data-driven rule set read through a TTL cache.

pub mod cache;
pub mod classifier;
pub mod features;
pub mod model;
pub mod repository;

pub use cache::{RuleCache, RuleCacheConfig};
pub use classifier::{Classification, StructureClassifier, UNKNOWN_STRUCTURE, XML_PARSE_ERROR};
pub use features::StructuralFeatureVector;
pub use model::{ClassificationRule, RuleCriteria};
pub use repository::{MemoryRuleRepository, RuleRepository};
