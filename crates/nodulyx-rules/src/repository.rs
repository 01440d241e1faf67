//! Rule repository contract.
//!
//! Rule persistence lives outside this workspace; only the contract is
//! consumed here. There is deliberately no hardcoded fallback rule set:
//! an unreachable repository is fatal for the calling batch, because
//! silently guessing would corrupt downstream statistics.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use nodulyx_common::Result;

use crate::model::ClassificationRule;

/// External rule store contract.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// All active rules, already carrying priority and sequence.
    async fn get_active_rules(&self) -> Result<Vec<ClassificationRule>>;

    /// Look up one rule by its unique name.
    async fn get_rule_by_name(&self, name: &str) -> Result<Option<ClassificationRule>>;

    /// Record one classification outcome for detection history. Best-effort:
    /// callers treat a failure here as non-fatal.
    async fn record_detection(
        &self,
        source_ref: &str,
        case_name: &str,
        metadata: serde_json::Value,
        duration: Duration,
    ) -> Result<()>;

    /// Update per-rule success/failure counts and latency.
    async fn update_statistics(&self, rule_id: Uuid, success: bool, duration: Duration)
        -> Result<()>;
}

/// Per-rule observability counters kept by the in-memory repository.
#[derive(Debug, Clone, Default)]
pub struct RuleStats {
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
}

/// In-process repository used by tests and local runs.
#[derive(Default)]
pub struct MemoryRuleRepository {
    rules: RwLock<Vec<ClassificationRule>>,
    stats: RwLock<HashMap<Uuid, RuleStats>>,
    detections: RwLock<Vec<(String, String)>>,
    fetch_count: AtomicU64,
}

impl MemoryRuleRepository {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            ..Default::default()
        }
    }

    /// Replace the stored rule set (simulates a rule administrator edit).
    pub async fn replace_rules(&self, rules: Vec<ClassificationRule>) {
        *self.rules.write().await = rules;
    }

    /// How many times `get_active_rules` has been served.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub async fn stats_for(&self, rule_id: Uuid) -> Option<RuleStats> {
        self.stats.read().await.get(&rule_id).cloned()
    }

    pub async fn detections(&self) -> Vec<(String, String)> {
        self.detections.read().await.clone()
    }
}

#[async_trait]
impl RuleRepository for MemoryRuleRepository {
    async fn get_active_rules(&self) -> Result<Vec<ClassificationRule>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.rules.read().await.clone())
    }

    async fn get_rule_by_name(&self, name: &str) -> Result<Option<ClassificationRule>> {
        Ok(self
            .rules
            .read()
            .await
            .iter()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn record_detection(
        &self,
        source_ref: &str,
        case_name: &str,
        _metadata: serde_json::Value,
        _duration: Duration,
    ) -> Result<()> {
        self.detections
            .write()
            .await
            .push((source_ref.to_string(), case_name.to_string()));
        Ok(())
    }

    async fn update_statistics(
        &self,
        rule_id: Uuid,
        success: bool,
        duration: Duration,
    ) -> Result<()> {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(rule_id).or_default();
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
        entry.total_duration += duration;
        Ok(())
    }
}
