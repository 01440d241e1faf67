//! TTL read cache in front of the rule repository.
//!
//! Rules change rarely, so a snapshot is held for a TTL (default 300s) and
//! refreshed synchronously on expiry. Readers share the snapshot through an
//! `Arc`; a refresh swaps the whole snapshot under the write lock so no
//! caller ever observes a half-updated rule list. A repository fetch failure
//! propagates as `RuleRepositoryUnavailable` rather than degrading to an
//! empty rule list.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use nodulyx_common::{NodulyxError, Result};

use crate::model::ClassificationRule;
use crate::repository::RuleRepository;

/// Cache and repository-fetch tuning.
#[derive(Debug, Clone)]
pub struct RuleCacheConfig {
    pub ttl: Duration,
    /// Per-attempt bound on the repository call.
    pub fetch_timeout: Duration,
    /// Total attempts before the batch fails loudly.
    pub fetch_retries: u32,
    /// Base backoff between attempts, doubled each retry.
    pub backoff: Duration,
}

impl Default for RuleCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(5),
            fetch_retries: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

struct Snapshot {
    rules: Arc<Vec<ClassificationRule>>,
    fetched_at: Instant,
}

/// TTL-based read cache over a [`RuleRepository`].
pub struct RuleCache {
    repo: Arc<dyn RuleRepository>,
    config: RuleCacheConfig,
    state: RwLock<Option<Snapshot>>,
}

impl RuleCache {
    pub fn new(repo: Arc<dyn RuleRepository>) -> Self {
        Self::with_config(repo, RuleCacheConfig::default())
    }

    pub fn with_config(repo: Arc<dyn RuleRepository>, config: RuleCacheConfig) -> Self {
        Self {
            repo,
            config,
            state: RwLock::new(None),
        }
    }

    /// Active rules in evaluation order, from the snapshot when still valid.
    pub async fn get_active_rules(&self) -> Result<Arc<Vec<ClassificationRule>>> {
        {
            let state = self.state.read().await;
            if let Some(snapshot) = state.as_ref() {
                if snapshot.fetched_at.elapsed() < self.config.ttl {
                    return Ok(snapshot.rules.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        // Another refresher may have won the race while we waited.
        if let Some(snapshot) = state.as_ref() {
            if snapshot.fetched_at.elapsed() < self.config.ttl {
                return Ok(snapshot.rules.clone());
            }
        }

        let rules = self.fetch_with_retry().await?;
        let rules = Arc::new(rules);
        *state = Some(Snapshot {
            rules: rules.clone(),
            fetched_at: Instant::now(),
        });
        Ok(rules)
    }

    /// Force invalidation regardless of TTL. The next read refetches.
    pub async fn refresh(&self) {
        *self.state.write().await = None;
        debug!("Rule cache invalidated");
    }

    async fn fetch_with_retry(&self) -> Result<Vec<ClassificationRule>> {
        let attempts = self.config.fetch_retries.max(1);
        let mut last_err = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.config.backoff * 2u32.pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }

            match tokio::time::timeout(self.config.fetch_timeout, self.repo.get_active_rules())
                .await
            {
                Ok(Ok(mut rules)) => {
                    rules.retain(|r| r.active);
                    crate::model::ClassificationRule::evaluation_order(&mut rules);
                    debug!(n_rules = rules.len(), attempt, "Rule snapshot refreshed");
                    return Ok(rules);
                }
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!(attempt, error = %last_err, "Rule repository fetch failed");
                }
                Err(_) => {
                    last_err = format!(
                        "fetch timed out after {}ms",
                        self.config.fetch_timeout.as_millis()
                    );
                    warn!(attempt, "Rule repository fetch timed out");
                }
            }
        }

        Err(NodulyxError::RuleRepositoryUnavailable(last_err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassificationRule, RuleCriteria};
    use crate::repository::MemoryRuleRepository;
    use async_trait::async_trait;

    fn rules() -> Vec<ClassificationRule> {
        vec![
            ClassificationRule::new("a", 10, 0, RuleCriteria::default()),
            ClassificationRule::new("b", 90, 0, RuleCriteria::default()),
        ]
    }

    #[tokio::test]
    async fn test_within_ttl_single_fetch() {
        let repo = Arc::new(MemoryRuleRepository::new(rules()));
        let cache = RuleCache::new(repo.clone());
        cache.get_active_rules().await.unwrap();
        cache.get_active_rules().await.unwrap();
        assert_eq!(repo.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_forces_refetch() {
        let repo = Arc::new(MemoryRuleRepository::new(rules()));
        let cache = RuleCache::new(repo.clone());
        cache.get_active_rules().await.unwrap();
        cache.refresh().await;
        cache.get_active_rules().await.unwrap();
        assert_eq!(repo.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_expiry_triggers_exactly_one_refetch() {
        let repo = Arc::new(MemoryRuleRepository::new(rules()));
        let cache = RuleCache::with_config(
            repo.clone(),
            RuleCacheConfig {
                ttl: Duration::from_millis(10),
                ..Default::default()
            },
        );
        cache.get_active_rules().await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.get_active_rules().await.unwrap();
        cache.get_active_rules().await.unwrap();
        assert_eq!(repo.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted_and_active_only() {
        let mut all = rules();
        all.push({
            let mut r = ClassificationRule::new("inactive", 999, 0, RuleCriteria::default());
            r.active = false;
            r
        });
        let repo = Arc::new(MemoryRuleRepository::new(all));
        let cache = RuleCache::new(repo);
        let snapshot = cache.get_active_rules().await.unwrap();
        let names: Vec<_> = snapshot.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    struct FailingRepository;

    #[async_trait]
    impl crate::repository::RuleRepository for FailingRepository {
        async fn get_active_rules(&self) -> nodulyx_common::Result<Vec<ClassificationRule>> {
            Err(NodulyxError::Other(anyhow::anyhow!("connection refused")))
        }
        async fn get_rule_by_name(
            &self,
            _name: &str,
        ) -> nodulyx_common::Result<Option<ClassificationRule>> {
            Ok(None)
        }
        async fn record_detection(
            &self,
            _source_ref: &str,
            _case_name: &str,
            _metadata: serde_json::Value,
            _duration: Duration,
        ) -> nodulyx_common::Result<()> {
            Ok(())
        }
        async fn update_statistics(
            &self,
            _rule_id: uuid::Uuid,
            _success: bool,
            _duration: Duration,
        ) -> nodulyx_common::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_is_repository_unavailable() {
        let cache = RuleCache::with_config(
            Arc::new(FailingRepository),
            RuleCacheConfig {
                fetch_retries: 2,
                backoff: Duration::from_millis(1),
                ..Default::default()
            },
        );
        let err = cache.get_active_rules().await.unwrap_err();
        assert!(matches!(err, NodulyxError::RuleRepositoryUnavailable(_)));
    }
}
