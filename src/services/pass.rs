//! Single optimization pass over a batch of rules.
//!
//! A pass pins one vocabulary snapshot, fans the batch out over a
//! bounded worker pool, and aggregates the per-rule outcomes into a
//! [`PassResult`]. Every worker in the pass prompts against the same
//! snapshot; tags approved mid-pass only influence prompts from the
//! next pass onward.

use super::RuleOptimizer;
use crate::models::{OptimizationOutcome, OutcomeStatus, PassResult, Rule, Vocabulary};
use crate::storage::VocabularyStore;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Domain-breakdown key for rules without an assigned domain.
const UNASSIGNED_DOMAIN: &str = "unassigned";

/// Executes one pass of concurrent rule optimization.
pub struct PassExecutor {
    optimizer: RuleOptimizer,
    vocab_store: VocabularyStore,
    max_workers: usize,
}

impl PassExecutor {
    /// Creates a pass executor with the given worker-pool width.
    #[must_use]
    pub const fn new(
        optimizer: RuleOptimizer,
        vocab_store: VocabularyStore,
        max_workers: usize,
    ) -> Self {
        Self {
            optimizer,
            vocab_store,
            max_workers,
        }
    }

    /// Optimizes `rules` concurrently against one vocabulary snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OracleUnavailable`] if the oracle binary is
    /// missing, [`Error::Vocabulary`] if the vocabulary cannot be read
    /// for the growth measurement, or [`Error::Storage`] on a rule-row
    /// update failure.
    pub async fn run_pass(
        &self,
        rules: Vec<Rule>,
        vocab: Vocabulary,
        auto_approve: bool,
    ) -> Result<PassResult> {
        let tags_before = self.vocab_store.all_tier_2_tags()?;

        let vocab = Arc::new(vocab);
        let semaphore = Arc::new(Semaphore::new(self.max_workers.max(1)));
        let mut tasks = JoinSet::new();

        for rule in rules {
            let optimizer = self.optimizer.clone();
            let vocab = Arc::clone(&vocab);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| Error::Storage {
                    operation: "acquire_worker_permit".to_string(),
                    cause: e.to_string(),
                })?;
                optimizer.optimize(rule, &vocab, auto_approve).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| Error::Storage {
                operation: "join_worker".to_string(),
                cause: e.to_string(),
            })??;
            outcomes.push(outcome);
        }

        let tags_after = self.vocab_store.all_tier_2_tags()?;
        let new_tags_added = tags_after.difference(&tags_before).count();

        Ok(aggregate(&outcomes, new_tags_added))
    }
}

/// Folds per-rule outcomes into the pass-level aggregate.
#[must_use]
pub fn aggregate(outcomes: &[OptimizationOutcome], new_tags_added: usize) -> PassResult {
    let mut result = PassResult {
        processed: outcomes.len(),
        new_tags_added,
        ..PassResult::default()
    };

    let mut confidence_sum = 0.0;
    for outcome in outcomes {
        let domain_key = outcome
            .rule_domain
            .clone()
            .unwrap_or_else(|| UNASSIGNED_DOMAIN.to_string());
        let metrics = result.domains.entry(domain_key).or_default();
        metrics.processed += 1;

        match outcome.status {
            OutcomeStatus::Approved => {
                result.approved += 1;
                metrics.approved += 1;
                confidence_sum += outcome.confidence.unwrap_or_default();
            },
            OutcomeStatus::Skipped => result.skipped += 1,
            OutcomeStatus::Error | OutcomeStatus::ValidationFailed => result.errors += 1,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    {
        if result.processed > 0 {
            result.improvement_rate = result.approved as f64 / result.processed as f64;
        }
        if result.approved > 0 {
            result.avg_confidence = confidence_sum / result.approved as f64;
        }
        for metrics in result.domains.values_mut() {
            if metrics.processed > 0 {
                metrics.improvement_rate = metrics.approved as f64 / metrics.processed as f64;
            }
        }
    }

    result.remaining = result.processed - result.approved;
    result
}
