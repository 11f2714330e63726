//! Multi-pass convergence loop.
//!
//! Re-queries the untagged pool before every pass, reloads the
//! vocabulary so later passes prompt against everything earlier passes
//! added, and stops on the first satisfied condition: pool empty,
//! improvement converged, vocabulary saturated, quality floor breached,
//! budget exhausted, or the pass ceiling reached.

use super::PassExecutor;
use crate::config::OptimizerConfig;
use crate::models::{PassResult, StopReason};
use crate::storage::{RuleStore, StateCounts, VocabularyStore};
use crate::Result;
use std::path::PathBuf;

/// Base oracle-call budget; small corpora still get this many calls.
const BASE_BUDGET: u64 = 500;
/// Global improvement rate below which a pass counts as converged.
const MIN_IMPROVEMENT: f64 = 0.05;
/// New-tag count and improvement rate below which the vocabulary is
/// considered saturated.
const SATURATION_TAGS: usize = 3;
const SATURATION_IMPROVEMENT: f64 = 0.10;
/// Average approval confidence below which the run stops rather than
/// keep approving doubtful classifications.
const QUALITY_FLOOR: f64 = 0.65;
/// Pass-over-pass confidence drop that triggers a drift warning.
const DRIFT_THRESHOLD: f64 = 0.15;

/// Outcome of a whole convergence run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Passes executed.
    pub passes: u32,
    /// Cumulative oracle invocations across all passes.
    pub oracle_calls: u64,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
    /// Repository state counts after the final pass.
    pub counts: StateCounts,
    /// Per-pass results, in order.
    pub pass_results: Vec<PassResult>,
}

/// Drives passes until a stop condition fires.
pub struct ConvergenceController {
    db_path: PathBuf,
    vocab_store: VocabularyStore,
    executor: PassExecutor,
    max_passes: u32,
    budget_override: Option<u64>,
}

impl ConvergenceController {
    /// Creates a controller over the given executor and stores.
    #[must_use]
    pub fn new(
        db_path: impl Into<PathBuf>,
        vocab_store: VocabularyStore,
        executor: PassExecutor,
        config: &OptimizerConfig,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            vocab_store,
            executor,
            max_passes: config.max_passes,
            budget_override: config.budget_override,
        }
    }

    /// Runs passes to convergence.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: oracle binary missing, repository
    /// failure, or an unreadable vocabulary.
    pub async fn run(&self, auto_approve: bool) -> Result<RunSummary> {
        let store = RuleStore::open(&self.db_path)?;
        let budget = self.budget(&store)?;
        tracing::info!(budget, max_passes = self.max_passes, "starting convergence run");

        let mut oracle_calls: u64 = 0;
        let mut prior_confidence: Option<f64> = None;
        let mut pass_results = Vec::new();

        for pass in 1..=self.max_passes {
            let rules = store.query_needs_tags(None)?;
            if rules.is_empty() {
                return self.summary(&store, pass - 1, oracle_calls, StopReason::AllTagged, pass_results);
            }

            if oracle_calls >= budget {
                tracing::warn!(oracle_calls, budget, "oracle-call budget exhausted");
                return self.summary(
                    &store,
                    pass - 1,
                    oracle_calls,
                    StopReason::BudgetExhausted,
                    pass_results,
                );
            }

            // Fresh snapshot per pass so prompts see tags added by the
            // previous pass.
            let vocab = self.vocab_store.load()?;
            tracing::info!(pass, pool = rules.len(), "starting pass");

            let result = self.executor.run_pass(rules, vocab, auto_approve).await?;
            oracle_calls += result.processed as u64;

            tracing::info!(
                pass,
                processed = result.processed,
                approved = result.approved,
                skipped = result.skipped,
                errors = result.errors,
                improvement = result.improvement_rate,
                avg_confidence = result.avg_confidence,
                new_tags = result.new_tags_added,
                "pass complete"
            );

            if let Some(prior) = prior_confidence {
                if result.approved > 0 && confidence_drifted(prior, result.avg_confidence) {
                    tracing::warn!(
                        pass,
                        prior,
                        current = result.avg_confidence,
                        "approval confidence dropped sharply between passes"
                    );
                }
            }
            if result.approved > 0 {
                prior_confidence = Some(result.avg_confidence);
            }

            let stop = evaluate_stop(&result);
            pass_results.push(result);

            if let Some(reason) = stop {
                return self.summary(&store, pass, oracle_calls, reason, pass_results);
            }
        }

        self.summary(
            &store,
            self.max_passes,
            oracle_calls,
            StopReason::MaxPasses,
            pass_results,
        )
    }

    /// Runs exactly one pass over at most `limit` rules. Review workflow:
    /// no convergence bookkeeping, no budget.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::run`].
    pub async fn run_limited(
        &self,
        limit: usize,
        auto_approve: bool,
    ) -> Result<(PassResult, StateCounts)> {
        let store = RuleStore::open(&self.db_path)?;
        let rules = store.query_needs_tags(Some(limit))?;
        let vocab = self.vocab_store.load()?;
        let result = self.executor.run_pass(rules, vocab, auto_approve).await?;
        let counts = store.state_counts()?;
        Ok((result, counts))
    }

    fn budget(&self, store: &RuleStore) -> Result<u64> {
        if let Some(budget) = self.budget_override {
            return Ok(budget);
        }
        // Sized from the untagged pool at run start; already-tagged
        // rows do not buy extra oracle calls.
        let corpus = store.count_needs_tags()? as u64;
        Ok(BASE_BUDGET.max(corpus / 2))
    }

    fn summary(
        &self,
        store: &RuleStore,
        passes: u32,
        oracle_calls: u64,
        stop_reason: StopReason,
        pass_results: Vec<PassResult>,
    ) -> Result<RunSummary> {
        let counts = store.state_counts()?;
        tracing::info!(
            passes,
            oracle_calls,
            reason = stop_reason.as_str(),
            needs_tags = counts.needs_tags,
            "convergence run finished"
        );
        Ok(RunSummary {
            passes,
            oracle_calls,
            stop_reason,
            counts,
            pass_results,
        })
    }
}

/// Whether approval confidence dropped sharply from the prior pass.
///
/// Non-fatal signal: the run keeps going, but a drop past the threshold
/// suggests the oracle is now guessing on the harder residue.
#[must_use]
pub fn confidence_drifted(prior: f64, current: f64) -> bool {
    prior - current > DRIFT_THRESHOLD
}

/// Evaluates the post-pass stop conditions, in priority order.
#[must_use]
pub fn evaluate_stop(result: &PassResult) -> Option<StopReason> {
    if result.remaining == 0 {
        return Some(StopReason::AllTagged);
    }
    if result.improvement_rate < MIN_IMPROVEMENT && !result.any_domain_active() {
        return Some(StopReason::Converged);
    }
    if result.new_tags_added < SATURATION_TAGS
        && result.improvement_rate < SATURATION_IMPROVEMENT
    {
        return Some(StopReason::VocabularySaturated);
    }
    if result.approved >= 1 && result.avg_confidence < QUALITY_FLOOR {
        return Some(StopReason::QualityFloor);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::models::{DomainMetrics, Rule, RuleId, RuleKind, TagsState};
    use crate::oracle::{Oracle, OracleFailure};
    use crate::services::RuleOptimizer;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn pass(
        processed: usize,
        approved: usize,
        new_tags: usize,
        avg_confidence: f64,
    ) -> PassResult {
        #[allow(clippy::cast_precision_loss)]
        let improvement_rate = if processed > 0 {
            approved as f64 / processed as f64
        } else {
            0.0
        };
        PassResult {
            processed,
            approved,
            skipped: processed - approved,
            errors: 0,
            improvement_rate,
            avg_confidence,
            new_tags_added: new_tags,
            remaining: processed - approved,
            domains: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn test_stop_all_tagged_has_priority() {
        // Everything approved: remaining == 0 wins over any other signal.
        let result = pass(10, 10, 0, 0.5);
        assert_eq!(evaluate_stop(&result), Some(StopReason::AllTagged));
    }

    #[test]
    fn test_stop_converged_when_no_domain_active() {
        let result = pass(100, 3, 10, 0.9);
        assert_eq!(evaluate_stop(&result), Some(StopReason::Converged));
    }

    #[test]
    fn test_active_domain_defers_convergence() {
        let mut result = pass(100, 3, 10, 0.9);
        result.domains.insert(
            "architecture".to_string(),
            DomainMetrics {
                processed: 10,
                approved: 2,
                improvement_rate: 0.20,
            },
        );
        assert_eq!(evaluate_stop(&result), None);
    }

    #[test]
    fn test_stop_vocabulary_saturated() {
        // 8% improvement escapes convergence but, with under 3 new
        // tags, trips saturation.
        let result = pass(100, 8, 2, 0.9);
        assert_eq!(evaluate_stop(&result), Some(StopReason::VocabularySaturated));
    }

    #[test]
    fn test_stop_quality_floor() {
        let result = pass(100, 50, 10, 0.60);
        assert_eq!(evaluate_stop(&result), Some(StopReason::QualityFloor));
    }

    #[test]
    fn test_healthy_pass_continues() {
        let result = pass(100, 50, 10, 0.85);
        assert_eq!(evaluate_stop(&result), None);
    }

    #[test]
    fn test_confidence_drift_requires_a_sharp_drop() {
        assert!(confidence_drifted(0.90, 0.70));
        assert!(confidence_drifted(0.50, 0.25));
        // A modest drop, no change, or a rise is not drift.
        assert!(!confidence_drifted(0.90, 0.80));
        assert!(!confidence_drifted(0.80, 0.80));
        assert!(!confidence_drifted(0.70, 0.90));
    }

    struct CannedOracle(String);

    #[async_trait]
    impl Oracle for CannedOracle {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn complete(&self, _prompt: &str) -> std::result::Result<String, OracleFailure> {
            Ok(self.0.clone())
        }
    }

    fn sample_rule(id: &str) -> Rule {
        Rule {
            id: RuleId::new(id),
            kind: RuleKind::Decision,
            title: format!("title {id}"),
            description: "desc".to_string(),
            domain: Some("architecture".to_string()),
            confidence: 0.8,
            salience: None,
            tags: Vec::new(),
            tags_state: TagsState::NeedsTags,
            metadata: serde_json::Map::new(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            chatlog_id: None,
        }
    }

    fn controller(
        dir: &tempfile::TempDir,
        response: &str,
        config: OptimizerConfig,
        rule_count: usize,
    ) -> ConvergenceController {
        let db_path = dir.path().join("rules.db");
        let store = RuleStore::open(&db_path).unwrap();
        store.init_schema().unwrap();
        for i in 0..rule_count {
            store.insert_rule(&sample_rule(&format!("r{i}"))).unwrap();
        }

        let vocab_path = dir.path().join("tag-vocabulary.yaml");
        std::fs::write(
            &vocab_path,
            "tier_1_domains:\n  architecture:\n    description: d\n    aliases: []\ntier_2_tags:\n  architecture: [layering]\nstopwords: []\n",
        )
        .unwrap();
        let vocab_store = VocabularyStore::new(&vocab_path);

        let optimizer = RuleOptimizer::new(
            Arc::new(CannedOracle(response.to_string())),
            db_path.clone(),
            vocab_store.clone(),
            AuditLog::new(dir.path().join("warnings.log")),
            &config,
        );
        let executor = PassExecutor::new(optimizer, vocab_store.clone(), config.max_workers);
        ConvergenceController::new(db_path, vocab_store, executor, &config)
    }

    #[test]
    fn test_budget_sized_from_untagged_pool_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(&dir, "{}", OptimizerConfig::default(), 0);

        let store = RuleStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        for i in 0..1200 {
            let mut rule = sample_rule(&format!("c{i}"));
            rule.tags_state = TagsState::Curated;
            store.insert_rule(&rule).unwrap();
        }
        for i in 0..6 {
            store.insert_rule(&sample_rule(&format!("n{i}"))).unwrap();
        }

        // 1206 rows total but only 6 untagged: the floor applies.
        assert_eq!(ctl.budget(&store).unwrap(), 500);

        for i in 0..1300 {
            store.insert_rule(&sample_rule(&format!("m{i}"))).unwrap();
        }
        // 1306 untagged: half the pool exceeds the floor.
        assert_eq!(ctl.budget(&store).unwrap(), 653);
    }

    #[tokio::test]
    async fn test_run_stops_all_tagged_after_full_approval() {
        let dir = tempfile::tempdir().unwrap();
        let response = r#"{"tags":["layering","hexagonal"],"domain":"architecture","confidence":0.92,"reasoning":"fits"}"#;
        let ctl = controller(&dir, response, OptimizerConfig::default(), 4);

        let summary = ctl.run(true).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::AllTagged);
        assert_eq!(summary.passes, 1);
        assert_eq!(summary.oracle_calls, 4);
        assert_eq!(summary.counts.needs_tags, 0);
        assert_eq!(summary.counts.curated, 4);
    }

    #[tokio::test]
    async fn test_run_converges_when_nothing_is_approved() {
        let dir = tempfile::tempdir().unwrap();
        let response = r#"{"tags":["layering","hexagonal"],"domain":"architecture","confidence":0.3,"reasoning":"unsure"}"#;
        let ctl = controller(&dir, response, OptimizerConfig::default(), 4);

        let summary = ctl.run(true).await.unwrap();
        // Zero approvals: improvement 0.0, no active domain.
        assert_eq!(summary.stop_reason, StopReason::Converged);
        assert_eq!(summary.passes, 1);
        assert_eq!(summary.counts.needs_tags, 4);
    }

    #[tokio::test]
    async fn test_run_respects_budget_override() {
        let dir = tempfile::tempdir().unwrap();
        let response = r#"{"tags":["layering","hexagonal"],"domain":"architecture","confidence":0.92,"reasoning":"fits"}"#;
        let config = OptimizerConfig {
            budget_override: Some(0),
            ..OptimizerConfig::default()
        };
        let ctl = controller(&dir, response, config, 4);

        let summary = ctl.run(true).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(summary.passes, 0);
        assert_eq!(summary.oracle_calls, 0);
    }

    #[tokio::test]
    async fn test_run_reports_all_tagged_on_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(&dir, "{}", OptimizerConfig::default(), 0);

        let summary = ctl.run(true).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::AllTagged);
        assert_eq!(summary.passes, 0);
        assert_eq!(summary.oracle_calls, 0);
    }

    #[tokio::test]
    async fn test_run_limited_caps_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let response = r#"{"tags":["layering","hexagonal"],"domain":"architecture","confidence":0.92,"reasoning":"fits"}"#;
        let ctl = controller(&dir, response, OptimizerConfig::default(), 5);

        let (result, counts) = ctl.run_limited(2, true).await.unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(counts.curated, 2);
        assert_eq!(counts.needs_tags, 3);
    }
}
