//! Per-rule optimization: classify, gate, persist.
//!
//! One [`RuleOptimizer::optimize`] call takes a rule through the full
//! pipeline: oracle classification, the confidence and coherence gates,
//! and persistence of whichever outcome resulted. The rule row and the
//! vocabulary file are two independent writes with no cross-resource
//! transaction; on a crash between them the rule keeps valid tags that
//! the vocabulary has not absorbed yet, which the next approval for that
//! domain repairs.

use crate::audit::AuditLog;
use crate::config::OptimizerConfig;
use crate::models::{
    Classification, OptimizationOutcome, Outcome, OutcomeStatus, Rule, TagsState, Vocabulary,
};
use crate::oracle::{self, Oracle};
use crate::storage::{RuleStore, VocabularyStore};
use crate::{Error, Result};
use chrono::{SecondsFormat, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Domains with fewer existing tags than this are still bootstrapping:
/// there is nothing meaningful to measure coherence against, so every
/// proposal passes the coherence gate.
const BOOTSTRAP_TAG_FLOOR: usize = 5;

/// Optimizes individual rules against a vocabulary snapshot.
///
/// Cheap to clone; each clone opens its own repository connection per
/// persistence call, so clones can run concurrently in a worker pool.
#[derive(Clone)]
pub struct RuleOptimizer {
    oracle: Arc<dyn Oracle>,
    db_path: PathBuf,
    vocab_store: VocabularyStore,
    audit: AuditLog,
    confidence_threshold: f64,
    coherence_threshold: f64,
}

impl RuleOptimizer {
    /// Creates an optimizer over the given oracle and stores.
    #[must_use]
    pub fn new(
        oracle: Arc<dyn Oracle>,
        db_path: impl Into<PathBuf>,
        vocab_store: VocabularyStore,
        audit: AuditLog,
        config: &OptimizerConfig,
    ) -> Self {
        Self {
            oracle,
            db_path: db_path.into(),
            vocab_store,
            audit,
            confidence_threshold: config.confidence_threshold,
            coherence_threshold: config.coherence_threshold,
        }
    }

    /// Runs one rule through classification, gating, and persistence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OracleUnavailable`] if the oracle binary is
    /// missing, or [`Error::Storage`] if a rule-row update fails. Every
    /// per-rule failure mode short of those is a status on the returned
    /// [`OptimizationOutcome`].
    pub async fn optimize(
        &self,
        rule: Rule,
        vocab: &Vocabulary,
        auto_approve: bool,
    ) -> Result<OptimizationOutcome> {
        let outcome = oracle::classify(self.oracle.as_ref(), &rule, vocab).await?;

        match outcome {
            Outcome::Error { reason } => self.persist_error(rule, reason).await,
            Outcome::ValidationFailed {
                reason,
                raw_response,
            } => self.persist_validation_failure(rule, reason, raw_response).await,
            Outcome::Approved(classification) => {
                self.gate_and_persist(rule, classification, vocab, auto_approve)
                    .await
            },
        }
    }

    /// Records an oracle invocation failure without changing the rule's
    /// state; the rule stays in the retry pool for the next pass.
    async fn persist_error(&self, rule: Rule, reason: String) -> Result<OptimizationOutcome> {
        tracing::warn!(rule_id = %rule.id, "oracle invocation failed: {reason}");

        let mut patch = serde_json::Map::new();
        patch.insert(
            "optimization_error".to_string(),
            serde_json::Value::String(reason.clone()),
        );
        patch.insert(
            "optimization_error_at".to_string(),
            serde_json::Value::String(now_rfc3339()),
        );

        let db_path = self.db_path.clone();
        let id = rule.id.clone();
        self.run_blocking(move || RuleStore::open(&db_path)?.record_error(&id, &patch))
            .await?;

        Ok(OptimizationOutcome {
            rule_id: rule.id,
            rule_domain: rule.domain,
            status: OutcomeStatus::Error,
            tags: Vec::new(),
            domain: None,
            confidence: None,
            coherence: None,
            reasoning: None,
            error: Some(reason),
        })
    }

    /// Moves a rule with an unusable oracle response to `pending_review`.
    ///
    /// A parse failure (raw text present) and a structural validation
    /// failure land under different metadata keys so a reviewer can tell
    /// garbled output from a bad proposal.
    async fn persist_validation_failure(
        &self,
        rule: Rule,
        reason: String,
        raw_response: Option<String>,
    ) -> Result<OptimizationOutcome> {
        tracing::warn!(rule_id = %rule.id, "unusable oracle response: {reason}");

        let mut patch = serde_json::Map::new();
        if let Some(raw) = raw_response {
            let mut detail = serde_json::Map::new();
            detail.insert(
                "reason".to_string(),
                serde_json::Value::String(reason.clone()),
            );
            detail.insert("raw_response".to_string(), serde_json::Value::String(raw));
            patch.insert(
                "parse_failure".to_string(),
                serde_json::Value::Object(detail),
            );
        } else {
            patch.insert(
                "validation_failure".to_string(),
                serde_json::Value::String(reason.clone()),
            );
        }

        let db_path = self.db_path.clone();
        let id = rule.id.clone();
        self.run_blocking(move || RuleStore::open(&db_path)?.mark_pending_review(&id, &patch))
            .await?;

        Ok(OptimizationOutcome {
            rule_id: rule.id,
            rule_domain: rule.domain,
            status: OutcomeStatus::ValidationFailed,
            tags: Vec::new(),
            domain: None,
            confidence: None,
            coherence: None,
            reasoning: None,
            error: Some(reason),
        })
    }

    /// Applies the confidence and coherence gates to a valid proposal
    /// and persists it when both pass.
    async fn gate_and_persist(
        &self,
        rule: Rule,
        classification: Classification,
        vocab: &Vocabulary,
        auto_approve: bool,
    ) -> Result<OptimizationOutcome> {
        let coherence = tag_coherence(
            &classification.tags,
            &vocab.domain_tags(&classification.domain),
        );

        let approved = auto_approve
            && classification.confidence >= self.confidence_threshold
            && coherence >= self.coherence_threshold;

        if !approved {
            tracing::debug!(
                rule_id = %rule.id,
                confidence = classification.confidence,
                coherence,
                auto_approve,
                "proposal skipped"
            );
            // Nothing is persisted: a skipped rule stays in needs_tags
            // and a later pass re-classifies against a grown vocabulary.
            return Ok(OptimizationOutcome {
                rule_id: rule.id,
                rule_domain: rule.domain,
                status: OutcomeStatus::Skipped,
                tags: classification.tags,
                domain: Some(classification.domain),
                confidence: Some(classification.confidence),
                coherence: Some(coherence),
                reasoning: Some(classification.reasoning),
                error: None,
            });
        }

        let state = TagsState::from_confidence(classification.confidence);
        let curated_by = format!("oracle:{}", self.oracle.name());

        let mut patch = serde_json::Map::new();
        patch.insert(
            "optimization_reasoning".to_string(),
            serde_json::Value::String(classification.reasoning.clone()),
        );
        patch.insert(
            "tag_confidence".to_string(),
            serde_json::Number::from_f64(classification.confidence)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
        );
        patch.insert(
            "optimized_at".to_string(),
            serde_json::Value::String(now_rfc3339()),
        );

        let db_path = self.db_path.clone();
        let vocab_store = self.vocab_store.clone();
        let audit = self.audit.clone();
        let id = rule.id.clone();
        let tags = classification.tags.clone();
        let domain = classification.domain.clone();

        self.run_blocking(move || {
            RuleStore::open(&db_path)?.apply_approval(
                &id, &tags, &domain, state, &patch, &curated_by,
            )?;
            // Separate write, after the rule row: losing it only delays
            // vocabulary growth, never corrupts the rule.
            vocab_store.append_tags(&id, &domain, &tags, &audit);
            Ok(())
        })
        .await?;

        tracing::info!(
            rule_id = %rule.id,
            domain = %classification.domain,
            state = %state,
            confidence = classification.confidence,
            coherence,
            "classification approved"
        );

        Ok(OptimizationOutcome {
            rule_id: rule.id,
            rule_domain: rule.domain,
            status: OutcomeStatus::Approved,
            tags: classification.tags,
            domain: Some(classification.domain),
            confidence: Some(classification.confidence),
            coherence: Some(coherence),
            reasoning: Some(classification.reasoning),
            error: None,
        })
    }

    /// Runs a persistence closure on the blocking pool, each call on a
    /// fresh repository connection.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| Error::Storage {
                operation: "blocking_persist".to_string(),
                cause: e.to_string(),
            })?
    }
}

/// Fraction of proposed tags already present in the domain's tier-2 list.
///
/// Domains still below the bootstrap floor score 1.0 unconditionally;
/// demanding overlap with a near-empty list would deadlock vocabulary
/// growth.
#[must_use]
pub fn tag_coherence(proposed: &[String], domain_tags: &[String]) -> f64 {
    if domain_tags.len() < BOOTSTRAP_TAG_FLOOR {
        return 1.0;
    }
    if proposed.is_empty() {
        return 0.0;
    }

    let existing: HashSet<&str> = domain_tags.iter().map(String::as_str).collect();
    let overlap = proposed
        .iter()
        .filter(|tag| existing.contains(tag.as_str()))
        .count();

    #[allow(clippy::cast_precision_loss)]
    {
        overlap as f64 / proposed.len() as f64
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
