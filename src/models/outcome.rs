//! Classification outcomes and per-pass aggregates.

use super::RuleId;
use std::collections::BTreeMap;
use std::fmt;

/// Typed result of one oracle classification.
///
/// The oracle client never raises past its boundary: timeouts, non-zero
/// exits, unparsable output, and structural violations all come back as
/// one of these variants. Only a missing oracle binary escapes as
/// [`crate::Error::OracleUnavailable`].
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The response parsed and passed structural validation.
    Approved(Classification),
    /// The response was syntactically or structurally unusable.
    ///
    /// `raw_response` carries the oracle's raw text (truncated to 500
    /// characters) when the JSON itself failed to parse; it is `None`
    /// for structural validation failures, where `reason` concatenates
    /// every violation found.
    ValidationFailed {
        /// Human-readable description of what was wrong.
        reason: String,
        /// Raw oracle text for audit, present only on parse failures.
        raw_response: Option<String>,
    },
    /// The oracle invocation itself failed (timeout, non-zero exit).
    ///
    /// Recoverable: the rule stays in the retry pool for the next pass.
    Error {
        /// Description of the invocation failure.
        reason: String,
    },
}

/// A validated tag/domain proposal from the oracle.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Proposed canonical tags (2 to 5 of them).
    pub tags: Vec<String>,
    /// Proposed tier-1 domain.
    pub domain: String,
    /// Oracle confidence (0.0 to 1.0; 0.5 when the oracle omitted it).
    pub confidence: f64,
    /// Free-text reasoning for audit.
    pub reasoning: String,
}

/// Final status of optimizing one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Classification approved and persisted.
    Approved,
    /// Classification discarded; the rule stays eligible for retry.
    Skipped,
    /// Oracle invocation failed; the rule stays eligible for retry.
    Error,
    /// Response unusable; the rule moved to `pending_review`.
    ValidationFailed,
}

impl OutcomeStatus {
    /// Returns the status name used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Skipped => "skipped",
            Self::Error => "error",
            Self::ValidationFailed => "validation_failed",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of optimizing one rule, as reported to the pass executor.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    /// The rule this outcome belongs to.
    pub rule_id: RuleId,
    /// The rule's pre-existing domain (used for domain breakdowns).
    pub rule_domain: Option<String>,
    /// Final status.
    pub status: OutcomeStatus,
    /// Approved or suggested tags, when the oracle produced any.
    pub tags: Vec<String>,
    /// Proposed domain, when the oracle produced one.
    pub domain: Option<String>,
    /// Oracle confidence, when available.
    pub confidence: Option<f64>,
    /// Tag coherence against the domain's existing vocabulary.
    pub coherence: Option<f64>,
    /// Oracle reasoning, when available.
    pub reasoning: Option<String>,
    /// Failure detail for `Error`/`ValidationFailed` statuses.
    pub error: Option<String>,
}

/// Per-domain metrics within one pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainMetrics {
    /// Rules from this domain processed in the pass.
    pub processed: usize,
    /// Rules from this domain approved in the pass.
    pub approved: usize,
    /// `approved / processed`.
    pub improvement_rate: f64,
}

/// Aggregated result of one optimization pass.
///
/// Ephemeral: consumed by the convergence controller to decide whether
/// to continue, never persisted.
#[derive(Debug, Clone, Default)]
pub struct PassResult {
    /// Rules processed in this pass.
    pub processed: usize,
    /// Rules approved.
    pub approved: usize,
    /// Rules skipped (below thresholds, or auto-approve disabled).
    pub skipped: usize,
    /// Rules that errored or failed validation.
    pub errors: usize,
    /// `approved / processed`.
    pub improvement_rate: f64,
    /// Average oracle confidence over approvals only (0.0 if none).
    pub avg_confidence: f64,
    /// Net new tier-2 tags added to the vocabulary during the pass.
    pub new_tags_added: usize,
    /// Rules still untagged after the pass (`processed - approved`).
    pub remaining: usize,
    /// Per-tier-1-domain breakdown, keyed by domain name.
    pub domains: BTreeMap<String, DomainMetrics>,
}

impl PassResult {
    /// Fraction of processed rules a status count represents.
    ///
    /// Zero when the pass processed nothing.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn share(&self, count: usize) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            count as f64 / self.processed as f64
        }
    }

    /// Whether any single domain still shows meaningful improvement.
    ///
    /// A domain above 10% improvement keeps the convergence loop alive
    /// even when the global rate has dropped below its floor.
    #[must_use]
    pub fn any_domain_active(&self) -> bool {
        self.domains.values().any(|m| m.improvement_rate > 0.10)
    }
}

/// Why the convergence loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No rules remain in `needs_tags`.
    AllTagged,
    /// Global improvement below 5% with no domain above 10%.
    Converged,
    /// Fewer than 3 new tags and improvement below 10%.
    VocabularySaturated,
    /// Average approval confidence fell below 0.65 (warning-level stop).
    QualityFloor,
    /// Cumulative oracle-call budget exhausted.
    BudgetExhausted,
    /// Pass-count ceiling reached.
    MaxPasses,
}

impl StopReason {
    /// Short human-readable label for run summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllTagged => "all tagged",
            Self::Converged => "converged",
            Self::VocabularySaturated => "vocabulary saturated",
            Self::QualityFloor => "quality floor reached",
            Self::BudgetExhausted => "cost limit reached",
            Self::MaxPasses => "max passes reached",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
