//! Rule types and identifiers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Creates a new rule ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RuleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The kind of knowledge a rule records.
///
/// Carried from the upstream extraction step; opaque to the optimizer
/// beyond being echoed into the oracle prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// An architectural or process decision.
    Decision,
    /// A constraint the codebase must honor.
    Constraint,
    /// An invariant observed to hold.
    Invariant,
}

impl RuleKind {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Constraint => "constraint",
            Self::Invariant => "invariant",
        }
    }

    /// Parses a kind string, defaulting unknown values to `Decision`.
    ///
    /// Upstream owns this field; an unrecognized value is logged and
    /// passed through as the default rather than failing the row.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "constraint" => Self::Constraint,
            "invariant" => Self::Invariant,
            "decision" => Self::Decision,
            other => {
                tracing::warn!("unknown rule kind '{other}', treating as decision");
                Self::Decision
            },
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagging lifecycle state of a rule.
///
/// Transitions written by this crate are monotonic and never reverted:
/// `NeedsTags` is the initial state produced upstream; an approved
/// classification moves a rule to `Curated`/`Refined`/`PendingReview`
/// depending on confidence; a parse or validation failure moves it to
/// `PendingReview` (awaiting human curation); a skip or oracle error
/// leaves it at `NeedsTags`, eligible for retry on the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagsState {
    /// Initial state: the rule has no curated tags yet.
    NeedsTags,
    /// Tags approved with high confidence (>= 0.9).
    Curated,
    /// Tags approved with moderate confidence (>= 0.7).
    Refined,
    /// Awaiting human review (low-confidence approval or a
    /// parse/validation failure).
    PendingReview,
}

impl TagsState {
    /// Returns the canonical snake_case name as stored in the repository.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NeedsTags => "needs_tags",
            Self::Curated => "curated",
            Self::Refined => "refined",
            Self::PendingReview => "pending_review",
        }
    }

    /// Parses a state string from the repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unrecognized state.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "needs_tags" => Ok(Self::NeedsTags),
            "curated" => Ok(Self::Curated),
            "refined" => Ok(Self::Refined),
            "pending_review" => Ok(Self::PendingReview),
            other => Err(Error::InvalidInput(format!("unknown tags state: {other}"))),
        }
    }

    /// Derives the post-approval state from the oracle's confidence.
    #[must_use]
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Self::Curated
        } else if confidence >= 0.7 {
            Self::Refined
        } else {
            Self::PendingReview
        }
    }
}

impl fmt::Display for TagsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A knowledge record under tag optimization.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique identifier.
    pub id: RuleId,
    /// The kind of knowledge recorded (decision/constraint/invariant).
    pub kind: RuleKind,
    /// Short title.
    pub title: String,
    /// Full description.
    pub description: String,
    /// Assigned tier-1 domain, if any. Once a classification is
    /// approved this must be a vocabulary tier-1 key.
    pub domain: Option<String>,
    /// Extraction confidence (0.0 to 1.0).
    pub confidence: f64,
    /// Salience score (0.0 to 1.0). `None` means unknown; scoring
    /// substitutes the neutral default 0.7.
    pub salience: Option<f64>,
    /// Canonical tag strings (order-irrelevant set).
    pub tags: Vec<String>,
    /// Tagging lifecycle state.
    pub tags_state: TagsState,
    /// Open key-value bag carrying oracle reasoning, error traces, and
    /// timestamps. Never schema-enforced beyond documented keys.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Creation timestamp as stored (RFC 3339 text; parsed lazily).
    pub created_at: String,
    /// Back-reference to the source chatlog, opaque here.
    pub chatlog_id: Option<String>,
}
