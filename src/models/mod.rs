//! Domain models for rules, vocabulary, and optimization outcomes.

mod outcome;
mod rule;
mod vocabulary;

pub use outcome::{
    Classification, DomainMetrics, OptimizationOutcome, Outcome, OutcomeStatus, PassResult,
    StopReason,
};
pub use rule::{Rule, RuleId, RuleKind, TagsState};
pub use vocabulary::Vocabulary;
