//! Optimization services: per-rule optimizer, pass executor, and the
//! convergence controller that drives them.

mod convergence;
mod optimizer;
mod pass;

pub use convergence::{ConvergenceController, RunSummary, confidence_drifted, evaluate_stop};
pub use optimizer::{RuleOptimizer, tag_coherence};
pub use pass::PassExecutor;
