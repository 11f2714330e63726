//! # Curator
//!
//! A curated repository of extracted knowledge rules (architectural
//! decisions, constraints, invariants), enriched with domain tags,
//! confidence/salience scores, and a composite ranking score.
//!
//! The core of the crate is the tag optimization convergence engine: it
//! takes a batch of under-tagged rules, proposes tags and a domain via an
//! external classification oracle, validates and scores proposals against
//! a living controlled vocabulary, decides auto-approval, and iterates in
//! passes until the corpus converges or a safety limit triggers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use curator::audit::AuditLog;
//! use curator::config::CuratorConfig;
//! use curator::oracle::CliOracle;
//! use curator::services::{ConvergenceController, PassExecutor, RuleOptimizer};
//! use curator::storage::VocabularyStore;
//!
//! let config = CuratorConfig::load_default();
//! let oracle = Arc::new(CliOracle::new(config.oracle.clone()));
//! let vocab = VocabularyStore::new(&config.vocab_path);
//! let audit = AuditLog::new(config.optimization_audit_path());
//! let optimizer = RuleOptimizer::new(oracle, &config.db_path, vocab.clone(), audit, &config.optimizer);
//! let executor = PassExecutor::new(optimizer, vocab.clone(), config.optimizer.max_workers);
//! let controller = ConvergenceController::new(&config.db_path, vocab, executor, &config.optimizer);
//! let summary = controller.run(true).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod audit;
pub mod config;
pub mod models;
pub mod oracle;
pub mod scoring;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::CuratorConfig;
pub use models::{
    DomainMetrics, OptimizationOutcome, Outcome, OutcomeStatus, PassResult, Rule, RuleId,
    RuleKind, StopReason, TagsState, Vocabulary,
};
pub use oracle::{CliOracle, Oracle};
pub use services::{ConvergenceController, PassExecutor, RuleOptimizer, RunSummary};
pub use storage::{RuleStore, VocabularyStore};

/// Error type for curator operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations.
///
/// Per-rule failures (oracle timeouts, response parse/validation failures,
/// unknown vocabulary domains) are *not* represented here: they are typed
/// outcomes carried in [`models::Outcome`] and never abort a pass. This
/// enum covers only resource-level failures that stop the run.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A rule row carries a tags state string this crate does not know
    /// - A CLI argument cannot be interpreted
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A rule repository operation failed.
    ///
    /// Raised when `SQLite` queries or updates fail, or the database file
    /// cannot be opened. Fatal: the repository is a required resource.
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The vocabulary file could not be loaded at startup.
    ///
    /// Corruption observed *during* a locked append is recoverable (the
    /// append is skipped); corruption at snapshot load time is fatal.
    #[error("vocabulary file '{path}' unusable: {cause}")]
    Vocabulary {
        /// Path of the vocabulary file.
        path: String,
        /// The underlying cause.
        cause: String,
    },

    /// The classification oracle process is not available at all.
    ///
    /// Raised when the configured oracle command cannot be spawned
    /// (binary missing). Unlike a per-rule timeout or non-zero exit,
    /// this aborts the whole run immediately.
    #[error("classification oracle unavailable: {0}")]
    OracleUnavailable(String),
}

/// Result type alias for curator operations.
pub type Result<T> = std::result::Result<T, Error>;
