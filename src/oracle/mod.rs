//! Classification oracle client.
//!
//! The oracle is an external black-box process: prompt in, JSON out,
//! bounded latency, unreliable output. This module builds the prompt from
//! a rule and a vocabulary snapshot, invokes the oracle, recovers JSON
//! from whatever wrapping the oracle produced, and validates the proposal
//! structurally. Everything short of a missing oracle binary comes back
//! as a typed [`Outcome`]; nothing else escapes this boundary.

mod claude_cli;
pub mod prompt;

pub use claude_cli::CliOracle;

use crate::models::{Classification, Outcome, Rule, Vocabulary};
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;

/// Maximum characters of raw oracle text kept for audit on parse failure.
const RAW_AUDIT_LIMIT: usize = 500;

/// Confidence assumed when the oracle omits the field.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Trait for classification oracle transports.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// The transport name, for logs.
    fn name(&self) -> &'static str;

    /// Sends one prompt and returns the oracle's raw text response.
    ///
    /// # Errors
    ///
    /// Returns an [`OracleFailure`] describing how the invocation failed.
    async fn complete(&self, prompt: &str) -> std::result::Result<String, OracleFailure>;
}

/// How an oracle invocation failed.
#[derive(Debug, Clone)]
pub enum OracleFailure {
    /// The oracle binary could not be spawned at all. Fatal.
    Unavailable(String),
    /// The invocation exceeded its hard timeout. Recoverable per rule.
    Timeout(u64),
    /// The process exited non-zero. Recoverable per rule.
    NonZeroExit {
        /// Exit code, when the process was not killed by a signal.
        code: Option<i32>,
        /// Captured standard error (truncated).
        stderr: String,
    },
    /// An I/O error occurred while talking to the process.
    Io(String),
}

impl fmt::Display for OracleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "oracle command not found: {msg}"),
            Self::Timeout(secs) => write!(f, "oracle timeout ({secs}s)"),
            Self::NonZeroExit { code, stderr } => {
                write!(f, "oracle exited with code {code:?}: {stderr}")
            },
            Self::Io(msg) => write!(f, "oracle i/o failure: {msg}"),
        }
    }
}

/// Classifies one rule against a vocabulary snapshot.
///
/// Builds the prompt, invokes the oracle once (no retry: retry, if any,
/// happens on the next convergence pass), and interprets the response.
///
/// # Errors
///
/// Returns [`Error::OracleUnavailable`] only when the oracle binary is
/// missing; every other failure is a typed [`Outcome`].
pub async fn classify(oracle: &dyn Oracle, rule: &Rule, vocab: &Vocabulary) -> Result<Outcome> {
    let prompt = prompt::build_prompt(rule, vocab);

    let raw = match oracle.complete(&prompt).await {
        Ok(raw) => raw,
        Err(OracleFailure::Unavailable(msg)) => return Err(Error::OracleUnavailable(msg)),
        Err(failure) => {
            return Ok(Outcome::Error {
                reason: failure.to_string(),
            });
        },
    };

    Ok(interpret_response(&raw, rule, vocab))
}

/// Parses and structurally validates a raw oracle response.
fn interpret_response(raw: &str, rule: &Rule, vocab: &Vocabulary) -> Outcome {
    let json_str = extract_json_from_response(raw);

    let response: serde_json::Value = match serde_json::from_str(json_str) {
        Ok(value) => value,
        Err(e) => {
            return Outcome::ValidationFailed {
                reason: format!("JSON parse failed: {e}"),
                raw_response: Some(truncate_chars(raw, RAW_AUDIT_LIMIT)),
            };
        },
    };

    // Collect every violation, not just the first.
    let mut violations = Vec::new();

    let tags: Vec<String> = response
        .get("tags")
        .and_then(serde_json::Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    if tags.len() < 2 || tags.len() > 5 {
        violations.push(format!("tag count must be 2-5, got {}", tags.len()));
    }

    let stopwords = vocab.stopwords();
    for tag in &tags {
        if stopwords.contains(tag) {
            violations.push(format!("forbidden stopword: '{tag}'"));
        }
    }

    let domain = response
        .get("domain")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string);
    if let Some(domain) = &domain {
        if !vocab.has_domain(domain) {
            violations.push(format!("invalid domain: '{domain}'"));
        }
    }

    let confidence = match response.get("confidence") {
        None | Some(serde_json::Value::Null) => DEFAULT_CONFIDENCE,
        Some(value) => match value.as_f64() {
            Some(c) if (0.0..=1.0).contains(&c) => c,
            _ => {
                violations.push(format!("invalid confidence: {value}"));
                DEFAULT_CONFIDENCE
            },
        },
    };

    if !violations.is_empty() {
        return Outcome::ValidationFailed {
            reason: violations.join("; "),
            raw_response: None,
        };
    }

    let reasoning = response
        .get("reasoning")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Fall back to the rule's current domain, then to "general". An
    // unknown fallback domain only skips the vocabulary write; the rule
    // update itself still proceeds.
    let domain = domain
        .or_else(|| rule.domain.clone())
        .unwrap_or_else(|| "general".to_string());

    Outcome::Approved(Classification {
        tags,
        domain,
        confidence,
        reasoning,
    })
}

/// Extracts JSON from an oracle response, handling markdown code fences.
fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json marker)
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        // Skip language identifier if present (e.g., "json\n")
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find('{')
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Fall back to the first brace-delimited object
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }

    trimmed
}

/// Truncates to at most `limit` characters on a char boundary.
fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
