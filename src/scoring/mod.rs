//! Composite ranking score.
//!
//! The score blends salience, confidence, recency, and reusability scope
//! into a single rank in `[0, 1]`. The onboarding assembly pipeline calls
//! the same function, so it lives here as a pure function of the rule and
//! a caller-supplied clock; the only side effect is the audit trail,
//! which is a hard requirement: every default substitution and fallback
//! is recorded with the rule id and the value used.

use crate::audit::AuditLog;
use crate::models::Rule;
use chrono::{DateTime, Utc};

/// Weight of the salience factor.
const W_SALIENCE: f64 = 0.4;
/// Weight of the confidence factor.
const W_CONFIDENCE: f64 = 0.3;
/// Weight of the recency factor.
const W_RECENCY: f64 = 0.2;
/// Weight of the scope bonus.
const W_SCOPE: f64 = 0.1;

/// Neutral salience used when the field is absent.
const DEFAULT_SALIENCE: f64 = 0.7;
/// Neutral recency used when `created_at` cannot be parsed.
const FALLBACK_RECENCY: f64 = 0.5;

/// Computes the composite rank score for a rule at time `now`.
///
/// ```text
/// composite = 0.4*salience + 0.3*confidence + 0.2*recency + 0.1*scope_bonus
/// ```
///
/// Recency is a dual exponential decay over the rule's age in whole days:
/// a fast 30-day-scale term plus a slow 200+-day-scale long tail, clamped
/// to 1.0. The scope bonus is 1.0 for `project_wide` reusability (the
/// default when absent) and 0.5 otherwise.
///
/// The result is rounded to 4 decimal places and always lies in `[0, 1]`.
/// If the computation produces a non-finite value, the rule's raw
/// confidence is returned instead and the failure is audited.
#[must_use]
pub fn composite_score(rule: &Rule, now: DateTime<Utc>, audit: &AuditLog) -> f64 {
    let salience = rule.salience.unwrap_or_else(|| {
        audit.record(
            rule.id.as_str(),
            "MISSING_FIELD",
            "salience",
            Some(&DEFAULT_SALIENCE.to_string()),
        );
        DEFAULT_SALIENCE
    });

    let confidence = rule.confidence;
    let recency = recency_factor(rule, now, audit);
    let scope_bonus = scope_bonus(rule);

    let composite = W_SALIENCE * salience
        + W_CONFIDENCE * confidence
        + W_RECENCY * recency
        + W_SCOPE * scope_bonus;

    if !composite.is_finite() {
        let fallback = if confidence.is_finite() { confidence } else { 0.0 };
        audit.record(
            rule.id.as_str(),
            "SCORE_COMPUTATION_FAILURE",
            "non-finite composite",
            Some(&fallback.to_string()),
        );
        return fallback;
    }

    round4(composite.clamp(0.0, 1.0))
}

/// Dual-decay recency factor over the rule's age in whole days.
fn recency_factor(rule: &Rule, now: DateTime<Utc>, audit: &AuditLog) -> f64 {
    let Ok(created_at) = DateTime::parse_from_rfc3339(&rule.created_at) else {
        audit.record(
            rule.id.as_str(),
            "TIMESTAMP_PARSE_ERROR",
            &format!("created_at={}", rule.created_at),
            Some(&FALLBACK_RECENCY.to_string()),
        );
        return FALLBACK_RECENCY;
    };

    #[allow(clippy::cast_precision_loss)]
    let days_old = (now - created_at.with_timezone(&Utc)).num_days() as f64;
    let recency = (-0.03 * days_old).exp() + 0.25 * (-0.003 * days_old).exp();
    recency.min(1.0)
}

/// Scope bonus from `metadata.reusability_scope`.
fn scope_bonus(rule: &Rule) -> f64 {
    let scope = rule
        .metadata
        .get("reusability_scope")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("project_wide");
    if scope == "project_wide" { 1.0 } else { 0.5 }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RuleId, RuleKind, TagsState};
    use chrono::TimeZone;

    fn rule_at(created_at: &str) -> Rule {
        Rule {
            id: RuleId::new("rule-score"),
            kind: RuleKind::Decision,
            title: "t".to_string(),
            description: String::new(),
            domain: None,
            confidence: 0.0,
            salience: None,
            tags: Vec::new(),
            tags_state: TagsState::NeedsTags,
            metadata: serde_json::Map::new(),
            created_at: created_at.to_string(),
            chatlog_id: None,
        }
    }

    fn audit(dir: &tempfile::TempDir) -> AuditLog {
        AuditLog::new(dir.path().join("score_warnings.log"))
    }

    #[test]
    fn test_day_zero_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap();
        let rule = rule_at("2025-06-01T12:00:00Z");

        // salience defaults to 0.7, recency at day 0 is 1.25 clamped to
        // 1.0, scope bonus defaults to project_wide = 1.0:
        // 0.4*0.7 + 0.3*0.0 + 0.2*1.0 + 0.1*1.0 = 0.58
        let score = composite_score(&rule, now, &audit(&dir));
        assert!((score - 0.58).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_deterministic_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap();
        let mut rule = rule_at("2024-01-15T08:30:00Z");
        rule.confidence = 0.85;
        rule.salience = Some(0.9);

        let log = audit(&dir);
        let a = composite_score(&rule, now, &log);
        let b = composite_score(&rule, now, &log);
        assert!((a - b).abs() < f64::EPSILON);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn test_unparsable_created_at_uses_neutral_recency_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap();
        let mut rule = rule_at("not-a-timestamp");
        rule.salience = Some(1.0);
        rule.confidence = 1.0;

        let log = audit(&dir);
        let score = composite_score(&rule, now, &log);
        // 0.4*1.0 + 0.3*1.0 + 0.2*0.5 + 0.1*1.0 = 0.9
        assert!((score - 0.9).abs() < 1e-9);

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("TIMESTAMP_PARSE_ERROR"));
        assert!(contents.contains("rule-score"));
        assert!(contents.contains("0.5"));
    }

    #[test]
    fn test_missing_salience_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap();
        let rule = rule_at("2025-06-01T00:00:00Z");

        let log = audit(&dir);
        composite_score(&rule, now, &log);
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("MISSING_FIELD\tsalience\t0.7"));
    }

    #[test]
    fn test_narrow_scope_halves_bonus() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap();
        let mut rule = rule_at("2025-06-01T00:00:00Z");
        rule.salience = Some(0.0);
        rule.metadata.insert(
            "reusability_scope".to_string(),
            serde_json::Value::String("file_local".to_string()),
        );

        // 0.2*1.0 recency + 0.1*0.5 scope = 0.25
        let score = composite_score(&rule, now, &audit(&dir));
        assert!((score - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_old_rule_decays() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap();
        let mut rule = rule_at("2024-06-01T00:00:00Z"); // 365 days old
        rule.salience = Some(0.0);

        let log = audit(&dir);
        let score = composite_score(&rule, now, &log);
        // recency = exp(-10.95) + 0.25*exp(-1.095) ~= 0.0837
        let expected = 0.2 * ((-0.03f64 * 365.0).exp() + 0.25 * (-0.003f64 * 365.0).exp()) + 0.1;
        assert!((score - (expected * 10_000.0).round() / 10_000.0).abs() < 1e-9);
    }
}
