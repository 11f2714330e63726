//! Append-only audit trails for scoring and optimization warnings.
//!
//! Each entry is one tab-separated line:
//! `timestamp, rule_id, error_type, details[, fallback_value]`.
//! The files are never rotated or truncated by this crate; they are the
//! record from which a curation decision can be reconstructed later.

use chrono::{SecondsFormat, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One append-only, tab-separated audit log.
///
/// Writing an audit entry must never fail the operation being audited:
/// I/O errors are downgraded to a `tracing` warning and swallowed.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Creates a log handle for the given file path. The file and its
    /// parent directories are created lazily on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry with an optional fallback value column.
    pub fn record(&self, rule_id: &str, error_type: &str, details: &str, fallback: Option<&str>) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut line = format!("{timestamp}\t{rule_id}\t{error_type}\t{details}");
        if let Some(fallback) = fallback {
            line.push('\t');
            line.push_str(fallback);
        }
        line.push('\n');

        if let Err(e) = self.append(&line) {
            tracing::warn!(path = %self.path.display(), "failed to write audit entry: {e}");
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_appends_tab_separated_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("warnings.log"));

        log.record("rule-1", "TIMESTAMP_PARSE_ERROR", "created_at=not-a-date", Some("0.5"));
        log.record("rule-2", "invalid_domain", "general", None);

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let fields: Vec<&str> = lines[0].split('\t').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], "rule-1");
        assert_eq!(fields[2], "TIMESTAMP_PARSE_ERROR");
        assert_eq!(fields[4], "0.5");

        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[2], "invalid_domain");
    }

    #[test]
    fn test_record_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("data").join("nested").join("audit.log"));
        log.record("rule-3", "SCORE_COMPUTATION_FAILURE", "overflow", Some("0.0"));
        assert!(log.path().exists());
    }
}
