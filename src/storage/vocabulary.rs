//! File-backed vocabulary store with exclusive-locked mutation.
//!
//! The vocabulary file is the only resource mutated by multiple workers
//! concurrently; an exclusive, blocking file lock around the whole
//! read-modify-write is the sole mechanism preventing lost updates to
//! the tag lists. Readers outside the lock may see a stale-but-consistent
//! snapshot.

use crate::audit::AuditLog;
use crate::models::{RuleId, Vocabulary};
use crate::{Error, Result};
use fs2::FileExt;
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Handle on the vocabulary file.
#[derive(Debug, Clone)]
pub struct VocabularyStore {
    path: PathBuf,
}

impl VocabularyStore {
    /// Creates a store handle for the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the vocabulary file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads a snapshot of the vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Vocabulary`] if the file cannot be read or
    /// parsed. At snapshot load time this is fatal; a convergence run
    /// cannot start without a usable vocabulary.
    pub fn load(&self) -> Result<Vocabulary> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| Error::Vocabulary {
            path: self.path.display().to_string(),
            cause: e.to_string(),
        })?;
        Vocabulary::parse(&text).map_err(|cause| Error::Vocabulary {
            path: self.path.display().to_string(),
            cause,
        })
    }

    /// The set of all tier-2 tags currently on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Vocabulary`] if the file cannot be loaded.
    pub fn all_tier_2_tags(&self) -> Result<HashSet<String>> {
        Ok(self.load()?.all_tier_2_tags())
    }

    /// Appends approved tags to a domain's tier-2 list under an
    /// exclusive, blocking file lock.
    ///
    /// The file is re-read fresh inside the lock (an earlier in-memory
    /// snapshot must not be trusted, or a concurrent writer's tags would
    /// be lost) and written back only if at least one tag was new.
    ///
    /// Recoverable conditions never propagate: an unknown domain or a
    /// corrupt file skips the update with a warning, and the rule update
    /// that preceded this call stands regardless.
    pub fn append_tags(&self, rule_id: &RuleId, domain: &str, tags: &[String], audit: &AuditLog) {
        if let Err(e) = self.append_tags_locked(rule_id, domain, tags, audit) {
            tracing::warn!(
                rule_id = %rule_id,
                domain,
                "vocabulary update skipped: {e}"
            );
        }
    }

    fn append_tags_locked(
        &self,
        rule_id: &RuleId,
        domain: &str,
        tags: &[String],
        audit: &AuditLog,
    ) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;

        // Blocking lock: a stuck holder stalls only this worker's
        // tag-append step; rule persistence already happened.
        file.lock_exclusive()?;
        let result = self.append_under_lock(&mut file, rule_id, domain, tags, audit);
        let _ = fs2::FileExt::unlock(&file);
        result
    }

    fn append_under_lock(
        &self,
        file: &mut std::fs::File,
        rule_id: &RuleId,
        domain: &str,
        tags: &[String],
        audit: &AuditLog,
    ) -> std::io::Result<()> {
        let mut text = String::new();
        file.read_to_string(&mut text)?;

        let mut vocab = match Vocabulary::parse(&text) {
            Ok(vocab) => vocab,
            Err(cause) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "vocabulary file corrupted, skipping update: {cause}"
                );
                return Ok(());
            },
        };

        if !vocab.has_domain(domain) {
            audit.record(
                rule_id.as_str(),
                "invalid_domain",
                domain,
                Some("skipped_vocabulary_update"),
            );
            tracing::warn!(rule_id = %rule_id, domain, "invalid domain, skipping vocabulary update");
            return Ok(());
        }

        let added = vocab.append_tags(domain, tags);
        if added == 0 {
            // Nothing new; avoid the write and the churn it causes.
            return Ok(());
        }

        let serialized = match vocab.to_yaml() {
            Ok(serialized) => serialized,
            Err(cause) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "vocabulary serialization failed, skipping update: {cause}"
                );
                return Ok(());
            },
        };

        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(serialized.as_bytes())?;
        tracing::debug!(rule_id = %rule_id, domain, added, "vocabulary updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "schema_version: 1
tier_1_domains:
  architecture:
    description: System structure
    aliases: []
tier_2_tags:
  architecture:
  - layering
stopwords:
- misc
";

    fn setup() -> (tempfile::TempDir, VocabularyStore, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tag-vocabulary.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let audit = AuditLog::new(dir.path().join("warnings.log"));
        (dir, VocabularyStore::new(path), audit)
    }

    #[test]
    fn test_load_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = VocabularyStore::new(dir.path().join("absent.yaml"));
        assert!(matches!(store.load(), Err(Error::Vocabulary { .. })));
    }

    #[test]
    fn test_append_tags_persists_new_tags() {
        let (_dir, store, audit) = setup();
        store.append_tags(
            &RuleId::new("r1"),
            "architecture",
            &["boundaries".to_string()],
            &audit,
        );

        let vocab = store.load().unwrap();
        assert_eq!(vocab.domain_tags("architecture"), vec!["layering", "boundaries"]);
    }

    #[test]
    fn test_append_tags_is_idempotent_and_skips_noop_write() {
        let (_dir, store, audit) = setup();
        let tags = vec!["layering".to_string(), "boundaries".to_string()];

        store.append_tags(&RuleId::new("r1"), "architecture", &tags, &audit);
        let mtime_after_first = std::fs::metadata(store.path()).unwrap().modified().unwrap();

        // Second identical call yields the same final list and no write.
        std::thread::sleep(std::time::Duration::from_millis(20));
        store.append_tags(&RuleId::new("r1"), "architecture", &tags, &audit);
        let mtime_after_second = std::fs::metadata(store.path()).unwrap().modified().unwrap();

        assert_eq!(mtime_after_first, mtime_after_second);
        let vocab = store.load().unwrap();
        assert_eq!(vocab.domain_tags("architecture"), vec!["layering", "boundaries"]);
    }

    #[test]
    fn test_unknown_domain_skips_write_and_audits() {
        let (_dir, store, audit) = setup();
        store.append_tags(
            &RuleId::new("r9"),
            "general",
            &["something".to_string()],
            &audit,
        );

        let vocab = store.load().unwrap();
        assert!(vocab.domain_tags("general").is_empty());

        let log = std::fs::read_to_string(audit.path()).unwrap();
        assert!(log.contains("r9\tinvalid_domain\tgeneral\tskipped_vocabulary_update"));
    }

    #[test]
    fn test_corrupt_file_skips_update_without_error() {
        let (_dir, store, audit) = setup();
        std::fs::write(store.path(), "- not\n- a\n- mapping\n").unwrap();

        // Must not panic or propagate; the rule update stands regardless.
        store.append_tags(
            &RuleId::new("r1"),
            "architecture",
            &["boundaries".to_string()],
            &audit,
        );
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("not"));
    }

    #[test]
    fn test_write_preserves_key_order_and_unknown_keys() {
        let (_dir, store, audit) = setup();
        store.append_tags(
            &RuleId::new("r1"),
            "architecture",
            &["boundaries".to_string()],
            &audit,
        );

        let text = std::fs::read_to_string(store.path()).unwrap();
        let schema_pos = text.find("schema_version").unwrap();
        let tier1_pos = text.find("tier_1_domains").unwrap();
        let tier2_pos = text.find("tier_2_tags").unwrap();
        let stop_pos = text.find("stopwords").unwrap();
        assert!(schema_pos < tier1_pos && tier1_pos < tier2_pos && tier2_pos < stop_pos);
    }

    #[test]
    fn test_concurrent_appends_lose_no_tags() {
        let (_dir, store, audit) = setup();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let audit = audit.clone();
            handles.push(std::thread::spawn(move || {
                store.append_tags(
                    &RuleId::new(format!("r{i}")),
                    "architecture",
                    &[format!("tag-{i}")],
                    &audit,
                );
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let tags = store.load().unwrap().all_tier_2_tags();
        for i in 0..8 {
            assert!(tags.contains(&format!("tag-{i}")), "missing tag-{i}");
        }
    }
}
