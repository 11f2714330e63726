//! `SQLite` rule repository.
//!
//! Each worker unit opens its own [`RuleStore`] (one connection per
//! concurrent task, never shared). Metadata updates use merge-patch
//! semantics: new keys are merged into the existing bag, never replacing
//! it wholesale.

use crate::models::{Rule, RuleId, RuleKind, TagsState};
use crate::{Error, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use std::path::Path;

/// Rule counts by tagging state, for empty-state and run-summary reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    /// All rules in the repository.
    pub total: usize,
    /// Rules in `curated`.
    pub curated: usize,
    /// Rules in `refined`.
    pub refined: usize,
    /// Rules in `pending_review`.
    pub pending_review: usize,
    /// Rules in `needs_tags`.
    pub needs_tags: usize,
}

/// Handle on the rule repository. One per worker unit.
pub struct RuleStore {
    conn: Connection,
}

impl RuleStore {
    /// Opens the repository at `path` with the standard pragmas.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage {
            operation: "open_rule_store".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        super::configure_connection(&conn)?;
        Ok(Self { conn })
    }

    /// Opens an in-memory repository with the schema applied. Test use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage {
            operation: "open_rule_store".to_string(),
            cause: e.to_string(),
        })?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates the `rules` table if it does not exist.
    ///
    /// The upstream extraction pipeline owns this schema; this exists for
    /// tests and fresh deployments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on DDL failure.
    pub fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS rules (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL DEFAULT 'decision',
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    domain TEXT,
                    confidence REAL,
                    salience REAL,
                    tags TEXT,
                    tags_state TEXT NOT NULL DEFAULT 'needs_tags',
                    metadata TEXT,
                    created_at TEXT,
                    curated_at TEXT,
                    curated_by TEXT,
                    chatlog_id TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_rules_tags_state
                    ON rules (tags_state);",
            )
            .map_err(|e| Error::Storage {
                operation: "init_schema".to_string(),
                cause: e.to_string(),
            })
    }

    /// Fetches all rules with `tags_state = needs_tags`, optionally
    /// capped by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn query_needs_tags(&self, limit: Option<usize>) -> Result<Vec<Rule>> {
        let sql = "SELECT id, kind, title, description, domain, confidence, salience,
                          tags, tags_state, metadata, created_at, chatlog_id
                   FROM rules WHERE tags_state = 'needs_tags'
                   ORDER BY id
                   LIMIT ?1";
        #[allow(clippy::cast_possible_wrap)]
        let cap = limit.map_or(-1_i64, |n| n as i64);

        let mut stmt = self.conn.prepare(sql).map_err(|e| Error::Storage {
            operation: "prepare_query_needs_tags".to_string(),
            cause: e.to_string(),
        })?;

        let rows = stmt
            .query_map(params![cap], row_to_rule)
            .map_err(|e| Error::Storage {
                operation: "query_needs_tags".to_string(),
                cause: e.to_string(),
            })?;

        let mut rules = Vec::new();
        for row in rows {
            rules.push(row.map_err(|e| Error::Storage {
                operation: "query_needs_tags".to_string(),
                cause: e.to_string(),
            })?);
        }
        Ok(rules)
    }

    /// Counts rules with `tags_state = needs_tags`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn count_needs_tags(&self) -> Result<usize> {
        self.count_where("tags_state = 'needs_tags'")
    }

    /// Counts rules grouped by tagging state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn state_counts(&self) -> Result<StateCounts> {
        Ok(StateCounts {
            total: self.count_where("1=1")?,
            curated: self.count_where("tags_state = 'curated'")?,
            refined: self.count_where("tags_state = 'refined'")?,
            pending_review: self.count_where("tags_state = 'pending_review'")?,
            needs_tags: self.count_where("tags_state = 'needs_tags'")?,
        })
    }

    fn count_where(&self, predicate: &str) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM rules WHERE {predicate}");
        self.conn
            .query_row(&sql, [], |row| row.get::<_, i64>(0))
            .map(|n| usize::try_from(n).unwrap_or(0))
            .map_err(|e| Error::Storage {
                operation: "count_rules".to_string(),
                cause: e.to_string(),
            })
    }

    /// Persists an approved classification atomically against the rule
    /// row: tags, domain, derived state, provenance metadata, and the
    /// curation stamp. The vocabulary append that follows is a separate,
    /// independent write by design.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on update failure.
    pub fn apply_approval(
        &self,
        id: &RuleId,
        tags: &[String],
        domain: &str,
        state: TagsState,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
        curated_by: &str,
    ) -> Result<()> {
        let metadata = self.merged_metadata(id, metadata_patch)?;
        let tags_json = serde_json::to_string(tags).map_err(|e| Error::Storage {
            operation: "serialize_tags".to_string(),
            cause: e.to_string(),
        })?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        self.conn
            .execute(
                "UPDATE rules
                 SET tags = ?1, domain = ?2, tags_state = ?3, metadata = ?4,
                     curated_at = ?5, curated_by = ?6
                 WHERE id = ?7",
                params![
                    tags_json,
                    domain,
                    state.as_str(),
                    serde_json::Value::Object(metadata).to_string(),
                    now,
                    curated_by,
                    id.as_str()
                ],
            )
            .map_err(|e| Error::Storage {
                operation: "apply_approval".to_string(),
                cause: e.to_string(),
            })?;
        Ok(())
    }

    /// Moves a rule to `pending_review` after a parse or validation
    /// failure, merging the failure detail into its metadata. Terminal
    /// for this run: the rule leaves the retry pool and awaits human
    /// curation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on update failure.
    pub fn mark_pending_review(
        &self,
        id: &RuleId,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let metadata = self.merged_metadata(id, metadata_patch)?;
        self.conn
            .execute(
                "UPDATE rules SET tags_state = ?1, metadata = ?2 WHERE id = ?3",
                params![
                    TagsState::PendingReview.as_str(),
                    serde_json::Value::Object(metadata).to_string(),
                    id.as_str()
                ],
            )
            .map_err(|e| Error::Storage {
                operation: "mark_pending_review".to_string(),
                cause: e.to_string(),
            })?;
        Ok(())
    }

    /// Records an oracle invocation failure in the rule's metadata
    /// without touching its state: the rule stays retryable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on update failure.
    pub fn record_error(
        &self,
        id: &RuleId,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let metadata = self.merged_metadata(id, metadata_patch)?;
        self.conn
            .execute(
                "UPDATE rules SET metadata = ?1 WHERE id = ?2",
                params![serde_json::Value::Object(metadata).to_string(), id.as_str()],
            )
            .map_err(|e| Error::Storage {
                operation: "record_error".to_string(),
                cause: e.to_string(),
            })?;
        Ok(())
    }

    /// Fetches one rule by id. Test and tooling use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the rule does not exist or the
    /// query fails.
    pub fn get_rule(&self, id: &RuleId) -> Result<Rule> {
        self.conn
            .query_row(
                "SELECT id, kind, title, description, domain, confidence, salience,
                        tags, tags_state, metadata, created_at, chatlog_id
                 FROM rules WHERE id = ?1",
                params![id.as_str()],
                row_to_rule,
            )
            .map_err(|e| Error::Storage {
                operation: "get_rule".to_string(),
                cause: e.to_string(),
            })
    }

    /// Inserts a rule row. Test and tooling use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on insert failure.
    pub fn insert_rule(&self, rule: &Rule) -> Result<()> {
        let tags_json = serde_json::to_string(&rule.tags).map_err(|e| Error::Storage {
            operation: "serialize_tags".to_string(),
            cause: e.to_string(),
        })?;
        self.conn
            .execute(
                "INSERT INTO rules (id, kind, title, description, domain, confidence,
                                    salience, tags, tags_state, metadata, created_at, chatlog_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    rule.id.as_str(),
                    rule.kind.as_str(),
                    rule.title,
                    rule.description,
                    rule.domain,
                    rule.confidence,
                    rule.salience,
                    tags_json,
                    rule.tags_state.as_str(),
                    serde_json::Value::Object(rule.metadata.clone()).to_string(),
                    rule.created_at,
                    rule.chatlog_id
                ],
            )
            .map_err(|e| Error::Storage {
                operation: "insert_rule".to_string(),
                cause: e.to_string(),
            })?;
        Ok(())
    }

    /// Reads the current metadata bag and merges the patch into it.
    fn merged_metadata(
        &self,
        id: &RuleId,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let current: Option<String> = self
            .conn
            .query_row(
                "SELECT metadata FROM rules WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage {
                operation: "read_metadata".to_string(),
                cause: e.to_string(),
            })?;

        let mut metadata = current
            .as_deref()
            .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok())
            .and_then(|value| match value {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();

        for (key, value) in patch {
            metadata.insert(key.clone(), value.clone());
        }
        Ok(metadata)
    }
}

/// Converts a repository row to a [`Rule`].
fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    let kind: String = row.get(1)?;
    let tags_json: Option<String> = row.get(7)?;
    let state: String = row.get(8)?;
    let metadata_json: Option<String> = row.get(9)?;

    let tags = tags_json
        .as_deref()
        .and_then(|text| serde_json::from_str::<Vec<String>>(text).ok())
        .unwrap_or_default();

    let metadata = metadata_json
        .as_deref()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok())
        .and_then(|value| match value {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    Ok(Rule {
        id: RuleId::new(row.get::<_, String>(0)?),
        kind: RuleKind::parse(&kind),
        title: row.get(2)?,
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        domain: row.get(4)?,
        confidence: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        salience: row.get(6)?,
        tags,
        tags_state: TagsState::parse(&state).unwrap_or(TagsState::NeedsTags),
        metadata,
        created_at: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        chatlog_id: row.get(11)?,
    })
}
