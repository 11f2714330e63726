//! Controlled tag vocabulary document.
//!
//! The vocabulary file is a structured, human-editable YAML document with
//! keys `schema_version`, `tier_1_domains`, `tier_2_tags`,
//! `vocabulary_mappings`, `synonyms`, and `stopwords`. Humans hand-edit it
//! between runs, so this model keeps the document as an order-preserving
//! mapping and rewrites it in block style: unknown keys survive a
//! round-trip untouched, and key insertion order is stable on every write.

use serde_yaml_ng::{Mapping, Value};
use std::collections::HashSet;

/// In-memory snapshot of the vocabulary document.
///
/// Tier-2 tag lists are append-only from this crate's perspective: tags
/// are added by approved classifications and never removed here. The
/// auxiliary mappings (`vocabulary_mappings`, `synonyms`, `stopwords`)
/// are read-only and used solely to build oracle prompts.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    doc: Mapping,
}

impl Vocabulary {
    /// Parses a vocabulary document from YAML text.
    ///
    /// # Errors
    ///
    /// Returns the parse failure as a plain string; callers decide
    /// whether the condition is fatal (snapshot load) or recoverable
    /// (locked append).
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let doc: Value = serde_yaml_ng::from_str(text).map_err(|e| e.to_string())?;
        match doc {
            Value::Mapping(doc) => {
                let vocab = Self { doc };
                if !vocab.section("tier_1_domains").is_some_and(Value::is_mapping) {
                    return Err("missing or invalid tier_1_domains".to_string());
                }
                if !vocab.section("tier_2_tags").is_some_and(Value::is_mapping) {
                    return Err("missing or invalid tier_2_tags".to_string());
                }
                Ok(vocab)
            },
            Value::Null => Err("document is empty".to_string()),
            _ => Err("document root is not a mapping".to_string()),
        }
    }

    /// Serializes the document back to block-style YAML, preserving key
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns the serialization failure as a plain string.
    pub fn to_yaml(&self) -> std::result::Result<String, String> {
        serde_yaml_ng::to_string(&Value::Mapping(self.doc.clone())).map_err(|e| e.to_string())
    }

    fn section(&self, key: &str) -> Option<&Value> {
        self.doc.get(Value::String(key.to_string()))
    }

    /// Tier-1 domain names, in document order.
    #[must_use]
    pub fn tier_1_domain_names(&self) -> Vec<String> {
        self.section("tier_1_domains")
            .and_then(Value::as_mapping)
            .map(|m| {
                m.keys()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `domain` is a tier-1 key.
    #[must_use]
    pub fn has_domain(&self, domain: &str) -> bool {
        self.section("tier_1_domains")
            .and_then(Value::as_mapping)
            .is_some_and(|m| m.contains_key(Value::String(domain.to_string())))
    }

    /// Tier-2 tags for one domain, in document order.
    #[must_use]
    pub fn domain_tags(&self, domain: &str) -> Vec<String> {
        self.section("tier_2_tags")
            .and_then(Value::as_mapping)
            .and_then(|m| m.get(Value::String(domain.to_string())))
            .and_then(Value::as_sequence)
            .map(|seq| {
                seq.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All tier-2 entries as `(domain, tags)` pairs, in document order.
    #[must_use]
    pub fn tier_2_entries(&self) -> Vec<(String, Vec<String>)> {
        self.section("tier_2_tags")
            .and_then(Value::as_mapping)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| {
                        let domain = k.as_str()?.to_string();
                        let tags = v
                            .as_sequence()
                            .map(|seq| {
                                seq.iter()
                                    .filter_map(Value::as_str)
                                    .map(ToString::to_string)
                                    .collect()
                            })
                            .unwrap_or_default();
                        Some((domain, tags))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The set of all tier-2 tags across every domain.
    ///
    /// Used to measure vocabulary growth before and after a pass.
    #[must_use]
    pub fn all_tier_2_tags(&self) -> HashSet<String> {
        self.tier_2_entries()
            .into_iter()
            .flat_map(|(_, tags)| tags)
            .collect()
    }

    /// Forbidden stopwords, in document order.
    #[must_use]
    pub fn stopwords(&self) -> Vec<String> {
        self.section("stopwords")
            .and_then(Value::as_sequence)
            .map(|seq| {
                seq.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Word-to-canonical vocabulary mappings, in document order.
    #[must_use]
    pub fn vocabulary_mappings(&self) -> Vec<(String, String)> {
        self.section("vocabulary_mappings")
            .and_then(Value::as_mapping)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| {
                        Some((k.as_str()?.to_string(), v.as_str()?.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Synonym groups as `(canonical, variants)` pairs, in document order.
    #[must_use]
    pub fn synonyms(&self) -> Vec<(String, Vec<String>)> {
        self.section("synonyms")
            .and_then(Value::as_mapping)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| {
                        let canonical = k.as_str()?.to_string();
                        let variants = v
                            .as_sequence()
                            .map(|seq| {
                                seq.iter()
                                    .filter_map(Value::as_str)
                                    .map(ToString::to_string)
                                    .collect()
                            })
                            .unwrap_or_default();
                        Some((canonical, variants))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Appends each tag not already present to the domain's tier-2 list,
    /// preserving existing order. Creates the list if missing.
    ///
    /// Returns the number of tags actually added, so callers can avoid
    /// needless writes when nothing changed. Does *not* check that the
    /// domain is a tier-1 key; the store does that before calling.
    pub fn append_tags(&mut self, domain: &str, tags: &[String]) -> usize {
        let tier_2_key = Value::String("tier_2_tags".to_string());
        if !self.doc.contains_key(&tier_2_key) {
            self.doc.insert(tier_2_key.clone(), Value::Mapping(Mapping::new()));
        }
        let Some(tier_2) = self
            .doc
            .get_mut(&tier_2_key)
            .and_then(Value::as_mapping_mut)
        else {
            return 0;
        };

        let domain_key = Value::String(domain.to_string());
        if !tier_2.contains_key(&domain_key) {
            tier_2.insert(domain_key.clone(), Value::Sequence(Vec::new()));
        }
        let Some(list) = tier_2.get_mut(&domain_key).and_then(Value::as_sequence_mut) else {
            return 0;
        };

        let existing: HashSet<String> = list
            .iter()
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect();

        let mut added = 0;
        for tag in tags {
            if !existing.contains(tag) {
                list.push(Value::String(tag.clone()));
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vocabulary {
        Vocabulary::parse(
            r"
schema_version: 1
tier_1_domains:
  architecture:
    description: System structure and component boundaries
    aliases: [arch, structure]
  testing:
    description: Test strategy and coverage rules
    aliases: [tests]
tier_2_tags:
  architecture: [layering, boundaries]
  testing: []
vocabulary_mappings:
  db: database
synonyms:
  database: [db, datastore]
stopwords: [misc, general, stuff]
",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_requires_tier_maps() {
        assert!(Vocabulary::parse("schema_version: 1").is_err());
        assert!(Vocabulary::parse("").is_err());
        assert!(Vocabulary::parse("- just\n- a\n- list").is_err());
    }

    #[test]
    fn test_domain_access() {
        let vocab = sample();
        assert_eq!(
            vocab.tier_1_domain_names(),
            vec!["architecture".to_string(), "testing".to_string()]
        );
        assert!(vocab.has_domain("architecture"));
        assert!(!vocab.has_domain("security"));
        assert_eq!(vocab.domain_tags("architecture"), vec!["layering", "boundaries"]);
        assert!(vocab.domain_tags("security").is_empty());
    }

    #[test]
    fn test_append_tags_skips_duplicates() {
        let mut vocab = sample();
        let added = vocab.append_tags(
            "architecture",
            &["layering".to_string(), "hexagonal".to_string()],
        );
        assert_eq!(added, 1);
        assert_eq!(
            vocab.domain_tags("architecture"),
            vec!["layering", "boundaries", "hexagonal"]
        );

        // Second identical call adds nothing.
        let added = vocab.append_tags(
            "architecture",
            &["layering".to_string(), "hexagonal".to_string()],
        );
        assert_eq!(added, 0);
    }

    #[test]
    fn test_append_tags_creates_missing_list() {
        let mut vocab = sample();
        let added = vocab.append_tags("security", &["threat-model".to_string()]);
        assert_eq!(added, 1);
        assert_eq!(vocab.domain_tags("security"), vec!["threat-model"]);
    }

    #[test]
    fn test_yaml_roundtrip_preserves_order() {
        let vocab = sample();
        let text = vocab.to_yaml().unwrap();
        let reparsed = Vocabulary::parse(&text).unwrap();
        assert_eq!(reparsed.tier_1_domain_names(), vocab.tier_1_domain_names());
        assert_eq!(
            reparsed.domain_tags("architecture"),
            vocab.domain_tags("architecture")
        );
        // schema_version is untouched by a round-trip
        assert!(text.contains("schema_version"));
    }

    #[test]
    fn test_prompt_sections() {
        let vocab = sample();
        assert_eq!(vocab.stopwords(), vec!["misc", "general", "stuff"]);
        assert_eq!(
            vocab.vocabulary_mappings(),
            vec![("db".to_string(), "database".to_string())]
        );
        let synonyms = vocab.synonyms();
        assert_eq!(synonyms.len(), 1);
        assert_eq!(synonyms[0].0, "database");
        assert_eq!(synonyms[0].1, vec!["db", "datastore"]);
    }
}
