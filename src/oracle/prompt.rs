//! Oracle prompt assembly.
//!
//! The prompt embeds the rule under classification plus a *truncated*
//! view of the vocabulary: tier-1 domain names as a flat list, at most
//! the first 10 tier-2 tags per domain, 5 vocabulary-mapping examples,
//! 5 synonym groups, and the first 20 stopwords, each with an
//! "(and N more)" suffix. The full vocabulary can run to thousands of
//! tags; the oracle only needs enough to stay on-vocabulary.

use crate::models::{Rule, Vocabulary};

/// Tier-2 tags shown per domain before truncation.
const TIER_2_PREVIEW: usize = 10;
/// Vocabulary-mapping examples shown.
const MAPPINGS_PREVIEW: usize = 5;
/// Synonym groups shown.
const SYNONYMS_PREVIEW: usize = 5;
/// Stopwords shown.
const STOPWORDS_PREVIEW: usize = 20;

/// Prompt template for tag classification.
///
/// `{variable}` placeholders are substituted by [`build_prompt`].
const TAG_OPTIMIZATION_PROMPT: &str = r#"You are a taxonomy curator. Propose canonical tags and a tier-1 domain for the knowledge rule below, staying strictly within the controlled vocabulary.

## Rule
- ID: {rule_id}
- Type: {rule_type}
- Title: {title}
- Description: {description}
- Current domain: {domain}
- Current tags: {tags}

## Controlled vocabulary
Tier-1 domains: {tier_1_domains}

Tier-2 tags by domain:
{tier_2_tags}

Vocabulary mappings (use the canonical form):
{vocabulary_mappings}

Synonyms (use the canonical form):
{synonyms}

Forbidden stopwords (never use as tags): {forbidden_stopwords}

## Instructions
- Propose between 2 and 5 tags. Prefer existing tier-2 tags; coin a new lowercase hyphenated tag only when nothing existing fits.
- Choose exactly one tier-1 domain from the list above.
- Report your confidence as a number between 0 and 1.

Respond with ONLY a JSON object, no other text:
{"tags": ["tag-one", "tag-two"], "domain": "domain-name", "confidence": 0.85, "reasoning": "one or two sentences"}"#;

/// Builds the classification prompt for one rule.
#[must_use]
pub fn build_prompt(rule: &Rule, vocab: &Vocabulary) -> String {
    let current_tags = if rule.tags.is_empty() {
        "(none)".to_string()
    } else {
        rule.tags.join(", ")
    };

    TAG_OPTIMIZATION_PROMPT
        .replace("{rule_id}", rule.id.as_str())
        .replace("{rule_type}", rule.kind.as_str())
        .replace("{title}", &rule.title)
        .replace("{description}", &rule.description)
        .replace("{domain}", rule.domain.as_deref().unwrap_or("(unspecified)"))
        .replace("{tags}", &current_tags)
        .replace("{tier_1_domains}", &vocab.tier_1_domain_names().join(", "))
        .replace("{tier_2_tags}", &format_tier_2_tags(vocab))
        .replace("{vocabulary_mappings}", &format_vocabulary_mappings(vocab))
        .replace("{synonyms}", &format_synonyms(vocab))
        .replace("{forbidden_stopwords}", &format_stopwords(vocab))
}

/// Formats tier-2 tags per domain, truncated to the first 10 per domain.
fn format_tier_2_tags(vocab: &Vocabulary) -> String {
    let entries = vocab.tier_2_entries();
    if entries.is_empty() {
        return "  (none defined)".to_string();
    }

    entries
        .iter()
        .map(|(domain, tags)| {
            if tags.len() <= TIER_2_PREVIEW {
                format!("  {domain}: {}", tags.join(", "))
            } else {
                format!(
                    "  {domain}: {}, ... (and {} more)",
                    tags[..TIER_2_PREVIEW].join(", "),
                    tags.len() - TIER_2_PREVIEW
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Formats the first 5 vocabulary-mapping examples.
fn format_vocabulary_mappings(vocab: &Vocabulary) -> String {
    let mappings = vocab.vocabulary_mappings();
    if mappings.is_empty() {
        return "  (none defined)".to_string();
    }

    let mut lines: Vec<String> = mappings
        .iter()
        .take(MAPPINGS_PREVIEW)
        .map(|(word, canonical)| format!("  \"{word}\" -> {canonical}"))
        .collect();
    if mappings.len() > MAPPINGS_PREVIEW {
        lines.push(format!("  ... (and {} more)", mappings.len() - MAPPINGS_PREVIEW));
    }
    lines.join("\n")
}

/// Formats the first 5 synonym groups.
fn format_synonyms(vocab: &Vocabulary) -> String {
    let synonyms = vocab.synonyms();
    if synonyms.is_empty() {
        return "  (none defined)".to_string();
    }

    let mut lines: Vec<String> = synonyms
        .iter()
        .take(SYNONYMS_PREVIEW)
        .map(|(canonical, variants)| format!("  {canonical}: {}", variants.join(", ")))
        .collect();
    if synonyms.len() > SYNONYMS_PREVIEW {
        lines.push(format!("  ... (and {} more)", synonyms.len() - SYNONYMS_PREVIEW));
    }
    lines.join("\n")
}

/// Formats the first 20 stopwords.
fn format_stopwords(vocab: &Vocabulary) -> String {
    let stopwords = vocab.stopwords();
    if stopwords.len() <= STOPWORDS_PREVIEW {
        stopwords.join(", ")
    } else {
        format!(
            "{}, ... (and {} more)",
            stopwords[..STOPWORDS_PREVIEW].join(", "),
            stopwords.len() - STOPWORDS_PREVIEW
        )
    }
}
