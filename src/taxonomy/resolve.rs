//! Natural-language name → concept resolution.
//!
//! Corpus terms are ambiguous: one surface form may denote several concepts.
//! Resolution returns every candidate and leaves narrowing to the caller.
//! Names are normalized before lookup (NFKC, lowercase, underscores to spaces,
//! trailing `(qualifier)` and `, qualifier` suffixes dropped).

use std::collections::HashSet;
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::concept::ConceptId;

use super::Taxonomy;

static QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\s*\([^)]*\)|,.*)$").expect("valid qualifier regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Normalize a surface name for alias lookup.
pub fn normalize_name(raw: &str) -> String {
    let text: String = raw.nfkc().collect::<String>().replace('_', " ");
    let text = QUALIFIER.replace(text.trim(), "");
    WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

/// Maps text to zero, one or many concepts.
pub trait NameResolver: Send + Sync {
    fn resolve_name(&self, text: &str) -> HashSet<ConceptId>;
}

/// Alias table: normalized name → concepts.
#[derive(Debug, Default)]
pub struct AliasIndex {
    aliases: DashMap<String, HashSet<ConceptId>>,
}

impl AliasIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every concept label in the taxonomy, plus its CamelCase split
    /// (`PlayingCard` is also reachable as "playing card").
    pub fn from_labels(
        taxonomy: &dyn Taxonomy,
        concepts: impl IntoIterator<Item = ConceptId>,
    ) -> Self {
        let index = Self::new();
        for concept in concepts {
            let label = taxonomy.label(concept);
            index.add_alias(&label, concept);
            let split = split_camel_case(&label);
            if split != label {
                index.add_alias(&split, concept);
            }
        }
        index
    }

    pub fn add_alias(&self, alias: &str, concept: ConceptId) {
        self.aliases
            .entry(normalize_name(alias))
            .or_default()
            .insert(concept);
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl NameResolver for AliasIndex {
    fn resolve_name(&self, text: &str) -> HashSet<ConceptId> {
        self.aliases
            .get(&normalize_name(text))
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }
}

fn split_camel_case(label: &str) -> String {
    let mut out = String::with_capacity(label.len() + 4);
    let mut prev_lower = false;
    for ch in label.chars() {
        if ch.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        out.push(ch);
    }
    out
}
