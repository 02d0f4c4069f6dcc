//! Label synthesis from aggregated term importance.

use std::collections::HashSet;

/// Structural and metadata words that leak from raw exports into text.
pub const BUILTIN_DENYLIST: &[&str] = &[
    "abstract",
    "byline",
    "content_kicker",
    "headline",
    "http",
    "https",
    "kicker",
    "lead_paragraph",
    "main",
    "name",
    "nan",
    "none",
    "null",
    "original",
    "print_headline",
    "pub_date",
    "section",
    "seo",
    "snippet",
    "sub",
    "url",
    "web_url",
    "www",
];

/// Shortest term accepted into a label.
pub const MIN_TERM_CHARS: usize = 3;

pub const DEFAULT_MAX_TERMS: usize = 3;
pub const DEFAULT_SEPARATOR: &str = " / ";

/// Builds short cluster labels from the top surviving terms.
#[derive(Debug, Clone)]
pub struct LabelSynthesizer {
    denylist: HashSet<String>,
    max_terms: usize,
    separator: String,
}

impl Default for LabelSynthesizer {
    fn default() -> Self {
        Self {
            denylist: BUILTIN_DENYLIST.iter().map(|w| w.to_string()).collect(),
            max_terms: DEFAULT_MAX_TERMS,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl LabelSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add configured words on top of the built-in denylist.
    pub fn with_extra_denylist<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.denylist
            .extend(words.into_iter().map(|w| w.as_ref().trim().to_lowercase()));
        self
    }

    pub fn with_max_terms(mut self, max_terms: usize) -> Self {
        self.max_terms = max_terms.max(1);
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Whether a term may appear in a label.
    pub fn accepts(&self, term: &str) -> bool {
        if term.chars().count() < MIN_TERM_CHARS || is_numeric(term) {
            return false;
        }
        if self.denylist.contains(term) {
            return false;
        }
        !term.split_whitespace().any(|token| self.denylist.contains(token))
    }

    /// Label for one cluster. Never empty.
    ///
    /// `importance` is aligned with `vocabulary`. Candidates are ranked by
    /// importance, ties alphabetical; terms with zero importance never count.
    pub fn synthesize(
        &self,
        importance: &[f32],
        vocabulary: &[String],
        prefix: &str,
        id: u32,
    ) -> String {
        let mut candidates: Vec<(&str, f32)> = vocabulary
            .iter()
            .zip(importance.iter())
            .filter(|(_, weight)| **weight > 0.0)
            .map(|(term, weight)| (term.as_str(), *weight))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let terms: Vec<&str> = candidates
            .into_iter()
            .map(|(term, _)| term)
            .filter(|term| self.accepts(term))
            .take(self.max_terms)
            .collect();

        if terms.is_empty() {
            fallback_label(prefix, id)
        } else {
            terms.join(&self.separator)
        }
    }
}

/// Default label, also used for clusters without members.
pub fn fallback_label(prefix: &str, id: u32) -> String {
    format!("{prefix} {id}")
}

/// Digits plus separators only, e.g. `2021`, `3.5`, `9 11`.
fn is_numeric(term: &str) -> bool {
    term.chars().any(|c| c.is_ascii_digit())
        && term
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '.' | ',' | '-' | '_' | '/' | ':'))
}
