//! Corpus-wide term statistics for label synthesis.
//!
//! TF-IDF over unigrams and bigrams. Rows are sparse and L2-normalized, so a
//! cluster's importance vector is simply the mean of its members' rows.
//!
//! # Weighting
//! - tf: raw count of the term in the document
//! - idf: `ln((1 + n) / (1 + df)) + 1` (smoothed, never zero)
//! - vocabulary: the `max_features` most frequent terms, ties alphabetical

use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Default vocabulary cap.
pub const DEFAULT_MAX_FEATURES: usize = 5000;

/// Common English words carrying no topical signal.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst", "an",
    "and", "another", "any", "anyhow", "anyone", "anything", "anyway", "anywhere", "are",
    "around", "as", "at", "back", "be", "became", "because", "become", "becomes", "becoming",
    "been", "before", "beforehand", "behind", "being", "below", "beside", "besides", "between",
    "beyond", "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "doing", "done",
    "down", "due", "during", "each", "eg", "either", "else", "elsewhere", "enough", "etc", "even",
    "ever", "every", "everyone", "everything", "everywhere", "except", "few", "for", "former",
    "formerly", "from", "further", "had", "has", "have", "he", "hence", "her", "here",
    "hereafter", "hereby", "herein", "hers", "herself", "him", "himself", "his", "how",
    "however", "i", "ie", "if", "in", "indeed", "into", "is", "it", "its", "itself", "just",
    "last", "latter", "least", "less", "made", "many", "may", "me", "meanwhile", "might", "more",
    "moreover", "most", "mostly", "much", "must", "my", "myself", "namely", "neither", "never",
    "nevertheless", "next", "no", "nobody", "none", "noone", "nor", "not", "nothing", "now",
    "nowhere", "of", "off", "often", "on", "once", "one", "only", "onto", "or", "other",
    "others", "otherwise", "our", "ours", "ourselves", "out", "over", "own", "per", "perhaps",
    "please", "rather", "re", "same", "seem", "seemed", "seeming", "seems", "several", "she",
    "should", "since", "so", "some", "somehow", "someone", "something", "sometime", "sometimes",
    "somewhere", "still", "such", "than", "that", "the", "their", "them", "themselves", "then",
    "thence", "there", "thereafter", "thereby", "therefore", "therein", "thereupon", "these",
    "they", "this", "those", "though", "through", "throughout", "thru", "thus", "to", "together",
    "too", "toward", "towards", "under", "until", "up", "upon", "us", "very", "via", "was", "we",
    "well", "were", "what", "whatever", "when", "whence", "whenever", "where", "whereafter",
    "whereas", "whereby", "wherein", "whereupon", "wherever", "whether", "which", "while",
    "whither", "who", "whoever", "whole", "whom", "whose", "why", "will", "with", "within",
    "without", "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("static token pattern is valid"))
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Options for [`TermStatistics::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfIdfOptions {
    pub max_features: usize,
    /// Longest n-gram; 1 = unigrams only.
    pub max_ngram: usize,
}

impl Default for TfIdfOptions {
    fn default() -> Self {
        Self {
            max_features: DEFAULT_MAX_FEATURES,
            max_ngram: 2,
        }
    }
}

/// Lowercase, tokenize, drop stop words, then emit n-grams up to `max_ngram`.
pub fn extract_terms(text: &str, max_ngram: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|token| !is_stop_word(token))
        .collect();

    let mut terms: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    for n in 2..=max_ngram.max(1) {
        terms.extend(tokens.windows(n).map(|window| window.join(" ")));
    }
    terms
}

/// Fitted document-by-term importance matrix.
#[derive(Debug, Clone)]
pub struct TermStatistics {
    vocabulary: Vec<String>,
    /// Sparse `(term index, weight)` rows, one per document.
    rows: Vec<Vec<(u32, f32)>>,
}

impl TermStatistics {
    /// Fit term weights over the whole corpus.
    pub fn fit<S: AsRef<str> + Sync>(texts: &[S], options: TfIdfOptions) -> Self {
        let counts: Vec<HashMap<String, u32>> = texts
            .par_iter()
            .map(|text| {
                let mut counts = HashMap::new();
                for term in extract_terms(text.as_ref(), options.max_ngram) {
                    *counts.entry(term).or_insert(0u32) += 1;
                }
                counts
            })
            .collect();

        // Corpus frequency and document frequency per term
        let mut totals: BTreeMap<&str, (u64, u32)> = BTreeMap::new();
        for document in &counts {
            for (term, count) in document {
                let entry = totals.entry(term.as_str()).or_insert((0, 0));
                entry.0 += u64::from(*count);
                entry.1 += 1;
            }
        }

        let mut ranked: Vec<(&str, u64, u32)> = totals
            .into_iter()
            .map(|(term, (total, df))| (term, total, df))
            .collect();
        // Stable sort over alphabetical input keeps ties alphabetical
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(options.max_features);
        ranked.sort_by(|a, b| a.0.cmp(b.0));

        let n = texts.len() as f32;
        let vocabulary: Vec<String> = ranked.iter().map(|(term, _, _)| term.to_string()).collect();
        let idf: Vec<f32> = ranked
            .iter()
            .map(|(_, _, df)| ((1.0 + n) / (1.0 + *df as f32)).ln() + 1.0)
            .collect();
        let index: HashMap<&str, u32> = vocabulary
            .iter()
            .enumerate()
            .map(|(i, term)| (term.as_str(), i as u32))
            .collect();

        let rows = counts
            .par_iter()
            .map(|document| {
                let mut row: Vec<(u32, f32)> = document
                    .iter()
                    .filter_map(|(term, count)| {
                        index
                            .get(term.as_str())
                            .map(|&i| (i, *count as f32 * idf[i as usize]))
                    })
                    .collect();
                row.sort_by_key(|(i, _)| *i);
                let norm = row.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for (_, weight) in row.iter_mut() {
                        *weight /= norm;
                    }
                }
                row
            })
            .collect();

        Self { vocabulary, rows }
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// Average the rows of `members` into a dense importance vector.
    ///
    /// Empty membership yields all zeros.
    pub fn mean_importance(&self, members: &[usize]) -> Vec<f32> {
        let mut importance = vec![0.0f32; self.vocabulary.len()];
        if members.is_empty() {
            return importance;
        }
        for &member in members {
            for &(term, weight) in &self.rows[member] {
                importance[term as usize] += weight;
            }
        }
        let count = members.len() as f32;
        for value in importance.iter_mut() {
            *value /= count;
        }
        importance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_are_sorted() {
        assert!(STOP_WORDS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_extract_terms_drops_stop_words_before_bigrams() {
        let terms = extract_terms("The Senate and the House vote", 2);
        assert_eq!(
            terms,
            vec!["senate", "house", "vote", "senate house", "house vote"]
        );
        assert!(extract_terms("a I x", 2).is_empty());
    }

    #[test]
    fn test_rows_are_normalized() {
        let stats = TermStatistics::fit(
            &["budget deal senate", "jazz festival music", "senate budget vote"],
            TfIdfOptions::default(),
        );
        assert_eq!(stats.rows.len(), 3);
        for row in &stats.rows {
            let norm: f32 = row.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rarer_terms_weigh_more() {
        let stats = TermStatistics::fit(
            &["senate budget", "senate vote", "senate jazz"],
            TfIdfOptions {
                max_features: 100,
                max_ngram: 1,
            },
        );
        let vocab = stats.vocabulary();
        let senate = vocab.iter().position(|t| t == "senate").unwrap() as u32;
        let jazz = vocab.iter().position(|t| t == "jazz").unwrap() as u32;
        let weight = |term: u32| {
            stats.rows[2]
                .iter()
                .find(|(i, _)| *i == term)
                .map(|(_, w)| *w)
                .unwrap()
        };
        // Equal counts in the third document; only idf separates them
        assert!(weight(jazz) > weight(senate));
        let importance = stats.mean_importance(&[0, 1, 2]);
        assert!(importance[senate as usize] > importance[jazz as usize]);
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let stats = TermStatistics::fit(
            &["alpha alpha beta", "alpha gamma"],
            TfIdfOptions {
                max_features: 2,
                max_ngram: 1,
            },
        );
        // alpha=3; beta and gamma tie at 1, beta wins alphabetically
        assert_eq!(stats.vocabulary(), &["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_mean_importance() {
        let stats = TermStatistics::fit(
            &["rocket launch", "rocket orbit", "cooking pasta"],
            TfIdfOptions::default(),
        );
        let importance = stats.mean_importance(&[0, 1]);
        let rocket = stats.vocabulary().iter().position(|t| t == "rocket").unwrap();
        let pasta = stats.vocabulary().iter().position(|t| t == "pasta").unwrap();
        assert!(importance[rocket] > 0.0);
        assert_eq!(importance[pasta], 0.0);
        assert!(stats.mean_importance(&[]).iter().all(|v| *v == 0.0));
    }
}
