//! Document ingestion.
//!
//! News exports are messy: a headline can be a plain string, a structured
//! object, or a string holding an encoded object. Everything is normalized
//! once here, when the [`Document`] is built, so the rest of the crate only
//! ever sees `Option<String>`.

use crate::error::{IndexError, IndexResult};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Length of the text prefix used when a document has no headline.
const TITLE_FALLBACK_CHARS: usize = 80;

/// Seed for corpus sampling when none is configured.
pub const DEFAULT_SAMPLE_SEED: u64 = 42;

/// Object keys tried, in order, before any other string value.
const PREFERRED_KEYS: [&str; 3] = ["main", "print_headline", "original"];

/// String values that mean "missing" in exported data.
const NULL_LIKE: [&str; 4] = ["nan", "none", "null", "undefined"];

/// A corpus document. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    /// Text that was embedded: `"<headline>. <abstract>"`.
    pub text: String,
    pub headline: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub pub_date: Option<String>,
    pub section: Option<String>,
    pub byline: Option<String>,
    pub url: Option<String>,
}

impl Document {
    /// Create a document from its headline and abstract.
    pub fn new(id: u64, headline: Option<String>, abstract_text: Option<String>) -> Self {
        let text = format!(
            "{}. {}",
            headline.as_deref().unwrap_or_default(),
            abstract_text.as_deref().unwrap_or_default()
        );
        Self {
            id,
            text,
            headline,
            abstract_text,
            pub_date: None,
            section: None,
            byline: None,
            url: None,
        }
    }

    pub fn embedding_text(&self) -> &str {
        &self.text
    }

    /// Display title: the headline, else the start of the text.
    pub fn title(&self) -> String {
        match &self.headline {
            Some(headline) => headline.clone(),
            None => self
                .text
                .trim_start_matches(". ")
                .chars()
                .take(TITLE_FALLBACK_CHARS)
                .collect(),
        }
    }
}

/// A metadata value as it appears in the raw export.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Text(String),
    Number(serde_json::Number),
    Object(Map<String, Value>),
    Other(Value),
}

/// Normalize a raw metadata value into plain text.
///
/// Objects yield `main`, then `print_headline`, then `original`, then the
/// first non-empty string value in key order. Strings that encode an object,
/// in JSON or Python-literal form, are decoded first; undecodable strings are
/// kept verbatim. Blank and null-like values become `None`.
pub fn normalize_field(field: RawField) -> Option<String> {
    match field {
        RawField::Text(text) => normalize_text(&text),
        RawField::Number(number) => Some(number.to_string()),
        RawField::Object(map) => from_object(&map),
        RawField::Other(value) => from_value(&value),
    }
}

fn normalize_text(text: &str) -> Option<String> {
    let trimmed = clean(text)?;
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Some(map) = decode_object(trimmed) {
            return from_object(&map);
        }
    }
    Some(trimmed.to_string())
}

fn clean(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() || NULL_LIKE.contains(&trimmed.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(trimmed)
    }
}

fn from_object(map: &Map<String, Value>) -> Option<String> {
    PREFERRED_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .chain(map.values())
        .find_map(|value| match value {
            Value::String(s) => clean(s).map(str::to_string),
            _ => None,
        })
}

fn from_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => normalize_text(s),
        Value::Object(map) => from_object(map),
        Value::Array(items) => items.iter().find_map(from_value),
    }
}

/// Decode `{...}` written either as JSON or as a Python dict literal.
fn decode_object(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Some(map);
    }
    match serde_json::from_str::<Value>(&python_literal_to_json(text)) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Rewrite single-quoted strings and `None`/`True`/`False` into JSON.
fn python_literal_to_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                let quote = ch;
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                match escaped {
                                    '\'' => out.push('\''),
                                    '"' => out.push_str("\\\""),
                                    other => {
                                        out.push('\\');
                                        out.push(other);
                                    }
                                }
                            }
                        }
                        c if c == quote => break,
                        '"' => out.push_str("\\\""),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "None" => out.push_str("null"),
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    _ => out.push_str(&word),
                }
            }
            c => out.push(c),
        }
    }

    out
}

/// One record of a raw corpus export.
///
/// Unknown fields are ignored. When several source fields map to the same
/// document field, the first non-empty one wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDocument {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub headline: Option<RawField>,
    #[serde(default)]
    pub title: Option<RawField>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<RawField>,
    #[serde(default)]
    pub snippet: Option<RawField>,
    #[serde(default)]
    pub lead_paragraph: Option<RawField>,
    #[serde(default)]
    pub pub_date: Option<RawField>,
    #[serde(default)]
    pub date: Option<RawField>,
    #[serde(default)]
    pub section: Option<RawField>,
    #[serde(default)]
    pub section_name: Option<RawField>,
    #[serde(default)]
    pub byline: Option<RawField>,
    #[serde(default)]
    pub url: Option<RawField>,
    #[serde(default)]
    pub web_url: Option<RawField>,
}

const N_ALTERNATIVES: usize = 3;

fn first_of(fields: [Option<RawField>; N_ALTERNATIVES]) -> Option<String> {
    fields.into_iter().flatten().find_map(normalize_field)
}

impl RawDocument {
    /// Normalize into a [`Document`]; `None` when there is neither a
    /// headline nor an abstract.
    pub fn into_document(self, position: usize) -> Option<Document> {
        let id = self
            .id
            .as_ref()
            .and_then(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(position as u64);

        let headline = first_of([self.headline, self.title, None]);
        let abstract_text = first_of([self.abstract_text, self.snippet, self.lead_paragraph]);
        if headline.is_none() && abstract_text.is_none() {
            return None;
        }

        let mut document = Document::new(id, headline, abstract_text);
        document.pub_date = first_of([self.pub_date, self.date, None]);
        document.section = first_of([self.section, self.section_name, None]);
        document.byline = first_of([self.byline, None, None]);
        document.url = first_of([self.url, self.web_url, None]);
        Some(document)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    List(Vec<RawDocument>),
    Wrapped { articles: Vec<RawDocument> },
}

/// Parse corpus text: a JSON array, an `{"articles": [...]}` object, or
/// JSON Lines.
pub fn parse_documents(content: &str) -> Result<Vec<Document>, String> {
    let raws = match serde_json::from_str::<CorpusFile>(content) {
        Ok(CorpusFile::List(raws)) | Ok(CorpusFile::Wrapped { articles: raws }) => raws,
        Err(whole_error) => {
            let mut raws = Vec::new();
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let raw: RawDocument = serde_json::from_str(line).map_err(|e| {
                    if line_no == 0 {
                        whole_error.to_string()
                    } else {
                        format!("line {}: {e}", line_no + 1)
                    }
                })?;
                raws.push(raw);
            }
            raws
        }
    };

    let total = raws.len();
    let documents: Vec<Document> = raws
        .into_iter()
        .enumerate()
        .filter_map(|(position, raw)| {
            let document = raw.into_document(position);
            if document.is_none() {
                debug!("Dropping record {position}: no headline or abstract");
            }
            document
        })
        .collect();

    if documents.len() < total {
        debug!(
            "Dropped {} of {total} records without headline or abstract",
            total - documents.len()
        );
    }
    check_unique_ids(&documents)?;
    Ok(documents)
}

/// Explicit ids and positional fallbacks can collide; ids must identify
/// one document.
fn check_unique_ids(documents: &[Document]) -> Result<(), String> {
    let mut seen: HashMap<u64, usize> = HashMap::with_capacity(documents.len());
    for (position, document) in documents.iter().enumerate() {
        if let Some(first) = seen.insert(document.id, position) {
            return Err(format!(
                "duplicate document id {} (documents {first} and {position})",
                document.id
            ));
        }
    }
    Ok(())
}

/// Load and normalize a corpus file.
pub fn load_documents(path: &Path) -> IndexResult<Vec<Document>> {
    let content = std::fs::read_to_string(path).map_err(|source| IndexError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let documents = parse_documents(&content).map_err(|reason| IndexError::CorpusParse {
        path: path.to_path_buf(),
        reason,
    })?;

    info!("Loaded {} documents from {}", documents.len(), path.display());
    Ok(documents)
}

/// Keep a seeded random subset of `size` documents, in their original order.
///
/// Returns every document when `size` is not smaller than the corpus.
pub fn sample_documents(documents: Vec<Document>, size: usize, seed: u64) -> Vec<Document> {
    let total = documents.len();
    if size >= total {
        return documents;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keep = rand::seq::index::sample(&mut rng, total, size).into_vec();
    keep.sort_unstable();

    let mut keep = keep.into_iter().peekable();
    let sampled: Vec<Document> = documents
        .into_iter()
        .enumerate()
        .filter_map(|(position, document)| keep.next_if_eq(&position).map(|_| document))
        .collect();
    info!("Sampled {} of {total} documents (seed {seed})", sampled.len());
    sampled
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn text(s: &str) -> RawField {
        RawField::Text(s.to_string())
    }

    #[test]
    fn test_normalize_plain_and_null_like() {
        assert_eq!(normalize_field(text("  Senate Votes ")), Some("Senate Votes".into()));
        assert_eq!(normalize_field(text("   ")), None);
        assert_eq!(normalize_field(text("nan")), None);
        assert_eq!(normalize_field(text("None")), None);
        assert_eq!(
            normalize_field(RawField::Number(serde_json::Number::from(2021))),
            Some("2021".into())
        );
    }

    #[test]
    fn test_normalize_structured_headline() {
        let json: RawField =
            serde_json::from_str(r#"{"main": "Markets Rally", "kicker": null}"#).unwrap();
        assert_eq!(normalize_field(json), Some("Markets Rally".into()));

        let fallback: RawField =
            serde_json::from_str(r#"{"main": "", "print_headline": "Print Title"}"#).unwrap();
        assert_eq!(normalize_field(fallback), Some("Print Title".into()));
    }

    #[test]
    fn test_normalize_encoded_headline() {
        let python = text("{'main': 'Jazz at Dusk', 'kicker': None, 'print_headline': ''}");
        assert_eq!(normalize_field(python), Some("Jazz at Dusk".into()));

        let escaped = text(r#"{'main': "Don't Look Up", 'seo': None}"#);
        assert_eq!(normalize_field(escaped), Some("Don't Look Up".into()));

        let json = text(r#"{"main": "Budget Deal"}"#);
        assert_eq!(normalize_field(json), Some("Budget Deal".into()));

        let broken = text("{not a dict}");
        assert_eq!(normalize_field(broken), Some("{not a dict}".into()));
    }

    #[test]
    fn test_parse_array_with_aliases() {
        let content = r#"[
            {"id": 7, "title": "Rain Returns", "snippet": "Storms move east.", "web_url": "https://x"},
            {"headline": "Only Headline"},
            {"section_name": "Arts"}
        ]"#;
        let docs = parse_documents(content).unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, 7);
        assert_eq!(docs[0].headline.as_deref(), Some("Rain Returns"));
        assert_eq!(docs[0].abstract_text.as_deref(), Some("Storms move east."));
        assert_eq!(docs[0].url.as_deref(), Some("https://x"));
        assert_eq!(docs[0].embedding_text(), "Rain Returns. Storms move east.");

        assert_eq!(docs[1].id, 1);
        assert_eq!(docs[1].embedding_text(), "Only Headline. ");
    }

    #[test]
    fn test_parse_wrapped_and_jsonl() {
        let wrapped = r#"{"articles": [{"headline": "A"}, {"abstract": "B text"}]}"#;
        assert_eq!(parse_documents(wrapped).unwrap().len(), 2);

        let jsonl = "{\"headline\": \"First\"}\n\n{\"headline\": \"Second\", \"id\": \"12\"}\n";
        let docs = parse_documents(jsonl).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].id, 12);

        assert!(parse_documents("{\"headline\": \"ok\"}\nnot json").is_err());
    }

    #[test]
    fn test_colliding_ids_are_rejected() {
        // The second record has no id and falls back to its position, 1
        let content = r#"[{"id": 1, "headline": "A"}, {"headline": "B"}]"#;
        let err = parse_documents(content).unwrap_err();
        assert!(err.contains("duplicate document id 1"));

        let distinct = r#"[{"id": 5, "headline": "A"}, {"headline": "B"}]"#;
        assert_eq!(parse_documents(distinct).unwrap().len(), 2);
    }

    #[test]
    fn test_sample_is_seeded_and_ordered() {
        let corpus: Vec<Document> = (0..50)
            .map(|i| Document::new(i, Some(format!("Doc {i}")), None))
            .collect();
        let ids = |docs: &[Document]| docs.iter().map(|d| d.id).collect::<Vec<_>>();

        let first = sample_documents(corpus.clone(), 10, 42);
        let again = sample_documents(corpus.clone(), 10, 42);
        assert_eq!(first.len(), 10);
        assert_eq!(ids(&first), ids(&again));
        assert!(ids(&first).windows(2).all(|w| w[0] < w[1]));

        let other = sample_documents(corpus.clone(), 10, 7);
        assert_ne!(ids(&first), ids(&other));

        assert_eq!(sample_documents(corpus.clone(), 50, 42).len(), 50);
        assert_eq!(sample_documents(corpus, 500, 42).len(), 50);
    }

    #[test]
    fn test_title_falls_back_to_text() {
        let doc = Document::new(0, None, Some("x".repeat(200)));
        assert_eq!(doc.title().chars().count(), TITLE_FALLBACK_CHARS);
        assert!(doc.title().starts_with('x'));
    }

    #[test]
    fn test_load_documents_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"headline": "Loaded"}}]"#).unwrap();
        let docs = load_documents(file.path()).unwrap();
        assert_eq!(docs[0].title(), "Loaded");

        let missing = load_documents(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(IndexError::FileRead { .. })));
    }
}
