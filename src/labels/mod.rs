//! Human-readable cluster labels.
//!
//! Labels come from corpus-wide TF-IDF statistics averaged per cluster,
//! filtered through a denylist, and optionally rewritten by an external
//! [`LabelRewriter`].

mod refine;
mod synth;
mod terms;

pub use refine::{
    DEFAULT_BASE_URL, DEFAULT_MAX_LABEL_LEN, DEFAULT_MODEL, LabelRefinementError, LabelRewriter,
    MAX_SAMPLES, NoopRewriter, OpenAiRewriter, clean_label,
};
pub use synth::{
    BUILTIN_DENYLIST, DEFAULT_MAX_TERMS, DEFAULT_SEPARATOR, LabelSynthesizer, MIN_TERM_CHARS,
    fallback_label,
};
pub use terms::{DEFAULT_MAX_FEATURES, TermStatistics, TfIdfOptions, extract_terms};
