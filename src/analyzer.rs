use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    TextAnalyzer,
    TokenStream,
};

/// Name recorded for the built-in analyzer chain.
pub const DEFAULT_TOKENIZER: &str = "en_stem";

/// Tokens longer than this many bytes are dropped.
const MAX_TOKEN_LEN: usize = 40;

/// Term statistics for one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCounts {
    /// Total number of tokens, counting repeats.
    pub length: u64,
    pub frequencies: BTreeMap<String, u32>,
}

/// The fixed text analysis chain shared by indexing and querying.
///
/// Splits on non-alphanumeric characters, drops overlong tokens, lowercases
/// and applies English stemming.
#[derive(Clone)]
pub struct Analyzer {
    inner: TextAnalyzer,
}

impl Default for Analyzer {
    fn default() -> Self {
        let inner = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser)
            .filter(Stemmer::new(Language::English))
            .build();
        Self { inner }
    }
}

impl Analyzer {
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.inner.clone();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        tokens
    }

    /// Distinct terms of a query, in first-seen order.
    pub fn query_terms(&self, text: &str) -> Vec<String> {
        let mut terms = self.tokenize(text);
        let mut seen = std::collections::HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        terms
    }

    pub fn term_counts(&self, text: &str) -> TermCounts {
        let mut counts = TermCounts::default();
        for token in self.tokenize(text) {
            counts.length += 1;
            *counts.frequencies.entry(token).or_default() += 1;
        }
        counts
    }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("name", &DEFAULT_TOKENIZER)
            .finish()
    }
}
