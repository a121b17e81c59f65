//! Keyword admission for discovered content.
//!
//! Case-insensitive substring matching: any `avoid` entry disqualifies,
//! every `must` entry is required. Avoid terms are checked first so a
//! disqualifier always wins.

/// Allow/deny keyword lists.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    must: Vec<String>,
    avoid: Vec<String>,
}

impl KeywordFilter {
    pub fn new(
        must: impl IntoIterator<Item = String>,
        avoid: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            must: must.into_iter().map(|s| s.to_lowercase()).collect(),
            avoid: avoid.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Whether `text` passes both lists.
    pub fn admits(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        if self.avoid.iter().any(|term| haystack.contains(term)) {
            return false;
        }
        self.must.iter().all(|term| haystack.contains(term))
    }
}
