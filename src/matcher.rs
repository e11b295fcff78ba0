//! Case-insensitive watch-term matching with context snippets.
//!
//! A document matches when its lowercased text contains a lowercased watch
//! term. Each occurrence yields a snippet of the surrounding text, up to
//! [`SNIPPET_CONTEXT_CHARS`] characters on either side, clamped to the text
//! and trimmed. Snippets are deduplicated and capped at [`MAX_SNIPPETS`] per
//! document, across all of its terms.

use tracing::{debug, info};

use crate::models::{Document, Match};

/// Characters of context kept on each side of an occurrence.
pub const SNIPPET_CONTEXT_CHARS: usize = 100;
/// Maximum snippets kept per document.
pub const MAX_SNIPPETS: usize = 3;

/// Drop blank terms and case-insensitive repeats, keeping first-seen order
/// and casing.
///
/// Terms are not trimmed: surrounding spaces are part of the pattern, so
/// `" de "` only matches the standalone word.
pub fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for term in terms {
        if term.trim().is_empty() {
            continue;
        }
        let folded = term.to_lowercase();
        if seen.contains(&folded) {
            continue;
        }
        seen.push(folded);
        out.push(term.clone());
    }
    out
}

/// Match every document against every term. Output preserves document order.
pub fn find_matches(documents: &[Document], terms: &[String]) -> Vec<Match> {
    let terms = normalize_terms(terms);
    if terms.is_empty() {
        return Vec::new();
    }

    let matches: Vec<Match> = documents
        .iter()
        .filter_map(|doc| match_document(doc, &terms))
        .collect();

    info!(
        documents = documents.len(),
        terms = terms.len(),
        matches = matches.len(),
        "search completed"
    );
    matches
}

/// Match one document. Returns `None` when no term occurs in it.
///
/// `terms` are used as given; callers wanting trimming and dedup should pass
/// them through [`normalize_terms`] first.
pub fn match_document(doc: &Document, terms: &[String]) -> Option<Match> {
    let text = FoldedText::new(&doc.text);
    let mut matched_terms = Vec::new();
    let mut snippets: Vec<String> = Vec::new();

    for term in terms {
        let needle = term.to_lowercase();
        if needle.is_empty() || !text.folded.contains(&needle) {
            continue;
        }
        matched_terms.push(term.clone());

        let term_chars = term.chars().count();
        for (offset, _) in text.folded.match_indices(&needle) {
            if snippets.len() >= MAX_SNIPPETS {
                break;
            }
            let snippet = text.window(offset, term_chars);
            if !snippets.contains(&snippet) {
                snippets.push(snippet);
            }
        }
    }

    if matched_terms.is_empty() {
        return None;
    }
    debug!(
        section = %doc.section,
        filename = %doc.filename,
        terms = ?matched_terms,
        "match found"
    );
    Some(Match {
        document: doc.clone(),
        matched_terms,
        snippets,
        summary: None,
    })
}

/// Lowercased view of a text that can map offsets back to the original.
///
/// Lowercasing may change a character's byte length (and occasionally its
/// character count), so offsets are translated through the original
/// character each folded run came from.
struct FoldedText<'a> {
    original: &'a str,
    folded: String,
    /// Byte offset in `folded` where each original character's fold begins.
    folded_starts: Vec<usize>,
    /// Byte offset in `original` of each character.
    char_starts: Vec<usize>,
}

impl<'a> FoldedText<'a> {
    fn new(original: &'a str) -> Self {
        let mut folded = String::with_capacity(original.len());
        let mut folded_starts = Vec::with_capacity(original.len());
        let mut char_starts = Vec::with_capacity(original.len());
        for (byte, ch) in original.char_indices() {
            char_starts.push(byte);
            folded_starts.push(folded.len());
            folded.extend(ch.to_lowercase());
        }
        Self {
            original,
            folded,
            folded_starts,
            char_starts,
        }
    }

    /// Index of the original character whose fold contains `folded_offset`.
    fn char_index(&self, folded_offset: usize) -> usize {
        self.folded_starts
            .partition_point(|&start| start <= folded_offset)
            .saturating_sub(1)
    }

    fn byte_at(&self, char_index: usize) -> usize {
        self.char_starts
            .get(char_index)
            .copied()
            .unwrap_or(self.original.len())
    }

    /// Trimmed text spanning `[occurrence - 100, occurrence + term + 100]`
    /// characters, clamped to the text.
    fn window(&self, folded_offset: usize, term_chars: usize) -> String {
        let at = self.char_index(folded_offset);
        let start = at.saturating_sub(SNIPPET_CONTEXT_CHARS);
        let end = (at + term_chars + SNIPPET_CONTEXT_CHARS).min(self.char_starts.len());
        self.original[self.byte_at(start)..self.byte_at(end)]
            .trim()
            .to_string()
    }
}
