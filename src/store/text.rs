//! Lightweight text normalisation shared by event search and rule retrieval.

use std::collections::HashSet;

/// Function words and conversational filler that never identify an event or
/// a rule on their own.
const STOPWORDS: &[&str] = &[
    "a", "about", "all", "am", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by",
    "can", "could", "did", "do", "does", "for", "from", "get", "give", "had", "has", "have",
    "hello", "hey", "hi", "how", "i", "i'd", "i'm", "if", "in", "into", "is", "it", "it's",
    "know", "let", "like", "me", "my", "of", "on", "or", "our", "please", "so", "some", "tell",
    "than", "that", "the", "their", "them", "then", "there", "there's", "these", "they", "this",
    "to", "us", "was", "we", "were", "what", "what's", "when", "where", "which", "who", "why",
    "will", "with", "would", "you", "your",
];

/// Lowercased alphanumeric tokens (apostrophes and hyphens kept) longer than
/// one character.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() || ch == '\'' || ch == '-' {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            if current.len() > 1 {
                tokens.push(std::mem::take(&mut current));
            }
            current.clear();
        }
    }
    if current.len() > 1 {
        tokens.push(current);
    }
    tokens
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Distinct tokens of `text` with stopwords removed, in first-seen order.
pub fn content_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stopword(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
