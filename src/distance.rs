//! String distance strategies and the phonetic code used by the gazetteer.

use std::sync::Arc;

use crate::config::EditDistanceKind;

/// Character-level edit distance, chosen once at startup.
pub trait EditDistance: Send + Sync {
    fn distance(&self, a: &str, b: &str) -> usize;

    /// `1 - distance / longer_length`, in `[0, 1]`.
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let longest = a.chars().count().max(b.chars().count());
        if longest == 0 {
            return 1.0;
        }
        let distance = self.distance(a, b).min(longest);
        1.0 - distance as f64 / longest as f64
    }
}

/// Damerau-Levenshtein distance (transpositions count as one edit).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactDistance;

impl EditDistance for ExactDistance {
    fn distance(&self, a: &str, b: &str) -> usize {
        strsim::damerau_levenshtein(a, b)
    }
}

/// Positional mismatches plus length difference. Never smaller than the
/// exact distance, so it only ever misses matches, never invents them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheapDistance;

impl EditDistance for CheapDistance {
    fn distance(&self, a: &str, b: &str) -> usize {
        let (len_a, len_b) = (a.chars().count(), b.chars().count());
        let mismatches =
            a.chars().zip(b.chars()).filter(|(x, y)| x != y).count();
        mismatches + len_a.abs_diff(len_b)
    }
}

pub fn strategy(kind: EditDistanceKind) -> Arc<dyn EditDistance> {
    match kind {
        EditDistanceKind::Exact => Arc::new(ExactDistance),
        EditDistanceKind::Cheap => Arc::new(CheapDistance),
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Consonant skeleton of ASCII text: the first letter, then the remaining
/// letters without vowels and with repeated letters collapsed.
///
/// Returns `None` when `text` has no ASCII letters.
///
/// ```
/// use dentlink::distance::phonetic_code;
///
/// assert_eq!(phonetic_code("abutment").as_deref(), Some("abtmnt"));
/// assert_eq!(phonetic_code("Abuttment").as_deref(), Some("abtmnt"));
/// ```
pub fn phonetic_code(text: &str) -> Option<String> {
    let mut letters = text
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase());
    let first = letters.next()?;

    let mut code = String::from(first);
    let mut last = None;
    for c in letters.filter(|c| !is_vowel(*c)) {
        if last != Some(c) {
            code.push(c);
        }
        last = Some(c);
    }
    Some(code)
}
