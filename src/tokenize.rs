//! Single-pass tokenizer over normalized text.

use std::collections::BTreeMap;

use crate::{
    schema::{NormalizedText, Pair, Script, Token, TokenKind},
    text_util::{is_hebrew, is_latin},
};

/// Unit literals recognized by the scan. Letter units are emitted as units
/// only when they form a whole Latin word.
const LETTER_UNITS: &[&str] = &["mm", "cm"];
const SYMBOL_UNITS: &[char] = &['°', '%'];

const PUNCT: &[char] = &[
    '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '\u{05F4}',
    '"', '\'', '`', '-', '/', '\\', '+', '=', '*',
];

/// Split normalized text into typed tokens.
///
/// Pair spans recorded by the normalizer are emitted as single `pair`
/// tokens and never subdivided. Any character no rule accepts becomes a
/// one-character `word` token with `mixed` script.
///
/// ```
/// use dentlink::{normalize::normalize, tokenize::tokenize};
/// use dentlink::schema::TokenKind;
///
/// let tokens = tokenize(&normalize("18/0"));
/// assert_eq!(tokens.len(), 1);
/// assert_eq!(tokens[0].kind, TokenKind::Pair);
/// ```
pub fn tokenize(n: &NormalizedText) -> Vec<Token> {
    let chars: Vec<char> = n.normalized_text.chars().collect();
    let pairs = pair_starts(&chars, &n.pairs);

    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        if let Some(pair) = pairs.get(&pos) {
            tokens.push(Token {
                idx: tokens.len(),
                text: pair.text.clone(),
                kind: TokenKind::Pair,
                span: pair.span,
                script: Some(Script::Digit),
                meta: Some(pair.meta()),
            });
            pos = pair.span.1;
            continue;
        }

        if chars[pos].is_whitespace() {
            pos += 1;
            continue;
        }

        let next_pair = pairs
            .range(pos..)
            .next()
            .map_or(chars.len(), |(&start, _)| start);
        let (end, kind, script) = scan(&chars, pos, next_pair);

        tokens.push(Token {
            idx: tokens.len(),
            text: chars[pos..end].iter().collect(),
            kind,
            span: (pos, end),
            script,
            meta: None,
        });
        pos = end;
    }

    tokens
}

/// Pairs keyed by start offset, keeping only spans that still delimit
/// their text and do not overlap an earlier pair.
fn pair_starts<'a>(
    chars: &[char],
    pairs: &'a [Pair],
) -> BTreeMap<usize, &'a Pair> {
    let mut starts = BTreeMap::new();
    let mut last_end = 0;
    for pair in pairs {
        let (start, end) = pair.span;
        if start < last_end || start >= end || end > chars.len() {
            continue;
        }
        let text: String = chars[start..end].iter().collect();
        if text == pair.text {
            starts.insert(start, pair);
            last_end = end;
        }
    }
    starts
}

/// Match one token starting at `pos`. Numbers stop before `limit`, the
/// start of the next pair.
fn scan(
    chars: &[char],
    pos: usize,
    limit: usize,
) -> (usize, TokenKind, Option<Script>) {
    if let Some(end) = hyphenated_run(chars, pos, is_hebrew, &['-', '־']) {
        return (end, TokenKind::Word, Some(Script::He));
    }

    if let Some(end) = hyphenated_run(chars, pos, is_latin, &['-']) {
        let word: String = chars[pos..end].iter().collect();
        if LETTER_UNITS.contains(&word.as_str()) {
            return (end, TokenKind::Unit, None);
        }
        return (end, TokenKind::Word, Some(Script::En));
    }

    if let Some(end) = number(chars, pos, limit) {
        return (end, TokenKind::Number, Some(Script::Digit));
    }

    let c = chars[pos];
    if SYMBOL_UNITS.contains(&c) {
        return (pos + 1, TokenKind::Unit, None);
    }
    if PUNCT.contains(&c) {
        return (pos + 1, TokenKind::Punct, None);
    }

    (pos + 1, TokenKind::Word, Some(Script::Mixed))
}

/// A run of letters accepted by `is_letter`, optionally joined to further
/// runs by one of `joiners`.
fn hyphenated_run(
    chars: &[char],
    pos: usize,
    is_letter: fn(char) -> bool,
    joiners: &[char],
) -> Option<usize> {
    let run_end = |from: usize| {
        let mut end = from;
        while end < chars.len() && is_letter(chars[end]) {
            end += 1;
        }
        end
    };

    let mut end = run_end(pos);
    if end == pos {
        return None;
    }
    while end + 1 < chars.len()
        && joiners.contains(&chars[end])
        && is_letter(chars[end + 1])
    {
        end = run_end(end + 1);
    }
    Some(end)
}

/// `\d+(\.\d+)?`, never reaching `limit`.
fn number(chars: &[char], pos: usize, limit: usize) -> Option<usize> {
    let digits_end = |from: usize| {
        let mut end = from;
        while end < limit && chars[end].is_ascii_digit() {
            end += 1;
        }
        end
    };

    let end = digits_end(pos);
    if end == pos {
        return None;
    }
    if end + 1 < limit && chars[end] == '.' && chars[end + 1].is_ascii_digit()
    {
        return Some(digits_end(end + 1));
    }
    Some(end)
}
