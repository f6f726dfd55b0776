//! Per-line gazetteer matching over a token stream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    gazetteer::{
        FUZZY_BAND, Gazetteer, PHONETIC_SCORE, SHORT_FUZZY_BAND,
        SHORT_SURFACE_LEN, band_score,
    },
    schema::{LexCandidate, MatchType, Span, Token, TokenKind},
    text_util::{char_len, is_all_digits, surface_key},
};

/// Keyword membership tests for mention hints, in output order.
const HINT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "device_hint",
        &["abutment", "multi-unit", "multiunit", "מולטי", "יוניט", "אבטמנט"],
    ),
    ("implant_hint", &["implant", "fixture", "שתל"]),
    ("material_hint", &["zirconia", "titanium", "זירקוניה", "טיטניום"]),
    ("finding_hint", &["caries", "עששת"]),
];

/// One lexical match inside a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazetteerHit {
    pub mention_id: String,
    pub surface: String,
    pub span: Span,
    /// Number of word tokens the match covers.
    pub ngram: usize,
    pub candidate: LexCandidate,
    pub hints: Vec<String>,
    pub score_prior: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_surface: Option<String>,
}

/// Word frequencies across the batch of lines being linked.
#[derive(Debug, Clone, Default)]
pub struct TokenFrequencies {
    counts: HashMap<String, usize>,
    max: usize,
}

impl TokenFrequencies {
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a [Token]>) -> Self {
        let mut freqs = Self::default();
        for tokens in lines {
            freqs.add(tokens);
        }
        freqs
    }

    pub fn add(&mut self, tokens: &[Token]) {
        for token in tokens.iter().filter(|t| t.kind == TokenKind::Word) {
            let count = self.counts.entry(surface_key(&token.text)).or_default();
            *count += 1;
            self.max = self.max.max(*count);
        }
    }

    /// Occurrence count of `key` divided by the largest count, 0 if unseen.
    pub fn normalized(&self, key: &str) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        self.counts.get(key).map_or(0.0, |&c| c as f64 / self.max as f64)
    }
}

/// A match before overlap resolution: token positions `first..=last`.
struct RawMatch {
    first: usize,
    last: usize,
    candidate: LexCandidate,
    matched_key: String,
    normalized_surface: Option<String>,
}

impl Gazetteer {
    /// Entity mentions of one line, ordered by span start.
    pub fn match_tokens(
        &self,
        line: usize,
        tokens: &[Token],
        freqs: Option<&TokenFrequencies>,
    ) -> Vec<GazetteerHit> {
        let mut covered = vec![false; tokens.len()];
        let mut raw = self.match_single_tokens(tokens, &mut covered);
        for (start, end) in word_segments(tokens) {
            if covered[start..end].iter().all(|&c| c) {
                continue;
            }
            self.match_windows(tokens, start, end, &mut covered, &mut raw);
        }

        let kept = longest_non_overlapping(tokens, raw);
        let measurements: Vec<Span> = tokens
            .iter()
            .filter(|t| t.is_measurement())
            .map(|t| t.span)
            .collect();

        let mut hits: Vec<GazetteerHit> = kept
            .into_iter()
            .filter_map(|m| {
                let window = &tokens[m.first..=m.last];
                let span = (window[0].span.0, window[window.len() - 1].span.1);
                let surface = window
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                if is_all_digits(&surface.replace(' ', ""))
                    || measurements.iter().any(|&s| overlaps(s, span))
                {
                    return None;
                }

                let hints = self.hints_for_match(&surface, &m);
                Some(GazetteerHit {
                    mention_id: format!("m{line}_{}_{}", span.0, span.1),
                    ngram: window.len(),
                    score_prior: prior(window, freqs),
                    surface,
                    span,
                    candidate: m.candidate,
                    hints,
                    normalized_surface: m.normalized_surface,
                })
            })
            .collect();
        hits.sort_by_key(|h| h.span.0);
        hits
    }

    fn match_single_tokens(
        &self,
        tokens: &[Token],
        covered: &mut [bool],
    ) -> Vec<RawMatch> {
        let mut raw = Vec::new();
        for (pos, token) in tokens.iter().enumerate() {
            if token.kind != TokenKind::Word || covered[pos] {
                continue;
            }
            let key = surface_key(&token.text);
            if key.is_empty() || is_all_digits(&key) {
                continue;
            }

            let found = self
                .exact(&key)
                .or_else(|| self.fuzzy_match(&key, true, FUZZY_BAND))
                .or_else(|| self.phonetic_match(&token.text, &key));
            if let Some((candidate, matched_key, normalized_surface)) = found {
                covered[pos] = true;
                raw.push(RawMatch {
                    first: pos,
                    last: pos,
                    candidate,
                    matched_key,
                    normalized_surface,
                });
            }
        }
        raw
    }

    fn match_windows(
        &self,
        tokens: &[Token],
        start: usize,
        end: usize,
        covered: &mut [bool],
        raw: &mut Vec<RawMatch>,
    ) {
        let longest = self.ngram_max.min(end - start);
        for n in (1..=longest).rev() {
            for first in start..=end - n {
                let window = first..first + n;
                if covered[window.clone()].iter().any(|&c| c) {
                    continue;
                }
                let joined = tokens[window.clone()]
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let key = surface_key(&joined);
                if key.is_empty() || is_all_digits(&key.replace(' ', "")) {
                    continue;
                }

                let band = if char_len(&key) <= SHORT_SURFACE_LEN {
                    SHORT_FUZZY_BAND
                } else {
                    FUZZY_BAND
                };
                let found = self
                    .exact(&key)
                    .or_else(|| self.fuzzy_match(&key, false, band));
                if let Some((candidate, matched_key, normalized_surface)) = found {
                    covered[window].iter_mut().for_each(|c| *c = true);
                    raw.push(RawMatch {
                        first,
                        last: first + n - 1,
                        candidate,
                        matched_key,
                        normalized_surface,
                    });
                }
            }
        }
    }

    fn exact(&self, key: &str) -> Option<(LexCandidate, String, Option<String>)> {
        let entry = self.lookup(key)?;
        Some((
            entry.candidate.clone(),
            key.to_string(),
            entry.normalized_surface.clone(),
        ))
    }

    fn fuzzy_match(
        &self,
        key: &str,
        hebrew_only: bool,
        band: (f64, f64),
    ) -> Option<(LexCandidate, String, Option<String>)> {
        let (matched, similarity) = self.fuzzy(key, hebrew_only)?;
        let entry = self.lookup(matched)?;
        let candidate = LexCandidate {
            match_type: MatchType::Fuzzy,
            score_lex: band_score(band, similarity),
            ..entry.candidate.clone()
        };
        tracing::trace!(key, matched, similarity, "fuzzy gazetteer match");
        Some((candidate, matched.to_string(), Some(matched.to_string())))
    }

    fn phonetic_match(
        &self,
        text: &str,
        key: &str,
    ) -> Option<(LexCandidate, String, Option<String>)> {
        if !text.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let matched = self.phonetic(key)?;
        let entry = self.lookup(matched)?;
        let candidate = LexCandidate {
            match_type: MatchType::Phonetic,
            score_lex: PHONETIC_SCORE,
            ..entry.candidate.clone()
        };
        Some((candidate, matched.to_string(), Some(matched.to_string())))
    }

    fn hints_for_match(&self, surface: &str, m: &RawMatch) -> Vec<String> {
        let mut hints: Vec<String> = Vec::new();
        let mut push = |hint: &str| {
            if !hints.iter().any(|h| h == hint) {
                hints.push(hint.to_string());
            }
        };

        for key in [Some(surface_key(surface)), m.normalized_surface.clone()]
            .into_iter()
            .flatten()
            .chain(std::iter::once(m.matched_key.clone()))
        {
            if let Some(hint) = self.hint_for(&key) {
                push(hint);
            }
        }

        let haystacks = [
            surface.to_lowercase(),
            m.candidate.label.to_lowercase(),
            m.normalized_surface.clone().unwrap_or_default(),
        ];
        for (hint, keywords) in HINT_KEYWORDS {
            let hit = keywords
                .iter()
                .any(|k| haystacks.iter().any(|h| h.contains(k)));
            if hit {
                push(hint);
            }
        }
        hints
    }
}

/// Maximal runs of word tokens as `start..end` position ranges.
fn word_segments(tokens: &[Token]) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut start = None;
    for (pos, token) in tokens.iter().enumerate() {
        match (token.kind == TokenKind::Word, start) {
            (true, None) => start = Some(pos),
            (false, Some(s)) => {
                segments.push((s, pos));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        segments.push((s, tokens.len()));
    }
    segments
}

fn overlaps(a: Span, b: Span) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Greedy longest-first selection; equal lengths keep the earlier start.
fn longest_non_overlapping(tokens: &[Token], mut raw: Vec<RawMatch>) -> Vec<RawMatch> {
    let span_of = |m: &RawMatch| (tokens[m.first].span.0, tokens[m.last].span.1);
    raw.sort_by(|a, b| {
        let (sa, sb) = (span_of(a), span_of(b));
        (sb.1 - sb.0).cmp(&(sa.1 - sa.0)).then(sa.0.cmp(&sb.0))
    });

    let mut kept: Vec<RawMatch> = Vec::with_capacity(raw.len());
    for m in raw {
        let span = span_of(&m);
        if kept.iter().all(|k| !overlaps(span_of(k), span)) {
            kept.push(m);
        }
    }
    kept
}

fn prior(window: &[Token], freqs: Option<&TokenFrequencies>) -> f64 {
    let Some(freqs) = freqs else {
        return 0.0;
    };
    let words: Vec<f64> = window
        .iter()
        .filter(|t| t.kind == TokenKind::Word)
        .map(|t| freqs.normalized(&surface_key(&t.text)))
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    words.iter().sum::<f64>() / words.len() as f64
}
