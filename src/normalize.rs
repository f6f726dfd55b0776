//! Deterministic, digit-preserving normalization of one clinical note line.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::{
    schema::{NormalizedText, Pair, PairSep},
    text_util::{CharOffsets, is_hebrew, is_latin},
};

static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]+)\s*([/\\-])\s*([0-9]+)").expect("static pattern")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("static pattern"));

static DATE_RES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"[0-9]{1,2}[/.-][0-9]{1,2}[/.-][0-9]{2,4}"),
        Regex::new(r"[0-9]{2,4}[/.-][0-9]{1,2}[/.-][0-9]{1,2}"),
    ]
    .map(|re| re.expect("static pattern"))
});

static TIME_RES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"[0-9]{1,2}:[0-9]{2}(?::[0-9]{2})?"),
        Regex::new(r"[0-9]{1,2}[:.][0-9]{2}\s*(?:AM|PM|am|pm)"),
    ]
    .map(|re| re.expect("static pattern"))
});

/// Script-boundary spacing rules, applied in order. Each rule that changes
/// the text leaves its tag in `notes`.
static SPACING_RULES: LazyLock<[(Regex, &'static str); 4]> =
    LazyLock::new(|| {
        [
            (r"([\x{0590}-\x{05FF}])([0-9])", "inserted_space_hebrew_digit"),
            (r"([0-9])([\x{0590}-\x{05FF}])", "inserted_space_digit_hebrew"),
            (r"([a-zA-Z])([0-9])", "inserted_space_english_digit"),
            (r"([0-9])([a-zA-Z])", "inserted_space_digit_english"),
        ]
        .map(|(pattern, tag)| {
            (Regex::new(pattern).expect("static pattern"), tag)
        })
    });

/// Known unit spellings and their canonical form. Longer spellings come
/// first so that whole-word matching never sees a shorter prefix.
const UNIT_SPELLINGS: &[(&str, &str)] = &[
    ("מילימטר", "mm"),
    ("millimeters", "mm"),
    ("millimeter", "mm"),
    ("מ\"מ", "mm"),
    ("מ\u{05F4}מ", "mm"),
    ("ממ", "mm"),
    ("מעלות", "°"),
];

const CANONICAL_UNITS: &[&str] = &["mm", "cm", "°"];

/// A pair as first detected, before spacing edits moved it.
struct DetectedPair {
    a: String,
    b: String,
    sep: PairSep,
    text: String,
}

/// Normalize one raw line.
///
/// The result's `normalized_text` always carries the same multiset of
/// digits as `raw_text`; only whitespace and unit spellings change.
///
/// ```
/// use dentlink::normalize::normalize;
///
/// let n = normalize("מולטיוניט שתל14 18/0");
/// assert_eq!(n.normalized_text, "מולטיוניט שתל 14 18/0");
/// assert_eq!(n.numbers, ["14", "18", "0"]);
/// assert_eq!(n.pairs.len(), 1);
/// ```
pub fn normalize(raw_text: &str) -> NormalizedText {
    if raw_text.is_empty() {
        return NormalizedText::default();
    }

    let mut text: String = raw_text.nfc().collect();
    let detected = detect_pairs(&text);

    let mut notes = Vec::new();
    for (re, tag) in SPACING_RULES.iter() {
        let spaced = re.replace_all(&text, "$1 $2");
        if spaced != text {
            text = spaced.into_owned();
            notes.push((*tag).to_string());
        }
    }

    let text = normalize_units(text);
    let units_found = find_units(&text);
    let pairs = relocate_pairs(&text, detected, &mut notes);

    let numbers = NUMBER_RE
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect();
    let dates = longest_matches(&text, DATE_RES.iter());
    let times = longest_matches(&text, TIME_RES.iter());

    let normalized_text = text.trim_end().to_string();

    NormalizedText {
        raw_text: raw_text.to_string(),
        normalized_text,
        numbers,
        pairs,
        units_found,
        dates,
        times,
        notes,
    }
}

fn detect_pairs(text: &str) -> Vec<DetectedPair> {
    PAIR_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let sep = caps[2].chars().next().and_then(PairSep::from_char)?;
            Some(DetectedPair {
                a: caps[1].to_string(),
                b: caps[3].to_string(),
                sep,
                text: caps[0].to_string(),
            })
        })
        .collect()
}

/// Find each detected pair again in the spaced text, scanning forward so
/// that repeated pairs map to successive occurrences.
fn relocate_pairs(
    text: &str,
    detected: Vec<DetectedPair>,
    notes: &mut Vec<String>,
) -> Vec<Pair> {
    let offsets = CharOffsets::new(text);
    let mut cursor = 0;
    let mut pairs = Vec::with_capacity(detected.len());

    for pair in detected {
        let pattern = format!(
            r"{}\s*{}\s*{}",
            regex::escape(&pair.a),
            regex::escape(&pair.sep.as_char().to_string()),
            regex::escape(&pair.b),
        );
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };

        match find_digit_bounded(&re, text, cursor) {
            Some((start, end)) => {
                cursor = end;
                pairs.push(Pair {
                    text: text[start..end].to_string(),
                    a: pair.a,
                    b: pair.b,
                    sep: pair.sep,
                    span: (offsets.to_char(start), offsets.to_char(end)),
                });
            }
            None => {
                tracing::debug!(pair = %pair.text, "dropping unrelocatable pair");
                notes.push(format!("dropped_pair:{}", pair.text));
            }
        }
    }

    pairs
}

/// First match at or after `from` that is not glued to further digits on
/// either side.
fn find_digit_bounded(
    re: &Regex,
    text: &str,
    mut from: usize,
) -> Option<(usize, usize)> {
    while from <= text.len() {
        let m = re.find_at(text, from)?;
        let before_ok = !text[..m.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit());
        let after_ok = !text[m.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
        if before_ok && after_ok {
            return Some((m.start(), m.end()));
        }
        // Matches start with an ASCII digit, so +1 stays on a boundary.
        from = m.start() + 1;
    }
    None
}

fn is_letter(c: char) -> bool {
    is_hebrew(c) || is_latin(c)
}

/// Byte offsets of `word` in `text` where it is not glued to letters.
fn whole_word_positions(text: &str, word: &str) -> Vec<usize> {
    text.match_indices(word)
        .filter(|(start, _)| {
            let before = text[..*start].chars().next_back();
            let after = text[start + word.len()..].chars().next();
            !before.is_some_and(is_letter) && !after.is_some_and(is_letter)
        })
        .map(|(start, _)| start)
        .collect()
}

fn normalize_units(mut text: String) -> String {
    for (spelling, canonical) in UNIT_SPELLINGS {
        let positions = whole_word_positions(&text, spelling);
        if positions.is_empty() {
            continue;
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for start in positions {
            out.push_str(&text[last..start]);
            out.push_str(canonical);
            last = start + spelling.len();
        }
        out.push_str(&text[last..]);
        text = out;
    }
    text
}

/// Canonical units present in `text`, each once, by first appearance.
fn find_units(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, &str)> = CANONICAL_UNITS
        .iter()
        .filter_map(|unit| {
            whole_word_positions(text, unit)
                .first()
                .map(|&pos| (pos, *unit))
        })
        .collect();
    found.sort_unstable();
    found.into_iter().map(|(_, unit)| unit.to_string()).collect()
}

/// Matches of several patterns with overlaps resolved in favor of the
/// longest, returned in text order.
fn longest_matches<'a>(
    text: &str,
    patterns: impl Iterator<Item = &'a Regex>,
) -> Vec<String> {
    let mut matches: Vec<(usize, usize)> = patterns
        .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.end())))
        .collect();
    matches.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));

    let mut kept: Vec<(usize, usize)> = Vec::new();
    for (start, end) in matches {
        if kept.iter().all(|&(s, e)| end <= s || start >= e) {
            kept.push((start, end));
        }
    }
    kept.sort_unstable();
    kept.into_iter()
        .map(|(start, end)| text[start..end].to_string())
        .collect()
}
