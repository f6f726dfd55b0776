//! Optional post-processing of ranked mentions.

use crate::schema::MentionCandidate;

/// Vector-only mentions scoring below this are dropped.
pub const VECTOR_ONLY_MIN_SCORE: f64 = 0.15;

/// Merge neighboring mentions that share a top IRI, then drop weak
/// vector-only mentions.
///
/// Two mentions merge when the text between them is whitespace only. The
/// merged mention keeps the first mention's id and the candidate list of
/// whichever half ranked higher.
pub fn bundle(text: &str, mentions: Vec<MentionCandidate>) -> Vec<MentionCandidate> {
    let chars: Vec<char> = text.chars().collect();
    let mut sorted = mentions;
    sorted.sort_by_key(|m| m.span.0);

    let mut merged: Vec<MentionCandidate> = Vec::with_capacity(sorted.len());
    for mention in sorted {
        if let Some(last) = merged.last_mut()
            && same_top_iri(last, &mention)
            && whitespace_between(&chars, last.span.1, mention.span.0)
        {
            absorb(last, mention, &chars);
            continue;
        }
        merged.push(mention);
    }

    merged.retain(|m| !is_weak_vector_only(m));
    merged
}

fn same_top_iri(a: &MentionCandidate, b: &MentionCandidate) -> bool {
    match (a.candidates.first(), b.candidates.first()) {
        (Some(x), Some(y)) => x.iri == y.iri,
        _ => false,
    }
}

fn whitespace_between(chars: &[char], end: usize, start: usize) -> bool {
    end <= start
        && chars
            .get(end..start)
            .is_some_and(|gap| gap.iter().all(|c| c.is_whitespace()))
}

fn absorb(into: &mut MentionCandidate, next: MentionCandidate, chars: &[char]) {
    let span = (into.span.0, next.span.1);
    into.surface = chars
        .get(span.0..span.1)
        .map(|s| s.iter().collect())
        .unwrap_or_else(|| format!("{} {}", into.surface, next.surface));
    into.span = span;

    let top = |m: &MentionCandidate| m.candidates.first().map_or(0.0, |c| c.score_final);
    let next_ranks_higher = top(&next) > top(&*into);

    for hint in next.hints {
        if !into.hints.contains(&hint) {
            into.hints.push(hint);
        }
    }

    if next_ranks_higher {
        into.candidates = next.candidates;
    }
    into.confident_singleton = into.confident_singleton && next.confident_singleton;
}

fn is_weak_vector_only(mention: &MentionCandidate) -> bool {
    match mention.candidates.first() {
        None => true,
        Some(top) => top.score_lex.is_none() && top.score_final < VECTOR_ONLY_MIN_SCORE,
    }
}
