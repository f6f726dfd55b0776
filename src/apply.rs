//! Applies validated spacing edits to normalized text.

use crate::{
    schema::{NormalizedText, Token, TokenOperation},
    tokenize::tokenize,
};

/// Apply validated spacing edits and re-tokenize the result from scratch.
///
/// Merges run first and only ever delete a non-empty, all-whitespace gap
/// between adjacent tokens. Inserts then add one space after the named
/// token unless whitespace or the end of text already follows it.
/// Operations whose indices do not fit `tokens` are skipped.
pub fn apply(
    text: &str,
    tokens: &[Token],
    ops: &[TokenOperation],
) -> (String, Vec<Token>) {
    let mut chars: Vec<char> = text.chars().collect();
    let mut spans: Vec<(usize, usize)> = tokens.iter().map(|t| t.span).collect();
    let count = spans.len();
    let index = |idx: i64| usize::try_from(idx).ok().filter(|&i| i < count);

    for op in ops {
        let TokenOperation::MergeTokens { range: (start, end) } = op else {
            continue;
        };
        let (Some(start), Some(end)) = (index(*start), index(*end)) else {
            continue;
        };
        for left in start..end {
            let gap = spans[left].1..spans[left + 1].0;
            if gap.is_empty()
                || gap.end > chars.len()
                || !chars[gap.clone()].iter().all(|c| c.is_whitespace())
            {
                continue;
            }
            let removed = gap.len();
            chars.drain(gap);
            for span in &mut spans[left + 1..] {
                span.0 -= removed;
                span.1 -= removed;
            }
        }
    }

    for op in ops {
        let TokenOperation::InsertSpace { after_token_idx } = op else {
            continue;
        };
        let Some(after) = index(*after_token_idx) else {
            continue;
        };
        let at = spans[after].1;
        if chars.get(at).is_none_or(|c| c.is_whitespace()) {
            continue;
        }
        chars.insert(at, ' ');
        for span in &mut spans[after + 1..] {
            span.0 += 1;
            span.1 += 1;
        }
    }

    let new_text: String = chars.into_iter().collect();
    let new_tokens = tokenize(&NormalizedText::bare(&new_text));
    (new_text, new_tokens)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{normalize::normalize, text_util::sorted_digits};

    fn tokens_of(text: &str) -> Vec<Token> {
        tokenize(&normalize(text))
    }

    #[test]
    fn merge_removes_whitespace_gap() {
        let text = "abut  ment שתל";
        let tokens = tokens_of(text);
        let (new_text, new_tokens) = apply(
            text,
            &tokens,
            &[TokenOperation::MergeTokens { range: (0, 1) }],
        );

        assert_eq!(new_text, "abutment שתל");
        assert_eq!(new_tokens[0].text, "abutment");
        assert_eq!(new_tokens[1].span, (9, 12));
    }

    #[test]
    fn merge_keeps_non_whitespace_gap() {
        let text = "abut,ment";
        let tokens = tokens_of(text);
        let (new_text, _) = apply(
            text,
            &tokens,
            &[TokenOperation::MergeTokens { range: (0, 2) }],
        );
        assert_eq!(new_text, "abut,ment");
    }

    #[test]
    fn insert_adds_single_space_once() {
        let text = "implant,abutment";
        let tokens = tokens_of(text);
        let ops = [
            TokenOperation::InsertSpace { after_token_idx: 1 },
            TokenOperation::InsertSpace { after_token_idx: 1 },
        ];
        let (new_text, new_tokens) = apply(text, &tokens, &ops);
        assert_eq!(new_text, "implant, abutment");
        assert_eq!(new_tokens.len(), 3);
    }

    #[test]
    fn merges_run_before_inserts() {
        let text = "a b c";
        let tokens = tokens_of(text);
        let ops = [
            TokenOperation::InsertSpace { after_token_idx: 2 },
            TokenOperation::MergeTokens { range: (0, 1) },
        ];
        let (new_text, _) = apply(text, &tokens, &ops);
        assert_eq!(new_text, "ab c");
    }

    #[test]
    fn out_of_range_ops_are_skipped() {
        let text = "שתל 14";
        let tokens = tokens_of(text);
        let ops = [
            TokenOperation::InsertSpace { after_token_idx: 7 },
            TokenOperation::MergeTokens { range: (-1, 1) },
        ];
        let (new_text, _) = apply(text, &tokens, &ops);
        assert_eq!(new_text, text);
    }

    proptest! {
        #[test]
        fn spacing_edits_preserve_digits(
            raw in "[א-ת a-z0-9/]{1,30}",
            inserts in proptest::collection::vec(0i64..12, 0..4),
            merges in proptest::collection::vec((0i64..12, 0i64..12), 0..3),
        ) {
            let n = normalize(&raw);
            let tokens = tokenize(&n);
            let ops: Vec<TokenOperation> = inserts
                .into_iter()
                .map(|after_token_idx| TokenOperation::InsertSpace { after_token_idx })
                .chain(merges.into_iter().map(|range| TokenOperation::MergeTokens { range }))
                .collect();

            let (new_text, _) = apply(&n.normalized_text, &tokens, &ops);
            prop_assert_eq!(sorted_digits(&new_text), sorted_digits(&n.normalized_text));
        }
    }
}
