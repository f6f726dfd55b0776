//! Safety gate for spacing edits proposed by the refine collaborator.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    schema::{NormalizedText, Token, TokenKind, TokenOperation, ToothGroup},
    text_util::{char_len, sorted_digits},
};

/// One group of `tooth_groups.json`. Fields other than the FDI codes are
/// descriptive and ignored here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToothGroupDef {
    #[serde(rename = "FDI", default)]
    pub fdi: Vec<String>,
}

pub type ToothGroupTable = BTreeMap<String, ToothGroupDef>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SafetyValidator {
    known_fdi: Option<HashSet<String>>,
}

impl SafetyValidator {
    /// A validator without a tooth-group table skips the FDI check.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tooth_groups(table: &ToothGroupTable) -> Self {
        if table.is_empty() {
            return Self::default();
        }
        let known_fdi = table
            .values()
            .flat_map(|group| group.fdi.iter().cloned())
            .collect();
        Self {
            known_fdi: Some(known_fdi),
        }
    }

    /// Check proposed operations against the pre-edit tokens.
    ///
    /// Every check runs, so one report may carry several errors.
    pub fn validate(
        &self,
        ops: &[TokenOperation],
        tooth_groups: &[ToothGroup],
        normalized: &NormalizedText,
        tokens: &[Token],
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let max_idx = tokens.len() as i64 - 1;
        let kind_at = |idx: i64| -> Option<TokenKind> {
            usize::try_from(idx)
                .ok()
                .and_then(|i| tokens.get(i))
                .map(|t| t.kind)
        };

        let mut delta: i64 = 0;
        for op in ops {
            match op {
                TokenOperation::InsertSpace { after_token_idx } => {
                    delta += 1;
                    let idx = *after_token_idx;
                    if idx < 0 || idx > max_idx {
                        errors.push(format!(
                            "after_token_idx {idx} out of range [0, {max_idx}]"
                        ));
                    } else if kind_at(idx) == Some(TokenKind::Pair) {
                        errors.push(format!(
                            "Cannot insert space after pair token at index {idx}"
                        ));
                    }
                }
                TokenOperation::MergeTokens { range: (start, end) } => {
                    delta -= 1;
                    let (start, end) = (*start, *end);
                    if start < 0 || end > max_idx {
                        errors.push(format!(
                            "merge range [{start}, {end}] out of bounds [0, {max_idx}]"
                        ));
                    } else if start > end {
                        errors.push(format!(
                            "Invalid merge range [{start}, {end}]"
                        ));
                    }
                    for idx in start.max(0)..=end.min(max_idx) {
                        match kind_at(idx) {
                            Some(TokenKind::Number) => errors.push(format!(
                                "Operation would modify number token at index {idx}"
                            )),
                            Some(TokenKind::Pair) => errors.push(format!(
                                "Cannot merge pair token at index {idx}"
                            )),
                            _ => {}
                        }
                    }
                }
                TokenOperation::Malformed { reason, .. } => {
                    errors.push(reason.clone());
                }
            }
        }

        if char_len(&normalized.normalized_text) as i64 + delta <= 0 {
            errors.push("operations would empty text".to_string());
        }

        if let Some(known) = &self.known_fdi {
            for group in tooth_groups {
                for code in &group.fdi {
                    if !known.contains(code) {
                        errors.push(format!(
                            "Invalid FDI number '{code}' not in tooth groups dictionary"
                        ));
                    }
                }
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Warnings for an applied edit: every extracted number and pair must
/// still occur in the new text and the digit multiset must be unchanged.
pub fn post_operation_warnings(
    normalized: &NormalizedText,
    new_text: &str,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for number in &normalized.numbers {
        if !new_text.contains(number.as_str()) {
            warnings.push(format!("missing_number:{number}"));
        }
    }
    for pair in &normalized.pairs {
        if !new_text.contains(pair.text.as_str()) {
            warnings.push(format!("missing_pair:{}", pair.text));
        }
    }
    if sorted_digits(&normalized.normalized_text) != sorted_digits(new_text) {
        warnings.push("digit_mismatch".to_string());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{normalize::normalize, tokenize::tokenize};

    fn line(raw: &str) -> (NormalizedText, Vec<Token>) {
        let n = normalize(raw);
        let tokens = tokenize(&n);
        (n, tokens)
    }

    #[test]
    fn merge_over_number_names_its_index() {
        let (n, tokens) = line("שתל 14 מולטי");
        assert_eq!(tokens[1].kind, TokenKind::Number);

        let report = SafetyValidator::new().validate(
            &[TokenOperation::MergeTokens { range: (0, 2) }],
            &[],
            &n,
            &tokens,
        );

        assert!(!report.valid);
        assert_eq!(
            report.errors,
            ["Operation would modify number token at index 1"]
        );
    }

    #[test]
    fn insert_after_pair_rejected() {
        let (n, tokens) = line("שתל 18/0");
        let report = SafetyValidator::new().validate(
            &[TokenOperation::InsertSpace { after_token_idx: 1 }],
            &[],
            &n,
            &tokens,
        );
        assert_eq!(
            report.errors,
            ["Cannot insert space after pair token at index 1"]
        );
    }

    #[test]
    fn all_checks_run_without_short_circuit() {
        let (n, tokens) = line("שתל 18/0 abut ment");
        let ops: Vec<TokenOperation> = serde_json::from_str(
            r#"[
                {"op": "insert_space", "after_token_idx": 9},
                {"op": "merge_tokens", "range": [3, 2]},
                {"op": "merge_tokens", "range": [1, 2]},
                {"op": "rewrite"}
            ]"#,
        )
        .unwrap();

        let report =
            SafetyValidator::new().validate(&ops, &[], &n, &tokens);

        assert_eq!(
            report.errors,
            [
                "after_token_idx 9 out of range [0, 3]",
                "Invalid merge range [3, 2]",
                "Cannot merge pair token at index 1",
                "Unknown operation type: rewrite",
            ]
        );
    }

    #[test]
    fn valid_spacing_edits_pass() {
        let (n, tokens) = line("abut ment שתל");
        let report = SafetyValidator::new().validate(
            &[
                TokenOperation::MergeTokens { range: (0, 1) },
                TokenOperation::InsertSpace { after_token_idx: 2 },
            ],
            &[],
            &n,
            &tokens,
        );
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn merges_cannot_empty_text() {
        let n = NormalizedText::bare("");
        let report = SafetyValidator::new().validate(
            &[TokenOperation::MergeTokens { range: (0, 0) }],
            &[],
            &n,
            &[],
        );
        assert!(report.errors.contains(&"operations would empty text".into()));
    }

    #[test]
    fn fdi_codes_checked_only_with_table() {
        let (n, tokens) = line("גשר קדמי");
        let claimed = [ToothGroup {
            label_he: "קדמיות עליונות".into(),
            label_en: "upper anteriors".into(),
            fdi: vec!["11".into(), "19".into()],
        }];

        let report = SafetyValidator::new().validate(&[], &claimed, &n, &tokens);
        assert!(report.valid);

        let table: ToothGroupTable = serde_json::from_str(
            r#"{"upper_anterior": {"FDI": ["11", "12", "13", "21", "22", "23"]}}"#,
        )
        .unwrap();
        let report = SafetyValidator::with_tooth_groups(&table)
            .validate(&[], &claimed, &n, &tokens);
        assert_eq!(
            report.errors,
            ["Invalid FDI number '19' not in tooth groups dictionary"]
        );
    }

    #[test]
    fn post_operation_warnings_flag_lost_numbers() {
        let n = normalize("שתל 14 18/0");
        assert!(post_operation_warnings(&n, "שתל 14 18/0").is_empty());

        let warnings = post_operation_warnings(&n, "שתל 1 4 18/0");
        assert_eq!(warnings, ["missing_number:14"]);

        let warnings = post_operation_warnings(&n, "שתל 14 18/");
        assert!(warnings.contains(&"missing_pair:18/0".to_string()));
        assert!(warnings.contains(&"digit_mismatch".to_string()));
    }
}
