//! Boundary to the refine collaborator: the marked view it reads, the
//! JSON it answers with, and the checks every answer passes before use.

use std::{
    fmt::Write as _,
    io::BufRead,
    path::Path,
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::{Error, Result},
    schema::{NormalizedText, Script, Token, TokenKind, TokenOperation, ToothGroup},
    text_util::surface_key,
    validate::SafetyValidator,
};

/// Canonical terms usable as vector queries.
static SAFE_QUERY_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z \-]{0,48}$").expect("static pattern")
});

pub const MAX_QUERY_TERMS: usize = 3;

/// Answers a marked view with a JSON object. Failures surface as errors;
/// callers degrade them instead of aborting the line.
pub trait RefineClient: Send + Sync {
    fn refine(&self, line: usize, marked_view: &str) -> Result<Value>;
}

/// Pre-recorded collaborator answers, one JSON object per input line.
///
/// Blank lines stand for "no suggestions"; unparseable lines replay as
/// collaborator errors.
#[derive(Debug, Clone, Default)]
pub struct ReplayRefiner {
    responses: Vec<Value>,
}

impl ReplayRefiner {
    pub fn new(responses: Vec<Value>) -> Self {
        Self { responses }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut responses = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            let response = if trimmed.is_empty() {
                json!({})
            } else {
                serde_json::from_str(trimmed).unwrap_or_else(|e| {
                    tracing::warn!(line = n, error = %e, "unparseable recorded response");
                    json!({ "error": format!("unparseable recorded response: {e}") })
                })
            };
            responses.push(response);
        }
        Ok(Self { responses })
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

impl RefineClient for ReplayRefiner {
    fn refine(&self, line: usize, _marked_view: &str) -> Result<Value> {
        self.responses
            .get(line)
            .cloned()
            .ok_or_else(|| Error::Refine(format!("no recorded response for line {line}")))
    }
}

/// A well-formed collaborator answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefineResponse {
    #[serde(default)]
    pub ops: Vec<TokenOperation>,
    #[serde(default)]
    pub canonical_terms: Vec<String>,
    #[serde(default)]
    pub tooth_groups: Vec<ToothGroup>,
    #[serde(default)]
    pub intent_hints: Vec<String>,
    #[serde(default)]
    pub ambiguous: bool,
}

/// What the pipeline keeps from one refine round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefineOutcome {
    Degraded {
        error: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        validation_errors: Vec<String>,
        ambiguous: bool,
    },
    Accepted(RefineResponse),
}

impl RefineOutcome {
    pub fn degraded(error: impl Into<String>) -> Self {
        Self::Degraded {
            error: error.into(),
            validation_errors: Vec::new(),
            ambiguous: true,
        }
    }

    pub fn accepted(&self) -> Option<&RefineResponse> {
        match self {
            Self::Accepted(response) => Some(response),
            Self::Degraded { .. } => None,
        }
    }
}

/// Parse a raw answer into a typed response with cleaned canonical terms.
pub fn parse_response(raw: Value) -> std::result::Result<RefineResponse, String> {
    let Value::Object(fields) = &raw else {
        return Err("refine response is not a JSON object".to_string());
    };
    if let Some(error) = fields.get("error") {
        return Err(match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }

    let mut response: RefineResponse = serde_json::from_value(raw)
        .map_err(|e| format!("Failed to parse refine response: {e}"))?;
    response.canonical_terms = sanitize_canonical_terms(&response.canonical_terms);
    Ok(response)
}

/// Run one refine round trip and gate the answer through the validator.
///
/// Client errors, malformed answers and rejected operations all degrade
/// to an ambiguous outcome; nothing from a degraded answer is applied.
pub fn review(
    client: &dyn RefineClient,
    line: usize,
    validator: &SafetyValidator,
    normalized: &NormalizedText,
    tokens: &[Token],
) -> RefineOutcome {
    let view = render_marked_view(normalized, tokens);
    let raw = match client.refine(line, &view) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(line, error = %e, "refine call failed");
            return RefineOutcome::degraded(format!("refine call failed: {e}"));
        }
    };
    let response = match parse_response(raw) {
        Ok(response) => response,
        Err(error) => {
            tracing::debug!(line, %error, "refine response rejected");
            return RefineOutcome::degraded(error);
        }
    };

    let report =
        validator.validate(&response.ops, &response.tooth_groups, normalized, tokens);
    if !report.valid {
        tracing::debug!(line, errors = ?report.errors, "refine operations rejected");
        return RefineOutcome::Degraded {
            error: "Validation failed".to_string(),
            validation_errors: report.errors,
            ambiguous: true,
        };
    }
    RefineOutcome::Accepted(response)
}

/// Drop terms containing digits, trim, drop empties and dedupe
/// case-insensitively, keeping first occurrences in order.
pub fn sanitize_canonical_terms(terms: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    terms
        .iter()
        .filter(|t| !t.chars().any(|c| c.is_ascii_digit()))
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(surface_key(t)))
        .map(str::to_string)
        .collect()
}

/// The canonical terms safe to embed as vector queries.
pub fn vector_query_terms(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .filter(|t| SAFE_QUERY_TERM.is_match(t))
        .take(MAX_QUERY_TERMS)
        .cloned()
        .collect()
}

fn kind_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Word => "word",
        TokenKind::Number => "number",
        TokenKind::Pair => "pair",
        TokenKind::Unit => "unit",
        TokenKind::Punct => "punct",
    }
}

fn script_name(script: Option<Script>) -> &'static str {
    match script {
        Some(Script::He) => "he",
        Some(Script::En) => "en",
        Some(Script::Digit) => "digit",
        Some(Script::Mixed) => "mixed",
        None => "-",
    }
}

const LEGEND: &str = "\
<LEGEND>
Token kinds:
- word: Hebrew or English word, may include hyphens
- number: standalone number
- pair: number pair such as 18/0 or 14-16
- unit: measurement unit (mm, cm, °, %)
- punct: punctuation mark
</LEGEND>";

const SAFETY_RULES: &str = "\
<SAFETY_RULES>
1. The list of numbers must stay exactly the same, in order and value.
2. Every pair must stay unchanged: same A, same B, same separator.
3. No characters may be lost; only word splitting and merging is allowed.
4. Tooth groups may only use FDI numbers from the approved dictionary.
5. If uncertain, set ambiguous=true.
</SAFETY_RULES>";

const INSTRUCTIONS: &str = r#"<INSTRUCTIONS>
Return one JSON object with:
- "ops": spacing operations on words only,
  {"op": "insert_space", "after_token_idx": N} or
  {"op": "merge_tokens", "range": [start, end]}
- "canonical_terms": English dental terms for the concepts
- "tooth_groups": [{"label_he": ..., "label_en": ..., "FDI": [...]}]
- "intent_hints": scheduling, treatment, examination, ...
- "ambiguous": true if the text is unclear
Return JSON only.
</INSTRUCTIONS>"#;

const EXAMPLE: &str = r#"<EXAMPLE>
Input: "מולטי יוניט שתל 14 18/0"
Output:
{"ops": [], "canonical_terms": ["multi-unit abutment", "dental implant"], "tooth_groups": [], "intent_hints": ["treatment"], "ambiguous": false}
</EXAMPLE>"#;

/// Deterministic rendering of one line for the refine collaborator.
///
/// PAIRS and NUMBERS sections appear only when the line has any.
pub fn render_marked_view(normalized: &NormalizedText, tokens: &[Token]) -> String {
    let mut sections: Vec<String> = vec![LEGEND.to_string()];

    sections.push(format!(
        "<TEXT>\nOriginal: {}\nNormalized: {}\n</TEXT>",
        normalized.raw_text, normalized.normalized_text
    ));

    let mut view = String::from("<TOKENS>\n");
    for token in tokens {
        let _ = write!(
            view,
            "[{}] {} {} {} [{}, {})",
            token.idx,
            token.text,
            kind_name(token.kind),
            script_name(token.script),
            token.span.0,
            token.span.1
        );
        if let Some(meta) = &token.meta {
            let _ = write!(view, " A={} B={} sep={}", meta.a, meta.b, meta.sep.as_char());
        }
        view.push('\n');
    }
    view.push_str("</TOKENS>");
    sections.push(view);

    if !normalized.pairs.is_empty() {
        let mut pairs = String::from("<PAIRS>\n");
        for pair in &normalized.pairs {
            let _ = writeln!(
                pairs,
                "- {}: A={} B={} sep='{}' span=[{}, {})",
                pair.text,
                pair.a,
                pair.b,
                pair.sep.as_char(),
                pair.span.0,
                pair.span.1
            );
        }
        pairs.push_str("</PAIRS>");
        sections.push(pairs);
    }

    if !normalized.numbers.is_empty() {
        sections.push(format!(
            "<NUMBERS>\nFound numbers: {}\nCount: {}\n</NUMBERS>",
            normalized.numbers.join(", "),
            normalized.numbers.len()
        ));
    }

    sections.extend(
        [SAFETY_RULES, INSTRUCTIONS, EXAMPLE].map(str::to_string),
    );
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        normalize::normalize,
        tokenize::tokenize,
        validate::{ToothGroupDef, ToothGroupTable},
    };

    fn line(raw: &str) -> (NormalizedText, Vec<Token>) {
        let n = normalize(raw);
        let tokens = tokenize(&n);
        (n, tokens)
    }

    fn replay(responses: Vec<Value>) -> ReplayRefiner {
        ReplayRefiner::new(responses)
    }

    #[test]
    fn canonical_terms_are_cleaned_in_order() {
        let terms: Vec<String> = [" Dental Implant ", "implant 4.5", "dental implant", "", "abutment"]
            .map(String::from)
            .into();
        assert_eq!(
            sanitize_canonical_terms(&terms),
            vec!["Dental Implant".to_string(), "abutment".to_string()]
        );
    }

    #[test]
    fn vector_terms_require_plain_latin() {
        let terms: Vec<String> = ["שתל", "multi-unit abutment", "crown!", "implant", "post", "screw"]
            .map(String::from)
            .into();
        assert_eq!(
            vector_query_terms(&terms),
            vec!["multi-unit abutment", "implant", "post"]
        );
    }

    #[test]
    fn parse_accepts_lenient_shapes() {
        let response = parse_response(json!({
            "ops": [{"op": "split_word", "idx": 1}],
            "canonical_terms": ["implant", "Implant"],
            "tooth_groups": [{"label_en": "lower incisors", "FDI": [31, "32"]}],
            "intent_hints": ["treatment"],
        }))
        .unwrap();

        assert!(matches!(response.ops[0], TokenOperation::Malformed { .. }));
        assert_eq!(response.canonical_terms, vec!["implant"]);
        assert_eq!(response.tooth_groups[0].fdi, vec!["31", "32"]);
        assert!(!response.ambiguous);
    }

    #[test]
    fn parse_rejects_errors_and_wrong_shapes() {
        assert_eq!(
            parse_response(json!({"error": "timeout"})).unwrap_err(),
            "timeout"
        );
        assert!(parse_response(json!(["ops"])).is_err());
        assert!(parse_response(json!({"ops": "none"})).is_err());
    }

    #[test]
    fn review_degrades_client_failure() {
        let (n, tokens) = line("שתל 14");
        let outcome = review(&replay(vec![]), 0, &SafetyValidator::new(), &n, &tokens);

        match outcome {
            RefineOutcome::Degraded { error, ambiguous, .. } => {
                assert!(error.contains("no recorded response for line 0"));
                assert!(ambiguous);
            }
            other => panic!("expected degraded outcome, got {other:?}"),
        }
    }

    #[test]
    fn review_reports_validation_errors() {
        let (n, tokens) = line("שתל 14 18/0");
        let client = replay(vec![json!({"ops": [{"op": "merge_tokens", "range": [0, 1]}]})]);
        let outcome = review(&client, 0, &SafetyValidator::new(), &n, &tokens);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"], "Validation failed");
        assert_eq!(json["ambiguous"], true);
        assert!(json["validation_errors"][0].as_str().unwrap().contains("index 1"));
    }

    #[test]
    fn review_checks_tooth_groups_against_table() {
        let (n, tokens) = line("לסת תחתונה");
        let table = ToothGroupTable::from([(
            "lower_incisors".to_string(),
            ToothGroupDef {
                fdi: vec!["31".into(), "41".into()],
            },
        )]);
        let validator = SafetyValidator::with_tooth_groups(&table);

        let ok = replay(vec![json!({"tooth_groups": [{"FDI": ["31"]}]})]);
        assert!(review(&ok, 0, &validator, &n, &tokens).accepted().is_some());

        let bad = replay(vec![json!({"tooth_groups": [{"FDI": ["99"]}]})]);
        assert!(review(&bad, 0, &validator, &n, &tokens).accepted().is_none());
    }

    #[test]
    fn replay_reads_jsonl_with_blank_and_broken_lines() {
        let data = "{\"ambiguous\": true}\n\nnot json\n";
        let client = ReplayRefiner::from_reader(data.as_bytes()).unwrap();
        assert_eq!(client.len(), 3);

        assert_eq!(client.refine(0, "").unwrap()["ambiguous"], true);
        assert_eq!(client.refine(1, "").unwrap(), json!({}));
        assert!(parse_response(client.refine(2, "").unwrap()).is_err());
        assert!(client.refine(3, "").is_err());
    }

    #[test]
    fn marked_view_lists_tokens_and_measurements() {
        let (n, tokens) = line("מולטיוניט שתל14 18/0");
        let view = render_marked_view(&n, &tokens);

        for section in ["<LEGEND>", "<TEXT>", "<TOKENS>", "<PAIRS>", "<NUMBERS>", "<SAFETY_RULES>", "<INSTRUCTIONS>", "<EXAMPLE>"] {
            assert!(view.contains(section), "missing {section}");
        }
        assert!(view.contains("[0] מולטיוניט word he [0, 9)"));
        assert!(view.contains("Found numbers: 14, 18, 0"));
        assert!(view.contains("A=18 B=0 sep=/"));

        let (plain, plain_tokens) = line("שתל");
        let view = render_marked_view(&plain, &plain_tokens);
        assert!(!view.contains("<PAIRS>"));
        assert!(!view.contains("<NUMBERS>"));
    }
}
