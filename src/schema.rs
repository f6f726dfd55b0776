//! Record types shared by every pipeline stage.
//!
//! All spans are `(start, end)` character offsets (Unicode scalar values,
//! not bytes) into the text the record was produced from, end exclusive.
//! They serialize as two-element JSON arrays.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub type Span = (usize, usize);

/// Separator of a detected number pair such as `18/0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PairSep {
    #[serde(rename = "/")]
    Slash,
    #[serde(rename = "\\")]
    Backslash,
    #[serde(rename = "-")]
    Dash,
}

impl PairSep {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '/' => Some(Self::Slash),
            '\\' => Some(Self::Backslash),
            '-' => Some(Self::Dash),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Slash => '/',
            Self::Backslash => '\\',
            Self::Dash => '-',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub text: String,
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    pub sep: PairSep,
    pub span: Span,
}

impl Pair {
    pub fn meta(&self) -> PairMeta {
        PairMeta {
            a: self.a.clone(),
            b: self.b.clone(),
            sep: self.sep,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedText {
    pub raw_text: String,
    pub normalized_text: String,
    pub numbers: Vec<String>,
    pub pairs: Vec<Pair>,
    pub units_found: Vec<String>,
    pub dates: Vec<String>,
    pub times: Vec<String>,
    pub notes: Vec<String>,
}

impl NormalizedText {
    /// Wrap already-normalized text without any extracted metadata.
    ///
    /// Used when re-tokenizing after spacing edits: the tokenizer then
    /// derives every boundary from character content alone.
    pub fn bare(text: &str) -> Self {
        Self {
            raw_text: text.to_string(),
            normalized_text: text.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Word,
    Number,
    Pair,
    Unit,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    He,
    En,
    Digit,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairMeta {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    pub sep: PairSep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub idx: usize,
    pub text: String,
    pub kind: TokenKind,
    pub span: Span,
    pub script: Option<Script>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PairMeta>,
}

impl Token {
    /// Number, pair and unit tokens carry measurements and are never
    /// part of an entity mention.
    pub fn is_measurement(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Number | TokenKind::Pair | TokenKind::Unit
        )
    }
}

/// A spacing-only edit proposed by the refine collaborator.
///
/// Parsing never fails: anything that is not a well-formed operation is
/// kept as [`TokenOperation::Malformed`] so the validator can report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum TokenOperation {
    InsertSpace { after_token_idx: i64 },
    MergeTokens { range: (i64, i64) },
    Malformed { raw: Value, reason: String },
}

impl From<Value> for TokenOperation {
    fn from(raw: Value) -> Self {
        let malformed = |raw: Value, reason: String| Self::Malformed {
            raw,
            reason,
        };

        let Some(op) = raw.get("op").and_then(Value::as_str).map(str::to_owned)
        else {
            return malformed(raw, "operation missing op field".into());
        };

        match op.as_str() {
            "insert_space" => {
                match raw.get("after_token_idx").and_then(Value::as_i64) {
                    Some(after_token_idx) => Self::InsertSpace { after_token_idx },
                    None => malformed(
                        raw,
                        "insert_space operation missing after_token_idx".into(),
                    ),
                }
            }
            "merge_tokens" => {
                let range = raw.get("range").and_then(Value::as_array).and_then(
                    |items| match items.as_slice() {
                        [start, end] => Some((start.as_i64()?, end.as_i64()?)),
                        _ => None,
                    },
                );
                match range {
                    Some(range) => Self::MergeTokens { range },
                    None => malformed(
                        raw,
                        "merge_tokens requires range [start,end]".into(),
                    ),
                }
            }
            other => {
                let reason = format!("Unknown operation type: {other}");
                malformed(raw, reason)
            }
        }
    }
}

impl From<TokenOperation> for Value {
    fn from(op: TokenOperation) -> Self {
        match op {
            TokenOperation::InsertSpace { after_token_idx } => {
                json!({"op": "insert_space", "after_token_idx": after_token_idx})
            }
            TokenOperation::MergeTokens { range } => {
                json!({"op": "merge_tokens", "range": [range.0, range.1]})
            }
            TokenOperation::Malformed { raw, .. } => raw,
        }
    }
}

/// A tooth group claimed by the refine collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToothGroup {
    #[serde(default)]
    pub label_he: String,
    #[serde(default)]
    pub label_en: String,
    #[serde(rename = "FDI", default, deserialize_with = "fdi_codes")]
    pub fdi: Vec<String>,
}

/// FDI codes arrive as strings or bare numbers; both become strings.
fn fdi_codes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|code| match code {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "FDI code must be a string or number, got {other}"
            ))),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Label,
    Synonym,
    Alias,
    Fuzzy,
    Phonetic,
    HeEnAlias,
}

/// Where a candidate's IRI came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IriSource {
    OhdLabel,
    OhdSynonym,
    ResolvedAlias,
    Vector,
    Abbreviation,
    Brand,
    AliasMap,
    Placeholder,
    AliasOnly,
}

impl IriSource {
    /// Placeholder codes and alias-only IRIs never reached a real
    /// ontology concept.
    pub fn is_unresolved(self) -> bool {
        matches!(self, Self::Placeholder | Self::AliasOnly)
    }
}

/// One lexical candidate stored in the gazetteer under a surface key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexCandidate {
    pub iri: String,
    pub label: String,
    pub match_type: MatchType,
    pub score_lex: f64,
    pub iri_source: IriSource,
}

/// A ranked candidate inside a [`MentionCandidate`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub iri: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_lex: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_vec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_vec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_prior: Option<f64>,
    pub score_final: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iri_source: Option<IriSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionCandidate {
    pub mention_id: String,
    pub surface: String,
    pub span: Span,
    pub hints: Vec<String>,
    pub candidates: Vec<RankedCandidate>,
    pub confident_singleton: bool,
}
