//! Line-level driver: normalization and refinement (Block1), then entity
//! linking (Block2), over batches of lines in parallel.

use std::{io::BufRead, sync::Arc};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    alias::AliasResolver,
    apply::apply,
    bundle::bundle,
    config::LinkerConfig,
    data_dir::DataDir,
    distance,
    embedding::{Embedder, HashingEmbedder},
    embedding_db::EmbeddingDb,
    error::Result,
    gazetteer::Gazetteer,
    lexicon::{Dictionaries, Lexicon},
    matcher::{GazetteerHit, TokenFrequencies},
    normalize::normalize,
    ranker::HybridRanker,
    refine::{self, RefineClient, RefineOutcome},
    schema::{MentionCandidate, NormalizedText, Token, TokenOperation},
    tokenize::tokenize,
    validate::{SafetyValidator, post_operation_warnings},
    vector::{VectorCandidateGenerator, VectorHit, VectorIndex},
};

/// One line of batch input. Lines that could not be decoded keep their
/// lossy text and the decoding error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLine {
    pub text: String,
    pub error: Option<String>,
}

impl From<&str> for InputLine {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_string(),
            error: None,
        }
    }
}

/// Split a reader into lines without failing on invalid UTF-8.
pub fn read_lines(mut reader: impl BufRead) -> Result<Vec<InputLine>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(text) => InputLine::from(text),
            Err(e) => InputLine {
                text: String::from_utf8_lossy(&buf).into_owned(),
                error: Some(format!("line is not valid UTF-8: {e}")),
            },
        };
        lines.push(line);
    }
    Ok(lines)
}

/// Block1 output for the `normalize` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLine {
    pub line_id: usize,
    pub raw_text: String,
    pub normalized: Option<NormalizedText>,
    pub tokens: Vec<Token>,
    pub error: Option<String>,
}

/// Normalize and tokenize every line, in parallel, preserving order.
pub fn normalize_batch(lines: &[InputLine]) -> Vec<NormalizedLine> {
    lines
        .par_iter()
        .enumerate()
        .map(|(line_id, line)| {
            if let Some(error) = &line.error {
                return NormalizedLine {
                    line_id,
                    raw_text: line.text.clone(),
                    normalized: None,
                    tokens: Vec::new(),
                    error: Some(error.clone()),
                };
            }
            let normalized = normalize(&line.text);
            let tokens = tokenize(&normalized);
            NormalizedLine {
                line_id,
                raw_text: line.text.clone(),
                normalized: Some(normalized),
                tokens,
                error: None,
            }
        })
        .collect()
}

/// The full annotation of one input line.
///
/// `tokens` are the pre-edit tokens of the normalized text; mention spans
/// refer to `applied_text`, which equals the normalized text when no
/// operation was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub line_id: usize,
    pub raw_text: String,
    pub normalized: Option<NormalizedText>,
    pub tokens: Vec<Token>,
    pub applied_text: String,
    pub operations: Vec<TokenOperation>,
    pub refine: Option<RefineOutcome>,
    pub warnings: Vec<String>,
    pub gazetteer_hits: Vec<GazetteerHit>,
    pub vector_hits: Vec<VectorHit>,
    pub mentions: Vec<MentionCandidate>,
    pub error: Option<String>,
}

impl LineRecord {
    pub fn failed(line_id: usize, raw_text: &str, error: &str) -> Self {
        Self {
            line_id,
            raw_text: raw_text.to_string(),
            normalized: None,
            tokens: Vec::new(),
            applied_text: String::new(),
            operations: Vec::new(),
            refine: None,
            warnings: Vec::new(),
            gazetteer_hits: Vec::new(),
            vector_hits: Vec::new(),
            mentions: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Block1 state handed to Block2.
struct Prepared {
    line_id: usize,
    raw_text: String,
    normalized: NormalizedText,
    tokens: Vec<Token>,
    applied_text: String,
    applied_tokens: Vec<Token>,
    operations: Vec<TokenOperation>,
    refine: Option<RefineOutcome>,
    warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Load `vectors.redb` when present.
    pub vectors: bool,
    pub bundle: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            vectors: true,
            bundle: false,
        }
    }
}

/// Shared, read-only linking services for a batch.
pub struct Linker {
    validator: SafetyValidator,
    gazetteer: Gazetteer,
    vectors: Option<VectorCandidateGenerator>,
    ranker: HybridRanker,
    refiner: Option<Arc<dyn RefineClient>>,
    bundle: bool,
}

impl Linker {
    pub fn new(
        lexicon: Lexicon,
        dictionaries: Dictionaries,
        config: &LinkerConfig,
        vectors: Option<(Arc<dyn Embedder>, Arc<dyn VectorIndex>)>,
    ) -> Self {
        let distance = distance::strategy(config.edit_distance);
        let mut resolver = AliasResolver::new(Arc::new(lexicon), distance.clone());
        if let Some((embedder, index)) = &vectors {
            resolver = resolver.with_vectors(embedder.clone(), index.clone());
        }
        let gazetteer = Gazetteer::build(&resolver, &dictionaries, distance, config);

        let vectors = vectors.map(|(embedder, index)| {
            VectorCandidateGenerator::new(
                embedder,
                index,
                dictionaries.he2en.clone(),
                config.topk_vec,
                config.embedding_cache_size,
            )
        });

        Self {
            validator: SafetyValidator::with_tooth_groups(&dictionaries.tooth_groups),
            gazetteer,
            vectors,
            ranker: HybridRanker::new(config),
            refiner: None,
            bundle: false,
        }
    }

    /// Load configuration, lexicon, dictionaries and (optionally) the
    /// vector store from a data directory.
    pub fn open(data_dir: &DataDir, options: LinkOptions) -> Result<Self> {
        let config = LinkerConfig::load(&data_dir.config_file())?;
        let lexicon = Lexicon::load(&data_dir.lexicon())?;
        let dictionaries = Dictionaries::load(data_dir)?;
        let vectors = if options.vectors {
            load_vectors(data_dir)?
        } else {
            None
        };
        tracing::debug!(
            concepts = lexicon.len(),
            vectors = vectors.is_some(),
            "linker resources loaded"
        );
        Ok(Self::new(lexicon, dictionaries, &config, vectors).with_bundling(options.bundle))
    }

    pub fn with_refiner(mut self, client: Arc<dyn RefineClient>) -> Self {
        self.refiner = Some(client);
        self
    }

    pub fn with_bundling(mut self, bundle: bool) -> Self {
        self.bundle = bundle;
        self
    }

    pub fn has_vectors(&self) -> bool {
        self.vectors.is_some()
    }

    /// Annotate a single line; token priors come from this line alone.
    pub fn annotate_line(&self, line_id: usize, text: &str) -> LineRecord {
        let prepared = self.prepare(line_id, text);
        let freqs = TokenFrequencies::from_lines([prepared.applied_tokens.as_slice()]);
        self.link(prepared, &freqs)
    }

    /// Annotate a batch. Block1 runs for every line before batch token
    /// frequencies are counted; Block2 then runs for every line. Exactly
    /// one record is returned per input line, in input order.
    pub fn annotate_batch(&self, lines: &[InputLine]) -> Vec<LineRecord> {
        let prepared: Vec<std::result::Result<Prepared, LineRecord>> = lines
            .par_iter()
            .enumerate()
            .map(|(line_id, line)| match &line.error {
                Some(error) => Err(LineRecord::failed(line_id, &line.text, error)),
                None => Ok(self.prepare(line_id, &line.text)),
            })
            .collect();

        let freqs = TokenFrequencies::from_lines(
            prepared
                .iter()
                .filter_map(|p| p.as_ref().ok())
                .map(|p| p.applied_tokens.as_slice()),
        );

        let records: Vec<LineRecord> = prepared
            .into_par_iter()
            .map(|p| match p {
                Ok(prepared) => self.link(prepared, &freqs),
                Err(record) => record,
            })
            .collect();

        let failed = records.iter().filter(|r| r.error.is_some()).count();
        let mentions: usize = records.iter().map(|r| r.mentions.len()).sum();
        tracing::info!(lines = records.len(), failed, mentions, "batch linked");
        records
    }

    fn prepare(&self, line_id: usize, text: &str) -> Prepared {
        let normalized = normalize(text);
        let tokens = tokenize(&normalized);

        let refine = self.refiner.as_ref().map(|client| {
            refine::review(client.as_ref(), line_id, &self.validator, &normalized, &tokens)
        });
        let operations: Vec<TokenOperation> = refine
            .as_ref()
            .and_then(RefineOutcome::accepted)
            .map(|response| response.ops.clone())
            .unwrap_or_default();

        let (applied_text, applied_tokens, warnings) = if operations.is_empty() {
            (normalized.normalized_text.clone(), tokens.clone(), Vec::new())
        } else {
            let (text, applied) = apply(&normalized.normalized_text, &tokens, &operations);
            let warnings = post_operation_warnings(&normalized, &text);
            if !warnings.is_empty() {
                tracing::warn!(line_id, ?warnings, "applied operations broke an invariant");
            }
            (text, applied, warnings)
        };

        Prepared {
            line_id,
            raw_text: text.to_string(),
            normalized,
            tokens,
            applied_text,
            applied_tokens,
            operations,
            refine,
            warnings,
        }
    }

    fn link(&self, prepared: Prepared, freqs: &TokenFrequencies) -> LineRecord {
        let Prepared {
            line_id,
            raw_text,
            normalized,
            tokens,
            applied_text,
            applied_tokens,
            operations,
            refine,
            warnings,
        } = prepared;

        let gazetteer_hits =
            self.gazetteer
                .match_tokens(line_id, &applied_tokens, Some(freqs));

        let vector_hits = match &self.vectors {
            Some(generator) => {
                let terms = refine
                    .as_ref()
                    .and_then(RefineOutcome::accepted)
                    .map(|r| refine::vector_query_terms(&r.canonical_terms))
                    .unwrap_or_default();
                generator.candidates(line_id, &applied_tokens, &terms)
            }
            None => Vec::new(),
        };

        let mut mentions = self.ranker.merge_and_rank(&gazetteer_hits, &vector_hits);
        if self.bundle {
            mentions = bundle(&applied_text, mentions);
        }

        LineRecord {
            line_id,
            raw_text,
            normalized: Some(normalized),
            tokens,
            applied_text,
            operations,
            refine,
            warnings,
            gazetteer_hits,
            vector_hits,
            mentions,
            error: None,
        }
    }
}

/// Open the vector store and load it for nearest-neighbor search. A
/// missing or empty store, or one built with another dimension, means
/// lexical-only linking.
fn load_vectors(
    data_dir: &DataDir,
) -> Result<Option<(Arc<dyn Embedder>, Arc<dyn VectorIndex>)>> {
    let path = data_dir.vectors_db();
    if !path.exists() {
        tracing::info!(path = %path.display(), "no vector store; linking lexically");
        return Ok(None);
    }

    let index = EmbeddingDb::open(&path)?.load_index()?;
    let embedder = HashingEmbedder::default();
    match index.dimension() {
        None => {
            tracing::info!("vector store is empty; linking lexically");
            Ok(None)
        }
        Some(dimension) if dimension != embedder.dimension() => {
            tracing::warn!(
                stored = dimension,
                expected = embedder.dimension(),
                "vector store dimension mismatch; run `dentlink vectors build`"
            );
            Ok(None)
        }
        Some(_) => {
            let embedder: Arc<dyn Embedder> = Arc::new(embedder);
            let index: Arc<dyn VectorIndex> = Arc::new(index);
            Ok(Some((embedder, index)))
        }
    }
}
