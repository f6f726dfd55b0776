//! Nearest-neighbor candidate generation for individual tokens.

use std::{
    collections::{BTreeMap, HashMap},
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::{
    embedding::{Embedder, cosine},
    embedding_db::ConceptRef,
    error::{Error, Result},
    schema::{Span, Token, TokenKind},
    text_util::surface_key,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub row: u64,
    pub concept: ConceptRef,
    pub raw_score: f32,
}

/// A nearest-neighbor service over concept vectors.
pub trait VectorIndex: Send + Sync {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// The stored vector of a row, when the index keeps it.
    fn reconstruct(&self, _row: u64) -> Option<Vec<f32>> {
        None
    }
}

/// Brute-force inner-product index held in memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    rows: Vec<(u64, ConceptRef, Vec<f32>)>,
    positions: HashMap<u64, usize>,
}

impl MemoryIndex {
    pub fn insert(&mut self, row: u64, concept: ConceptRef, vector: Vec<f32>) {
        match self.positions.get(&row) {
            Some(&pos) => self.rows[pos] = (row, concept, vector),
            None => {
                self.positions.insert(row, self.rows.len());
                self.rows.push((row, concept, vector));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Dimension of the stored vectors, `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.rows.first().map(|(_, _, vector)| vector.len())
    }
}

impl VectorIndex for MemoryIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let mut hits = Vec::with_capacity(self.rows.len());
        for (row, concept, vector) in &self.rows {
            if vector.len() != query.len() {
                return Err(Error::Embedding(format!(
                    "query dimension {} does not match index dimension {}",
                    query.len(),
                    vector.len()
                )));
            }
            let raw_score = vector.iter().zip(query).map(|(a, b)| a * b).sum();
            hits.push(Neighbor {
                row: *row,
                concept: concept.clone(),
                raw_score,
            });
        }
        hits.sort_by(|a, b| b.raw_score.total_cmp(&a.raw_score));
        hits.truncate(k);
        Ok(hits)
    }

    fn reconstruct(&self, row: u64) -> Option<Vec<f32>> {
        self.positions.get(&row).map(|&pos| self.rows[pos].2.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VecCandidate {
    pub iri: String,
    pub label: String,
    pub score_vec: f64,
}

/// Vector candidates for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub mention_id: String,
    pub surface: String,
    /// The query text that was embedded.
    pub context: String,
    pub span: Span,
    pub candidates: Vec<VecCandidate>,
}

/// Builds per-token queries, embeds them through a bounded LRU cache and
/// searches the vector index.
///
/// The cache sits behind a mutex so one generator can serve every worker
/// of a parallel batch.
pub struct VectorCandidateGenerator {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    he2en: BTreeMap<String, Vec<String>>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    top_k: usize,
}

impl VectorCandidateGenerator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        he2en: BTreeMap<String, Vec<String>>,
        top_k: usize,
        cache_size: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            embedder,
            index,
            he2en,
            cache: Mutex::new(LruCache::new(capacity)),
            top_k,
        }
    }

    /// Vector candidates for every non-measurement token of one line.
    /// Punctuation tokens are skipped too: they would only seed vector-only
    /// mentions on commas and dashes. Lookup failures are logged and yield
    /// no hit for that token.
    pub fn candidates(
        &self,
        line: usize,
        tokens: &[Token],
        canonical_terms: &[String],
    ) -> Vec<VectorHit> {
        let mut hits = Vec::new();
        for (pos, token) in tokens.iter().enumerate() {
            if token.is_measurement() || token.kind == TokenKind::Punct {
                continue;
            }
            let query = self.query_for(tokens, pos, canonical_terms);
            match self.lookup(&query) {
                Ok(candidates) if !candidates.is_empty() => {
                    hits.push(VectorHit {
                        mention_id: format!("v{line}_{}", token.idx),
                        surface: token.text.clone(),
                        context: query,
                        span: token.span,
                        candidates,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "vector lookup failed");
                }
            }
        }
        hits
    }

    /// Query text for the token at `pos`: the first canonical terms, else
    /// a static Hebrew to English phrase, else the surface followed by the
    /// first two tokens, in index order, within two positions of it.
    pub fn query_for(
        &self,
        tokens: &[Token],
        pos: usize,
        canonical_terms: &[String],
    ) -> String {
        if !canonical_terms.is_empty() {
            return canonical_terms
                .iter()
                .take(3)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ");
        }

        let surface = &tokens[pos].text;
        let phrase = self
            .he2en
            .get(surface)
            .or_else(|| self.he2en.get(&surface_key(surface)))
            .and_then(|phrases| phrases.first());
        if let Some(phrase) = phrase {
            return phrase.clone();
        }

        let window = pos.saturating_sub(2)..=pos.saturating_add(2);
        let mut parts = vec![surface.as_str()];
        parts.extend(
            window
                .filter(|&i| i != pos)
                .filter_map(|i| tokens.get(i))
                .map(|t| t.text.as_str())
                .take(2),
        );
        parts.join(" ")
    }

    fn embed_cached(&self, query: &str) -> Result<Vec<f32>> {
        {
            let mut cache =
                self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(query) {
                tracing::trace!(query, "embedding cache hit");
                return Ok(hit.clone());
            }
        }

        let embedding = self.embedder.embed(query)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(query.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Ranked, IRI-deduplicated neighbors of one query.
    pub fn lookup(&self, query: &str) -> Result<Vec<VecCandidate>> {
        let embedding = self.embed_cached(query)?;
        let neighbors = self.index.search(&embedding, self.top_k)?;

        let mut best: Vec<VecCandidate> = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let score = self
                .index
                .reconstruct(neighbor.row)
                .map_or(neighbor.raw_score, |v| cosine(&embedding, &v));
            let score = f64::from(score);

            match best.iter_mut().find(|c| c.iri == neighbor.concept.iri) {
                Some(existing) if existing.score_vec >= score => {}
                Some(existing) => existing.score_vec = score,
                None => best.push(VecCandidate {
                    iri: neighbor.concept.iri,
                    label: neighbor.concept.label,
                    score_vec: score,
                }),
            }
        }
        best.sort_by(|a, b| b.score_vec.total_cmp(&a.score_vec));
        Ok(best)
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        embedding::HashingEmbedder, normalize::normalize, tokenize::tokenize,
    };

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text)
        }
    }

    struct FailingIndex;

    impl VectorIndex for FailingIndex {
        fn search(&self, _query: &[f32], _k: usize) -> Result<Vec<Neighbor>> {
            Err(Error::Embedding("index offline".into()))
        }
    }

    fn index_of(entries: &[(&str, &str)]) -> MemoryIndex {
        let embedder = HashingEmbedder::default();
        let mut index = MemoryIndex::default();
        for (row, (iri, label)) in entries.iter().enumerate() {
            index.insert(
                row as u64,
                ConceptRef {
                    iri: iri.to_string(),
                    label: label.to_string(),
                },
                embedder.embed(label).unwrap(),
            );
        }
        index
    }

    fn generator(
        index: Arc<dyn VectorIndex>,
        he2en: BTreeMap<String, Vec<String>>,
    ) -> (VectorCandidateGenerator, Arc<CountingEmbedder>) {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::default(),
            calls: AtomicUsize::new(0),
        });
        let generator =
            VectorCandidateGenerator::new(embedder.clone(), index, he2en, 10, 256);
        (generator, embedder)
    }

    #[test]
    fn skips_measurements_and_punctuation() {
        let index = Arc::new(index_of(&[("OHD:1", "abutment")]));
        let (generator, _) = generator(index, BTreeMap::new());
        let tokens = tokenize(&normalize("abutment 14 18/0 mm ,"));

        let hits = generator.candidates(0, &tokens, &[]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].mention_id, "v0_0");
        assert_eq!(hits[0].candidates[0].iri, "OHD:1");
    }

    #[test]
    fn query_prefers_canonical_terms_then_static_phrases() {
        let index = Arc::new(MemoryIndex::default());
        let he2en = BTreeMap::from([(
            "שתל".to_string(),
            vec!["dental implant".to_string()],
        )]);
        let (generator, _) = generator(index, he2en);
        let tokens = tokenize(&normalize("הוכנס שתל חדש באזור"));

        let terms: Vec<String> = ["implant", "fixture", "screw", "post"]
            .map(String::from)
            .into();
        assert_eq!(
            generator.query_for(&tokens, 1, &terms),
            "implant fixture screw"
        );
        assert_eq!(generator.query_for(&tokens, 1, &[]), "dental implant");
        assert_eq!(generator.query_for(&tokens, 0, &[]), "הוכנס שתל חדש");
        assert_eq!(generator.query_for(&tokens, 3, &[]), "באזור שתל חדש");
    }

    #[test]
    fn context_takes_nearby_tokens_in_line_order() {
        let index = Arc::new(MemoryIndex::default());
        let (generator, _) = generator(index, BTreeMap::new());
        let tokens = tokenize(&normalize("a b c d e"));

        assert_eq!(generator.query_for(&tokens, 2, &[]), "c a b");
        assert_eq!(generator.query_for(&tokens, 1, &[]), "b a c");
        assert_eq!(generator.query_for(&tokens, 4, &[]), "e c d");
    }

    #[test]
    fn repeated_queries_hit_the_cache() {
        let index = Arc::new(index_of(&[("OHD:1", "zirconia")]));
        let (generator, embedder) = generator(index, BTreeMap::new());

        generator.lookup("zirconia crown").unwrap();
        generator.lookup("zirconia crown").unwrap();

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(generator.cached_queries(), 1);
    }

    #[test]
    fn duplicate_iris_keep_best_score() {
        let index = Arc::new(index_of(&[
            ("OHD:1", "dental implant"),
            ("OHD:1", "implant"),
            ("OHD:2", "abutment"),
        ]));
        let (generator, _) = generator(index, BTreeMap::new());

        let candidates = generator.lookup("implant").unwrap();
        assert_eq!(candidates.iter().filter(|c| c.iri == "OHD:1").count(), 1);
        assert_eq!(candidates[0].iri, "OHD:1");
        assert!((candidates[0].score_vec - 1.0).abs() < 1e-5);
    }

    #[test]
    fn index_failure_degrades_to_no_hits() {
        let (generator, _) = generator(Arc::new(FailingIndex), BTreeMap::new());
        let tokens = tokenize(&normalize("abutment"));
        assert!(generator.candidates(0, &tokens, &[]).is_empty());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let mut index = MemoryIndex::default();
        index.insert(
            0,
            ConceptRef {
                iri: "OHD:1".into(),
                label: "x".into(),
            },
            vec![1.0, 0.0],
        );
        assert!(index.search(&[1.0], 1).is_err());
    }
}
