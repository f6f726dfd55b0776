use crate::{
    embedding_db::{ConceptRef, EmbeddingDb},
    error::Result,
    lexicon::Lexicon,
    text_util::surface_key,
    vector::MemoryIndex,
};

/// Text to dense vector service.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub const DEFAULT_DIMENSION: usize = 256;

/// Offline embedder: signed feature hashing of character trigrams and
/// whole words into a fixed number of buckets, L2-normalized.
///
/// Similar spellings share most trigrams, so cosine similarity behaves
/// like a soft string match across Hebrew and Latin text.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let bucket = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
            bytes[6], bytes[7],
        ]);
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[(bucket % self.dimension as u64) as usize] += sign * weight;
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let key = surface_key(text);

        for word in key.split_whitespace() {
            self.add_feature(&mut vector, &format!("w:{word}"), 1.0);

            let padded: Vec<char> =
                format!("#{word}#").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, &format!("g:{gram}"), 0.5);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// One row per concept label and synonym, numbered from zero.
pub fn lexicon_rows(lexicon: &Lexicon) -> Vec<(u64, ConceptRef, String)> {
    lexicon
        .concepts()
        .iter()
        .flat_map(|concept| {
            std::iter::once(&concept.label)
                .chain(concept.synonyms.iter())
                .map(move |text| {
                    let concept_ref = ConceptRef {
                        iri: concept.iri.clone(),
                        label: concept.label.clone(),
                    };
                    (concept_ref, text.clone())
                })
        })
        .enumerate()
        .map(|(row, (concept, text))| (row as u64, concept, text))
        .collect()
}

/// Embed a batch of lexicon rows and store them in the database.
///
/// Returns the number of rows stored.
pub fn embed_and_store(
    embedder: &dyn Embedder,
    db: &EmbeddingDb,
    rows: &[(u64, ConceptRef, String)],
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    let entries = rows
        .iter()
        .map(|(row, concept, text)| {
            Ok((*row, concept.clone(), embedder.embed(text)?))
        })
        .collect::<Result<Vec<_>>>()?;

    db.batch_store(&entries)?;
    Ok(entries.len())
}

/// Embed lexicon rows straight into an in-memory index, skipping the
/// vector store.
pub fn memory_index(
    embedder: &dyn Embedder,
    rows: &[(u64, ConceptRef, String)],
) -> Result<MemoryIndex> {
    let mut index = MemoryIndex::default();
    for (row, concept, text) in rows {
        index.insert(*row, concept.clone(), embedder.embed(text)?);
    }
    Ok(index)
}

/// Cosine similarity; zero vectors score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::OntologyConcept;

    #[test]
    fn embeddings_are_unit_length_and_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("dental implant").unwrap();
        let b = embedder.embed("dental implant").unwrap();

        assert_eq!(a.len(), DEFAULT_DIMENSION);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_spellings_are_closer_than_unrelated_text() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("abutment").unwrap();
        let near = embedder.embed("multi-unit abutment").unwrap();
        let far = embedder.embed("zirconia crown").unwrap();

        assert!(cosine(&query, &near) > cosine(&query, &far));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let v = HashingEmbedder::new(8).embed("   ").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine(&v, &v), 0.0);
    }

    #[test]
    fn lexicon_rows_cover_labels_and_synonyms() {
        let lexicon = Lexicon::new(vec![
            OntologyConcept {
                iri: "OHD:1".into(),
                label: "dental implant".into(),
                synonyms: vec!["fixture".into()],
            },
            OntologyConcept {
                iri: "OHD:2".into(),
                label: "abutment".into(),
                synonyms: vec![],
            },
        ]);
        let rows = lexicon_rows(&lexicon);
        let texts: Vec<(u64, &str, &str)> = rows
            .iter()
            .map(|(row, c, text)| (*row, c.iri.as_str(), text.as_str()))
            .collect();
        assert_eq!(
            texts,
            [
                (0, "OHD:1", "dental implant"),
                (1, "OHD:1", "fixture"),
                (2, "OHD:2", "abutment"),
            ]
        );
    }
}
