use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    distance::EditDistance,
    embedding::Embedder,
    lexicon::{Lexicon, OntologyConcept},
    schema::IriSource,
    vector::VectorIndex,
};

/// Neighbors consulted by the vector stage.
const VECTOR_NEIGHBORS: usize = 3;
/// Synonyms compared per neighbor in the vector stage.
const SYNONYMS_PER_NEIGHBOR: usize = 3;
/// Aliases and ontology surfaces shorter than this never contain-match.
const MIN_CONTAINMENT_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAlias {
    pub iri: String,
    pub label: String,
    pub source: IriSource,
}

/// Resolves free-text English aliases to ontology concepts.
///
/// Stages, first success wins:
/// 1. exact label (case-insensitive)
/// 2. exact synonym
/// 3. containment either way, shortest label wins
/// 4. nearest vector neighbors, closest by edit distance
pub struct AliasResolver {
    lexicon: Arc<Lexicon>,
    by_iri: HashMap<String, usize>,
    distance: Arc<dyn EditDistance>,
    vectors: Option<(Arc<dyn Embedder>, Arc<dyn VectorIndex>)>,
}

impl AliasResolver {
    pub fn new(lexicon: Arc<Lexicon>, distance: Arc<dyn EditDistance>) -> Self {
        let mut by_iri = HashMap::new();
        for (pos, concept) in lexicon.concepts().iter().enumerate() {
            by_iri.entry(concept.iri.clone()).or_insert(pos);
        }
        Self {
            lexicon,
            by_iri,
            distance,
            vectors: None,
        }
    }

    pub fn with_vectors(
        mut self,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        self.vectors = Some((embedder, index));
        self
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn concept(&self, iri: &str) -> Option<&OntologyConcept> {
        self.by_iri
            .get(iri)
            .map(|&pos| &self.lexicon.concepts()[pos])
    }

    pub fn resolve(&self, alias: &str) -> Option<ResolvedAlias> {
        let query = alias.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }

        self.exact_label(&query)
            .or_else(|| self.exact_synonym(&query))
            .or_else(|| self.containment(&query))
            .or_else(|| self.nearest(&query))
    }

    fn resolved(concept: &OntologyConcept, source: IriSource) -> ResolvedAlias {
        ResolvedAlias {
            iri: concept.iri.clone(),
            label: concept.label.clone(),
            source,
        }
    }

    fn exact_label(&self, query: &str) -> Option<ResolvedAlias> {
        self.lexicon
            .concepts()
            .iter()
            .find(|c| c.label.to_lowercase() == query)
            .map(|c| Self::resolved(c, IriSource::OhdLabel))
    }

    fn exact_synonym(&self, query: &str) -> Option<ResolvedAlias> {
        self.lexicon
            .concepts()
            .iter()
            .find(|c| c.synonyms.iter().any(|s| s.to_lowercase() == query))
            .map(|c| Self::resolved(c, IriSource::OhdSynonym))
    }

    fn containment(&self, query: &str) -> Option<ResolvedAlias> {
        if query.chars().count() < MIN_CONTAINMENT_LEN {
            return None;
        }
        let contains = |surface: &str| {
            let surface = surface.to_lowercase();
            surface.chars().count() >= MIN_CONTAINMENT_LEN
                && (surface.contains(query) || query.contains(&surface))
        };

        let mut best: Option<&OntologyConcept> = None;
        for concept in self.lexicon.concepts() {
            let matched = contains(&concept.label)
                || concept.synonyms.iter().any(|s| contains(s));
            let shorter = best.is_none_or(|b| {
                concept.label.chars().count() < b.label.chars().count()
            });
            if matched && shorter {
                best = Some(concept);
            }
        }
        best.map(|c| Self::resolved(c, IriSource::ResolvedAlias))
    }

    fn nearest(&self, query: &str) -> Option<ResolvedAlias> {
        let (embedder, index) = self.vectors.as_ref()?;
        let neighbors = embedder
            .embed(query)
            .and_then(|embedding| index.search(&embedding, VECTOR_NEIGHBORS));
        let neighbors = match neighbors {
            Ok(neighbors) => neighbors,
            Err(e) => {
                tracing::warn!(alias = query, error = %e, "vector alias lookup failed");
                return None;
            }
        };

        let mut best: Option<(usize, ResolvedAlias)> = None;
        for neighbor in neighbors {
            let synonyms = self
                .concept(&neighbor.concept.iri)
                .map(|c| c.synonyms.as_slice())
                .unwrap_or_default();
            let distance = std::iter::once(&neighbor.concept.label)
                .chain(synonyms.iter().take(SYNONYMS_PER_NEIGHBOR))
                .map(|surface| {
                    self.distance.distance(query, &surface.to_lowercase())
                })
                .min()
                .unwrap_or(usize::MAX);

            if best.as_ref().is_none_or(|(d, _)| distance < *d) {
                best = Some((
                    distance,
                    ResolvedAlias {
                        iri: neighbor.concept.iri,
                        label: neighbor.concept.label,
                        source: IriSource::Vector,
                    },
                ));
            }
        }
        best.map(|(_, resolved)| resolved)
    }
}
