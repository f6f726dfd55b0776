//! Fuses gazetteer and vector evidence into ranked mentions.

use crate::{
    config::LinkerConfig,
    matcher::GazetteerHit,
    schema::{IriSource, MentionCandidate, RankedCandidate, Span},
    vector::VectorHit,
};

/// Lexical score at or above which a candidate counts as strong.
pub const STRONG_LEX: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub lex: f64,
    pub vec: f64,
    pub prior: f64,
    /// Reserved for a context boost; never applied.
    pub ctx: f64,
}

pub struct HybridRanker {
    weights: Weights,
    alias_penalty: f64,
    topk_final: usize,
}

impl HybridRanker {
    pub fn new(config: &LinkerConfig) -> Self {
        Self {
            weights: Weights {
                lex: config.w_lex,
                vec: config.w_vec,
                prior: config.w_prior,
                ctx: config.w_ctx,
            },
            alias_penalty: config.alias_penalty,
            topk_final: config.topk_final,
        }
    }

    /// One ranked mention per gazetteer span, plus vector-only mentions
    /// for tokens no lexical span covers. Ordered by span start.
    pub fn merge_and_rank(
        &self,
        gazetteer_hits: &[GazetteerHit],
        vector_hits: &[VectorHit],
    ) -> Vec<MentionCandidate> {
        let mut mentions: Vec<MentionCandidate> =
            gazetteer_hits.iter().map(seed_mention).collect();

        for hit in vector_hits {
            let surface = hit.surface.to_lowercase();
            let host = mentions
                .iter_mut()
                .find(|m| m.surface.to_lowercase().contains(&surface));
            if let Some(mention) = host {
                attach_vector_candidates(mention, hit);
            } else if mentions.iter().all(|m| !overlaps(m.span, hit.span)) {
                let mut mention = MentionCandidate {
                    mention_id: hit.mention_id.clone(),
                    surface: hit.surface.clone(),
                    span: hit.span,
                    hints: Vec::new(),
                    candidates: Vec::new(),
                    confident_singleton: false,
                };
                attach_vector_candidates(&mut mention, hit);
                mentions.push(mention);
            } else {
                tracing::trace!(
                    mention = %hit.mention_id,
                    "vector hit overlaps a lexical mention; dropped"
                );
            }
        }

        for mention in &mut mentions {
            self.score(mention);
        }
        mentions.sort_by_key(|m| m.span.0);
        mentions
    }

    fn score(&self, mention: &mut MentionCandidate) {
        normalize_vector_scores(&mut mention.candidates);
        let vector_evidence =
            mention.candidates.iter().any(|c| c.score_vec.is_some());

        for candidate in &mut mention.candidates {
            candidate.score_final = self.final_score(candidate, vector_evidence);
        }
        mention
            .candidates
            .sort_by(|a, b| b.score_final.total_cmp(&a.score_final));

        let strong: Vec<usize> = mention
            .candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.score_lex.is_some_and(|s| s >= STRONG_LEX))
            .map(|(pos, _)| pos)
            .collect();
        if let [only] = strong.as_slice() {
            if mention.candidates.len() > 1 {
                let keep = mention.candidates.swap_remove(*only);
                mention.candidates = vec![keep];
            }
            mention.confident_singleton = true;
        }
        mention.candidates.truncate(self.topk_final);
    }

    /// Weighted mean over the signals a candidate actually has.
    ///
    /// Prior frequency only counts for mentions with vector evidence, so a
    /// purely lexical mention scores exactly its lexical score.
    pub fn final_score(&self, c: &RankedCandidate, vector_evidence: bool) -> f64 {
        let mut signals: Vec<(f64, f64)> = Vec::with_capacity(3);
        if let Some(lex) = c.score_lex {
            signals.push((self.weights.lex, lex));
        }
        if let Some(norm) = c.norm_vec.filter(|&n| n > 0.0) {
            signals.push((self.weights.vec, norm));
        }
        if vector_evidence && let Some(prior) = c.score_prior.filter(|&p| p > 0.0) {
            signals.push((self.weights.prior, prior));
        }

        let raw = match signals.as_slice() {
            [] => 0.0,
            [(_, only)] => *only,
            _ => {
                let total: f64 = signals.iter().map(|(w, _)| w).sum();
                if total <= 0.0 {
                    0.0
                } else {
                    signals.iter().map(|(w, s)| w * s).sum::<f64>() / total
                }
            }
        };

        if c.iri_source.is_some_and(IriSource::is_unresolved) {
            (raw - self.alias_penalty).max(0.0)
        } else {
            raw
        }
    }
}

fn overlaps(a: Span, b: Span) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn seed_mention(hit: &GazetteerHit) -> MentionCandidate {
    let c = &hit.candidate;
    MentionCandidate {
        mention_id: hit.mention_id.clone(),
        surface: hit.surface.clone(),
        span: hit.span,
        hints: hit.hints.clone(),
        candidates: vec![RankedCandidate {
            iri: c.iri.clone(),
            label: c.label.clone(),
            score_lex: Some(c.score_lex),
            score_prior: Some(hit.score_prior),
            iri_source: Some(c.iri_source),
            match_type: Some(c.match_type),
            ..RankedCandidate::default()
        }],
        confident_singleton: false,
    }
}

/// Add vector candidates to a mention; an IRI already present keeps its
/// entry and takes the larger vector score.
fn attach_vector_candidates(mention: &mut MentionCandidate, hit: &VectorHit) {
    for vc in &hit.candidates {
        match mention.candidates.iter_mut().find(|c| c.iri == vc.iri) {
            Some(existing) => {
                existing.score_vec = Some(
                    existing
                        .score_vec
                        .map_or(vc.score_vec, |s| s.max(vc.score_vec)),
                );
            }
            None => mention.candidates.push(RankedCandidate {
                iri: vc.iri.clone(),
                label: vc.label.clone(),
                score_vec: Some(vc.score_vec),
                iri_source: Some(IriSource::Vector),
                ..RankedCandidate::default()
            }),
        }
    }
}

/// Min-max scale vector scores within one mention. Uniform scores and
/// candidates without a vector score map to 0.
fn normalize_vector_scores(candidates: &mut [RankedCandidate]) {
    let scores = candidates.iter().filter_map(|c| c.score_vec);
    let (min, max) = scores.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s), hi.max(s))
    });
    let range = max - min;

    for c in candidates {
        let norm = match c.score_vec {
            Some(s) if range > f64::EPSILON => (s - min) / range,
            _ => 0.0,
        };
        c.norm_vec = Some(norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{LexCandidate, MatchType},
        vector::VecCandidate,
    };

    fn ranker() -> HybridRanker {
        HybridRanker::new(&LinkerConfig::default())
    }

    fn gaz_hit(
        id: &str,
        surface: &str,
        span: Span,
        iri: &str,
        score_lex: f64,
        source: IriSource,
        prior: f64,
    ) -> GazetteerHit {
        GazetteerHit {
            mention_id: id.into(),
            surface: surface.into(),
            span,
            ngram: 1,
            candidate: LexCandidate {
                iri: iri.into(),
                label: iri.to_lowercase(),
                match_type: MatchType::Label,
                score_lex,
                iri_source: source,
            },
            hints: vec![],
            score_prior: prior,
            normalized_surface: None,
        }
    }

    fn vec_hit(id: &str, surface: &str, span: Span, cands: &[(&str, f64)]) -> VectorHit {
        VectorHit {
            mention_id: id.into(),
            surface: surface.into(),
            context: surface.into(),
            span,
            candidates: cands
                .iter()
                .map(|(iri, s)| VecCandidate {
                    iri: iri.to_string(),
                    label: iri.to_lowercase(),
                    score_vec: *s,
                })
                .collect(),
        }
    }

    #[test]
    fn without_vectors_final_equals_lexical() {
        let hits = [
            gaz_hit("m0_0_3", "שתל", (0, 3), "OHD:1", 0.9, IriSource::OhdSynonym, 0.7),
            gaz_hit("m0_4_8", "abcd", (4, 8), "OHD:2", 0.77, IriSource::OhdLabel, 0.3),
            gaz_hit("m0_9_12", "xyz", (9, 12), "OHD:3", 0.83, IriSource::Brand, 0.0),
        ];
        let mentions = ranker().merge_and_rank(&hits, &[]);

        assert_eq!(mentions.len(), 3);
        for (mention, hit) in mentions.iter().zip(&hits) {
            let c = &mention.candidates[0];
            assert_eq!(c.score_final, hit.candidate.score_lex);
            assert_eq!(c.norm_vec, Some(0.0));
        }
    }

    #[test]
    fn unresolved_sources_are_penalized() {
        let hits = [gaz_hit("m0_0_3", "abc", (0, 3), "X:1", 0.7, IriSource::AliasOnly, 0.0)];
        let mentions = ranker().merge_and_rank(&hits, &[]);
        assert!((mentions[0].candidates[0].score_final - 0.62).abs() < 1e-9);
    }

    #[test]
    fn vector_hit_attaches_to_containing_mention() {
        let hits = [gaz_hit(
            "m0_0_11",
            "healing cap",
            (0, 11),
            "OHD:1",
            0.8,
            IriSource::OhdLabel,
            0.5,
        )];
        let vectors = [vec_hit(
            "v0_1",
            "Cap",
            (8, 11),
            &[("OHD:1", 0.9), ("OHD:2", 0.5), ("OHD:1", 0.95)],
        )];
        let mentions = ranker().merge_and_rank(&hits, &vectors);

        assert_eq!(mentions.len(), 1);
        let candidates = &mentions[0].candidates;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].iri, "OHD:1");
        assert_eq!(candidates[0].score_vec, Some(0.95));
        assert_eq!(candidates[0].norm_vec, Some(1.0));

        let w = ranker().weights;
        let expected = (w.lex * 0.8 + w.vec * 1.0 + w.prior * 0.5) / (w.lex + w.vec + w.prior);
        assert!((candidates[0].score_final - expected).abs() < 1e-9);
        // Vector-only candidate has the minimum score and no signal left.
        assert_eq!(candidates[1].score_final, 0.0);
        assert!(!mentions[0].confident_singleton);
    }

    #[test]
    fn non_overlapping_vector_hit_becomes_its_own_mention() {
        let hits = [gaz_hit("m0_0_3", "abc", (0, 3), "OHD:1", 1.0, IriSource::OhdLabel, 0.0)];
        let vectors = [
            vec_hit("v0_1", "zirconia", (4, 12), &[("OHD:5", 0.8), ("OHD:6", 0.4)]),
            vec_hit("v0_2", "bc x", (1, 5), &[("OHD:7", 0.9)]),
        ];
        let mentions = ranker().merge_and_rank(&hits, &vectors);

        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[1].mention_id, "v0_1");
        assert_eq!(mentions[1].candidates[0].iri, "OHD:5");
        assert_eq!(mentions[1].candidates[0].score_final, 1.0);
        assert!(mentions[1].hints.is_empty());
    }

    #[test]
    fn single_strong_candidate_is_confident_and_kept_alone() {
        let hits = [gaz_hit(
            "m0_0_9",
            "מולטיוניט",
            (0, 9),
            "OHD:77",
            1.0,
            IriSource::OhdLabel,
            0.0,
        )];
        let vectors = [vec_hit(
            "v0_0",
            "מולטיוניט",
            (0, 9),
            &[("OHD:12", 0.8), ("OHD:77", 0.7), ("OHD:13", 0.6)],
        )];
        let mentions = ranker().merge_and_rank(&hits, &vectors);

        assert!(mentions[0].confident_singleton);
        assert_eq!(mentions[0].candidates.len(), 1);
        assert_eq!(mentions[0].candidates[0].iri, "OHD:77");
    }

    #[test]
    fn weak_lexical_match_is_not_confident() {
        let hits = [gaz_hit("m0_0_3", "שלת", (0, 3), "OHD:1", 0.8, IriSource::OhdLabel, 0.0)];
        let mentions = ranker().merge_and_rank(&hits, &[]);
        assert!(!mentions[0].confident_singleton);
    }

    #[test]
    fn candidates_truncate_to_topk() {
        let hits = [gaz_hit("m0_0_3", "abc", (0, 3), "OHD:0", 0.5, IriSource::OhdLabel, 0.0)];
        let cands: Vec<(String, f64)> =
            (1..10).map(|i| (format!("OHD:{i}"), i as f64 / 10.0)).collect();
        let cands: Vec<(&str, f64)> = cands.iter().map(|(i, s)| (i.as_str(), *s)).collect();
        let vectors = [vec_hit("v0_0", "abc", (0, 3), &cands)];

        let mentions = ranker().merge_and_rank(&hits, &vectors);
        let candidates = &mentions[0].candidates;
        assert_eq!(candidates.len(), LinkerConfig::default().topk_final);
        assert!(candidates.windows(2).all(|w| w[0].score_final >= w[1].score_final));
    }
}
