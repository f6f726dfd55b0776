//! Multi-source lexical index keyed by normalized surface strings.
//!
//! Every surface key holds exactly one candidate. When two sources offer
//! the same key, the entry with the better [`Priority`] stays; ties keep
//! the first inserted.

use std::{collections::HashMap, sync::Arc};

use crate::{
    alias::{AliasResolver, ResolvedAlias},
    config::LinkerConfig,
    distance::{EditDistance, phonetic_code},
    lexicon::Dictionaries,
    schema::{IriSource, LexCandidate, MatchType},
    text_util::{char_len, contains_hebrew, fuzzy_form, is_all_digits, surface_key},
};

pub const LABEL_SCORE: f64 = 1.0;
pub const SYNONYM_SCORE: f64 = 0.9;
/// Subtracted from the base score of aliases that never reached a real
/// ontology concept.
pub const UNRESOLVED_PENALTY: f64 = 0.2;

/// Fuzzy scores are interpolated between floor and ceiling by similarity.
pub const FUZZY_BAND: (f64, f64) = (0.70, 0.85);
/// Wider band for window surfaces of at most [`SHORT_SURFACE_LEN`] chars.
pub const SHORT_FUZZY_BAND: (f64, f64) = (0.65, 0.88);
pub const SHORT_SURFACE_LEN: usize = 4;
pub const PHONETIC_SCORE: f64 = 0.83;
/// Minimum similarity, as a fraction, accepted when the edit distance
/// exceeds the configured maximum.
pub const MIN_FUZZY_SIMILARITY: f64 = 0.90;
/// Queries shorter than this never fuzzy match; two-letter Hebrew words
/// are one edit away from too many keys.
pub const MIN_FUZZY_LEN: usize = 3;
pub const MIN_PHONETIC_LEN: usize = 4;

/// A hand-curated Hebrew spelling mapped to a device or implant concept.
struct CuratedVariant {
    surface: &'static str,
    placeholder_iri: &'static str,
    english: &'static str,
    hint: &'static str,
    /// Known misspelling of this canonical surface.
    typo_of: Option<&'static str>,
}

const CURATED_VARIANTS: &[CuratedVariant] = &[
    CuratedVariant {
        surface: "שתל",
        placeholder_iri: "IMPLANT:שתל",
        english: "dental implant",
        hint: "implant_hint",
        typo_of: None,
    },
    CuratedVariant {
        surface: "שלת",
        placeholder_iri: "IMPLANT:שתל",
        english: "dental implant",
        hint: "implant_hint",
        typo_of: Some("שתל"),
    },
    CuratedVariant {
        surface: "מולטיוניט",
        placeholder_iri: "DEVICE:multiunit_abutment",
        english: "multi-unit abutment",
        hint: "device_hint",
        typo_of: None,
    },
    CuratedVariant {
        surface: "מולטי יוניט",
        placeholder_iri: "DEVICE:multiunit_abutment",
        english: "multi-unit abutment",
        hint: "device_hint",
        typo_of: None,
    },
    CuratedVariant {
        surface: "מולטי-יוניט",
        placeholder_iri: "DEVICE:multiunit_abutment",
        english: "multi-unit abutment",
        hint: "device_hint",
        typo_of: None,
    },
    CuratedVariant {
        surface: "MU",
        placeholder_iri: "DEVICE:multiunit_abutment",
        english: "multi-unit abutment",
        hint: "device_hint",
        typo_of: None,
    },
    CuratedVariant {
        surface: "MUA",
        placeholder_iri: "DEVICE:multiunit_abutment",
        english: "multi-unit abutment",
        hint: "device_hint",
        typo_of: None,
    },
];

/// Collision rank of an index entry; lower wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Resolved,
    Label,
    Synonym,
    Vector,
    Unresolved,
}

impl Priority {
    fn of_resolution(source: IriSource) -> Self {
        match source {
            IriSource::Vector => Self::Vector,
            source if source.is_unresolved() => Self::Unresolved,
            _ => Self::Resolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub candidate: LexCandidate,
    pub priority: Priority,
    /// Canonical surface when the entry itself is a known misspelling.
    pub normalized_surface: Option<String>,
}

pub struct Gazetteer {
    pub(crate) keys: Vec<String>,
    pub(crate) entries: HashMap<String, IndexEntry>,
    pub(crate) fuzzy_forms: Vec<String>,
    pub(crate) hebrew: Vec<bool>,
    pub(crate) phonetic: HashMap<String, usize>,
    pub(crate) hints: HashMap<String, &'static str>,
    pub(crate) distance: Arc<dyn EditDistance>,
    pub(crate) max_edit_distance: usize,
    pub(crate) ngram_max: usize,
}

impl Gazetteer {
    fn empty(distance: Arc<dyn EditDistance>, config: &LinkerConfig) -> Self {
        Self {
            keys: Vec::new(),
            entries: HashMap::new(),
            fuzzy_forms: Vec::new(),
            hebrew: Vec::new(),
            phonetic: HashMap::new(),
            hints: HashMap::new(),
            distance,
            max_edit_distance: config.lex_fuzzy_max_ed,
            ngram_max: config.ngram_max,
        }
    }

    /// Build the index from the ontology lexicon (reached through the
    /// resolver), the static dictionaries and the curated variant table.
    pub fn build(
        resolver: &AliasResolver,
        dictionaries: &Dictionaries,
        distance: Arc<dyn EditDistance>,
        config: &LinkerConfig,
    ) -> Self {
        let mut index = Self::empty(distance, config);

        for concept in resolver.lexicon().concepts() {
            index.insert_ontology(
                &concept.label,
                &concept.iri,
                &concept.label,
                MatchType::Label,
                LABEL_SCORE,
                IriSource::OhdLabel,
                Priority::Label,
            );
            for synonym in &concept.synonyms {
                index.insert_ontology(
                    synonym,
                    &concept.iri,
                    &concept.label,
                    MatchType::Synonym,
                    SYNONYM_SCORE,
                    IriSource::OhdSynonym,
                    Priority::Synonym,
                );
            }
        }

        for (abbr, expansion) in &dictionaries.abbreviations {
            index.insert(
                abbr,
                LexCandidate {
                    iri: format!("ABBR:{abbr}"),
                    label: expansion.clone(),
                    match_type: MatchType::Label,
                    score_lex: LABEL_SCORE,
                    iri_source: IriSource::Abbreviation,
                },
                Priority::Label,
                None,
            );
        }

        for (brand, aliases) in &dictionaries.brand_names {
            let iri = format!("BRAND:{brand}");
            index.insert(
                brand,
                LexCandidate {
                    iri: iri.clone(),
                    label: brand.clone(),
                    match_type: MatchType::Label,
                    score_lex: LABEL_SCORE,
                    iri_source: IriSource::Brand,
                },
                Priority::Label,
                None,
            );
            for alias in aliases {
                index.insert(
                    alias,
                    LexCandidate {
                        iri: iri.clone(),
                        label: brand.clone(),
                        match_type: MatchType::Synonym,
                        score_lex: SYNONYM_SCORE,
                        iri_source: IriSource::Brand,
                    },
                    Priority::Synonym,
                    None,
                );
            }
        }

        index.insert_curated(resolver);

        for (alias, iri) in &dictionaries.en_alias_to_iri {
            let (candidate, priority) = match resolver.concept(iri) {
                Some(concept) => (
                    LexCandidate {
                        iri: concept.iri.clone(),
                        label: concept.label.clone(),
                        match_type: MatchType::Alias,
                        score_lex: SYNONYM_SCORE,
                        iri_source: IriSource::AliasMap,
                    },
                    Priority::Resolved,
                ),
                None => alias_candidate(
                    resolver.resolve(alias),
                    iri,
                    alias,
                    MatchType::Alias,
                ),
            };
            index.insert(alias, candidate, priority, None);
        }

        for (hebrew, phrases) in &dictionaries.he2en {
            let placeholder = format!("HE2EN:{hebrew}");
            let resolved = phrases.iter().find_map(|p| resolver.resolve(p));
            let fallback_label = phrases.first().unwrap_or(hebrew);
            let (candidate, priority) = alias_candidate(
                resolved,
                &placeholder,
                fallback_label,
                MatchType::HeEnAlias,
            );
            index.insert(hebrew, candidate, priority, None);

            // English forms are matchable too, but never displace an
            // ontology label or synonym holding the same surface.
            for phrase in phrases {
                let (candidate, priority) = alias_candidate(
                    resolver.resolve(phrase),
                    &placeholder,
                    phrase,
                    MatchType::HeEnAlias,
                );
                let priority = priority.max(Priority::Synonym);
                index.insert(phrase, candidate, priority, None);
            }
        }

        tracing::debug!(keys = index.len(), "gazetteer index built");
        index
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_ontology(
        &mut self,
        surface: &str,
        iri: &str,
        label: &str,
        match_type: MatchType,
        score_lex: f64,
        iri_source: IriSource,
        priority: Priority,
    ) {
        let key = surface_key(surface);
        if is_all_digits(&key) || char_len(&key) <= 2 {
            return;
        }
        self.insert(
            surface,
            LexCandidate {
                iri: iri.to_string(),
                label: label.to_string(),
                match_type,
                score_lex,
                iri_source,
            },
            priority,
            None,
        );
    }

    fn insert_curated(&mut self, resolver: &AliasResolver) {
        for variant in CURATED_VARIANTS {
            let resolved = resolver.resolve(variant.english);
            let (mut candidate, priority) = match resolved {
                Some(r) => (
                    LexCandidate {
                        iri: r.iri,
                        label: r.label,
                        match_type: MatchType::Label,
                        score_lex: LABEL_SCORE,
                        iri_source: r.source,
                    },
                    Priority::of_resolution(r.source),
                ),
                None => (
                    LexCandidate {
                        iri: variant.placeholder_iri.to_string(),
                        label: variant.english.to_string(),
                        match_type: MatchType::Label,
                        score_lex: LABEL_SCORE,
                        iri_source: IriSource::Placeholder,
                    },
                    Priority::Unresolved,
                ),
            };

            let mut normalized_surface = None;
            if let Some(canonical) = variant.typo_of {
                let similarity = self.distance.similarity(
                    &fuzzy_form(&surface_key(variant.surface)),
                    &fuzzy_form(&surface_key(canonical)),
                );
                candidate.match_type = MatchType::Fuzzy;
                candidate.score_lex = band_score(FUZZY_BAND, similarity);
                normalized_surface = Some(canonical.to_string());
            }

            self.hints.insert(surface_key(variant.surface), variant.hint);
            self.insert(variant.surface, candidate, priority, normalized_surface);
        }
    }

    /// Add `surface` unless a better or equal entry already holds its key.
    pub fn insert(
        &mut self,
        surface: &str,
        candidate: LexCandidate,
        priority: Priority,
        normalized_surface: Option<String>,
    ) {
        let key = surface_key(surface);
        if key.is_empty() || is_all_digits(&key) {
            return;
        }

        if let Some(existing) = self.entries.get_mut(&key) {
            if existing.priority > priority {
                tracing::debug!(
                    key = %key,
                    kept = %candidate.iri,
                    dropped = %existing.candidate.iri,
                    "gazetteer collision"
                );
                *existing = IndexEntry {
                    candidate,
                    priority,
                    normalized_surface,
                };
            }
            return;
        }

        let position = self.keys.len();
        if key.is_ascii()
            && char_len(&key) >= MIN_PHONETIC_LEN
            && let Some(code) = phonetic_code(&key)
        {
            self.phonetic.entry(code).or_insert(position);
        }
        self.fuzzy_forms.push(fuzzy_form(&key));
        self.hebrew.push(contains_hebrew(&key));
        self.entries.insert(
            key.clone(),
            IndexEntry {
                candidate,
                priority,
                normalized_surface,
            },
        );
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn lookup(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Curated hint attached to a surface key, if any.
    pub fn hint_for(&self, key: &str) -> Option<&'static str> {
        self.hints.get(key).copied()
    }

    /// Best fuzzy key for `query_key`: the highest similarity among keys
    /// within the edit-distance threshold or at least 90% similar. Ties
    /// keep the earliest key.
    pub fn fuzzy(
        &self,
        query_key: &str,
        hebrew_only: bool,
    ) -> Option<(&str, f64)> {
        let query = fuzzy_form(query_key);
        let query_len = char_len(&query);
        if query_len < MIN_FUZZY_LEN {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        for (pos, form) in self.fuzzy_forms.iter().enumerate() {
            if hebrew_only && !self.hebrew[pos] {
                continue;
            }
            let form_len = char_len(form);
            let longest = query_len.max(form_len);
            let allowed = self.max_edit_distance.max(longest / 10);
            if query_len.abs_diff(form_len) > allowed {
                continue;
            }

            let distance = self.distance.distance(&query, form);
            let similarity = 1.0 - distance.min(longest) as f64 / longest as f64;
            let accepted = distance <= self.max_edit_distance
                || similarity >= MIN_FUZZY_SIMILARITY;
            if accepted && best.is_none_or(|(_, s)| similarity > s) {
                best = Some((pos, similarity));
            }
        }
        best.map(|(pos, similarity)| (self.keys[pos].as_str(), similarity))
    }

    /// Key sharing the phonetic code of an ASCII query.
    pub fn phonetic(&self, query_key: &str) -> Option<&str> {
        if !query_key.is_ascii() || char_len(query_key) < MIN_PHONETIC_LEN {
            return None;
        }
        let code = phonetic_code(query_key)?;
        self.phonetic.get(&code).map(|&pos| self.keys[pos].as_str())
    }
}

/// Linear interpolation inside a `(floor, ceiling)` score band.
pub fn band_score((floor, ceiling): (f64, f64), similarity: f64) -> f64 {
    floor + (ceiling - floor) * similarity.clamp(0.0, 1.0)
}

/// Candidate for a manual alias: the resolved concept when resolution
/// succeeded, else the given IRI tagged `alias_only` with a penalized
/// score.
fn alias_candidate(
    resolved: Option<ResolvedAlias>,
    fallback_iri: &str,
    fallback_label: &str,
    match_type: MatchType,
) -> (LexCandidate, Priority) {
    match resolved {
        Some(r) => (
            LexCandidate {
                iri: r.iri,
                label: r.label,
                match_type,
                score_lex: SYNONYM_SCORE,
                iri_source: r.source,
            },
            Priority::of_resolution(r.source),
        ),
        None => (
            LexCandidate {
                iri: fallback_iri.to_string(),
                label: fallback_label.to_string(),
                match_type,
                score_lex: SYNONYM_SCORE - UNRESOLVED_PENALTY,
                iri_source: IriSource::AliasOnly,
            },
            Priority::Unresolved,
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        distance::ExactDistance,
        lexicon::{Lexicon, OntologyConcept},
    };

    fn concept(iri: &str, label: &str, synonyms: &[&str]) -> OntologyConcept {
        OntologyConcept {
            iri: iri.into(),
            label: label.into(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn build(concepts: Vec<OntologyConcept>, dictionaries: &Dictionaries) -> Gazetteer {
        let distance: Arc<dyn EditDistance> = Arc::new(ExactDistance);
        let resolver = AliasResolver::new(Arc::new(Lexicon::new(concepts)), distance.clone());
        Gazetteer::build(&resolver, dictionaries, distance, &LinkerConfig::default())
    }

    #[test]
    fn ontology_labels_and_synonyms_with_short_and_numeric_skipped() {
        let gaz = build(
            vec![
                concept("OHD:1", "Dental Implant", &["fixture", "DI"]),
                concept("OHD:2", "36", &[]),
            ],
            &Dictionaries::default(),
        );

        let label = &gaz.lookup("dental implant").unwrap().candidate;
        assert_eq!(label.match_type, MatchType::Label);
        assert_eq!(label.score_lex, 1.0);
        assert_eq!(label.iri_source, IriSource::OhdLabel);

        let synonym = &gaz.lookup("fixture").unwrap().candidate;
        assert_eq!(synonym.match_type, MatchType::Synonym);
        assert_eq!(synonym.score_lex, 0.9);
        assert_eq!(synonym.label, "Dental Implant");

        assert!(gaz.lookup("di").is_none());
        assert!(gaz.lookup("36").is_none());
    }

    #[test]
    fn curated_variant_resolves_to_ontology_label() {
        let gaz = build(
            vec![concept("OHD:77", "multi-unit abutment", &[])],
            &Dictionaries::default(),
        );

        let entry = gaz.lookup("מולטיוניט").unwrap();
        assert_eq!(entry.candidate.iri, "OHD:77");
        assert_eq!(entry.candidate.iri_source, IriSource::OhdLabel);
        assert_eq!(entry.priority, Priority::Resolved);
        assert_eq!(gaz.hint_for("מולטיוניט"), Some("device_hint"));
    }

    #[test]
    fn unresolved_curated_variant_is_placeholder() {
        let gaz = build(vec![], &Dictionaries::default());
        let entry = gaz.lookup("שתל").unwrap();

        assert_eq!(entry.candidate.iri, "IMPLANT:שתל");
        assert_eq!(entry.candidate.iri_source, IriSource::Placeholder);
        assert_eq!(entry.priority, Priority::Unresolved);
    }

    #[test]
    fn curated_typo_is_a_fuzzy_entry() {
        let gaz = build(vec![], &Dictionaries::default());
        let entry = gaz.lookup("שלת").unwrap();

        assert_eq!(entry.candidate.match_type, MatchType::Fuzzy);
        assert!((0.70..=0.85).contains(&entry.candidate.score_lex));
        assert_eq!(entry.normalized_surface.as_deref(), Some("שתל"));
    }

    #[test]
    fn unresolved_aliases_are_penalized() {
        let dictionaries = Dictionaries {
            en_alias_to_iri: BTreeMap::from([(
                "healing cap".to_string(),
                "OHD:missing".to_string(),
            )]),
            he2en: BTreeMap::from([(
                "כתר".to_string(),
                vec!["crown".to_string()],
            )]),
            ..Dictionaries::default()
        };
        let gaz = build(vec![], &dictionaries);

        let alias = &gaz.lookup("healing cap").unwrap().candidate;
        assert_eq!(alias.iri, "OHD:missing");
        assert_eq!(alias.iri_source, IriSource::AliasOnly);
        assert!((alias.score_lex - 0.7).abs() < 1e-9);

        let he = &gaz.lookup("כתר").unwrap().candidate;
        assert_eq!(he.iri, "HE2EN:כתר");
        assert_eq!(he.match_type, MatchType::HeEnAlias);
        assert_eq!(he.label, "crown");
    }

    #[test]
    fn he2en_entry_resolves_through_lexicon() {
        let dictionaries = Dictionaries {
            he2en: BTreeMap::from([(
                "כתר".to_string(),
                vec!["crown".to_string()],
            )]),
            ..Dictionaries::default()
        };
        let gaz = build(vec![concept("OHD:5", "crown", &[])], &dictionaries);

        let he = &gaz.lookup("כתר").unwrap().candidate;
        assert_eq!(he.iri, "OHD:5");
        assert_eq!(he.iri_source, IriSource::OhdLabel);
        assert_eq!(he.score_lex, 0.9);
    }

    #[test]
    fn he2en_english_forms_are_indexed() {
        let dictionaries = Dictionaries {
            he2en: BTreeMap::from([
                ("כתר".to_string(), vec!["crown".to_string()]),
                (
                    "מברשת".to_string(),
                    vec!["interdental brush".to_string()],
                ),
            ]),
            ..Dictionaries::default()
        };
        let gaz = build(vec![concept("OHD:5", "crown", &[])], &dictionaries);

        let brush = &gaz.lookup("interdental brush").unwrap().candidate;
        assert_eq!(brush.iri, "HE2EN:מברשת");
        assert_eq!(brush.label, "interdental brush");
        assert_eq!(brush.match_type, MatchType::HeEnAlias);
        assert!(brush.iri_source.is_unresolved());
        assert!((brush.score_lex - 0.7).abs() < 1e-9);

        // The ontology label keeps its own surface.
        let crown = &gaz.lookup("crown").unwrap().candidate;
        assert_eq!(crown.iri, "OHD:5");
        assert_eq!(crown.match_type, MatchType::Label);
        assert_eq!(crown.score_lex, 1.0);
    }

    #[test]
    fn collisions_keep_higher_priority() {
        let dictionaries = Dictionaries {
            brand_names: BTreeMap::from([(
                "Straumann".to_string(),
                vec!["fixture".to_string()],
            )]),
            en_alias_to_iri: BTreeMap::from([(
                "implant".to_string(),
                "OHD:9".to_string(),
            )]),
            ..Dictionaries::default()
        };
        let gaz = build(
            vec![
                concept("OHD:1", "dental implant", &["fixture", "implant"]),
                concept("OHD:9", "endosseous implant", &[]),
            ],
            &dictionaries,
        );

        // Ontology synonym inserted first; brand alias ties and loses.
        assert_eq!(gaz.lookup("fixture").unwrap().candidate.iri, "OHD:1");
        // Resolved alias bridge outranks the ontology synonym.
        let implant = gaz.lookup("implant").unwrap();
        assert_eq!(implant.candidate.iri, "OHD:9");
        assert_eq!(implant.candidate.iri_source, IriSource::AliasMap);
    }

    #[test]
    fn fuzzy_lookup_respects_threshold_and_length() {
        let gaz = build(
            vec![concept("OHD:3", "עששת", &[]), concept("OHD:4", "abutment", &[])],
            &Dictionaries::default(),
        );

        let (key, similarity) = gaz.fuzzy("עשת", true).unwrap();
        assert_eq!(key, "עששת");
        assert!((similarity - 0.75).abs() < 1e-9);

        assert!(gaz.fuzzy("abutmen", true).is_none());
        assert_eq!(gaz.fuzzy("abutmen", false).unwrap().0, "abutment");
        assert!(gaz.fuzzy("של", true).is_none());
    }

    #[test]
    fn phonetic_lookup_matches_consonant_skeleton() {
        let gaz = build(
            vec![concept("OHD:4", "abutment", &[])],
            &Dictionaries::default(),
        );
        assert_eq!(gaz.phonetic("abuttmant"), Some("abutment"));
        assert_eq!(gaz.phonetic("abt"), None);
    }

    #[test]
    fn band_score_interpolates() {
        assert_eq!(band_score(FUZZY_BAND, 0.0), 0.70);
        assert_eq!(band_score(FUZZY_BAND, 1.0), 0.85);
        assert!((band_score(SHORT_FUZZY_BAND, 0.5) - 0.765).abs() < 1e-9);
    }
}
