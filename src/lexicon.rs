//! Static dictionaries: the ontology lexicon and the flat JSON tables that
//! feed the gazetteer and the validator.

use std::{
    collections::BTreeMap,
    io::{BufRead, BufReader},
    path::Path,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    validate::ToothGroupTable,
};

/// One ontology concept as extracted from the OWL source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyConcept {
    pub iri: String,
    pub label: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    concepts: Vec<OntologyConcept>,
}

impl Lexicon {
    pub fn new(concepts: Vec<OntologyConcept>) -> Self {
        Self { concepts }
    }

    /// Load a JSON-Lines lexicon. Blank and malformed lines are skipped;
    /// a missing file yields an empty lexicon.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "lexicon not found");
            return Ok(Self::default());
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut concepts = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OntologyConcept>(&line) {
                Ok(concept) => concepts.push(concept),
                Err(e) => tracing::warn!(
                    line = line_no + 1,
                    error = %e,
                    "skipping malformed lexicon record"
                ),
            }
        }
        Ok(Self { concepts })
    }

    pub fn concepts(&self) -> &[OntologyConcept] {
        &self.concepts
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dictionaries {
    /// Clinic abbreviation to its expansion.
    pub abbreviations: BTreeMap<String, String>,
    /// Brand name to alternative spellings.
    pub brand_names: BTreeMap<String, Vec<String>>,
    /// Manual English alias to ontology IRI bridge.
    pub en_alias_to_iri: BTreeMap<String, String>,
    /// Hebrew term to English phrases.
    pub he2en: BTreeMap<String, Vec<String>>,
    pub tooth_groups: ToothGroupTable,
}

impl Dictionaries {
    pub fn load(data_dir: &DataDir) -> Result<Self> {
        Ok(Self {
            abbreviations: load_table(
                &data_dir.dictionary("clinic_abbreviations"),
            )?,
            brand_names: load_table(&data_dir.dictionary("brand_names"))?,
            en_alias_to_iri: load_table(
                &data_dir.dictionary("en_alias_to_iri"),
            )?,
            he2en: load_table(&data_dir.dictionary("he2en_static"))?,
            tooth_groups: load_table(&data_dir.dictionary("tooth_groups"))?,
        })
    }
}

/// Read one JSON table; absent files load as empty with a warning.
fn load_table<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "dictionary not found");
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::Config(format!("invalid dictionary {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicon_skips_blank_and_malformed_lines() {
        let jsonl = concat!(
            r#"{"iri": "OHD:1", "label": "dental implant", "synonyms": ["fixture"]}"#,
            "\n\n",
            "not json\n",
            r#"{"iri": "OHD:2", "label": "zirconia"}"#,
            "\n",
        );
        let lexicon = Lexicon::from_reader(jsonl.as_bytes()).unwrap();

        assert_eq!(lexicon.len(), 2);
        assert_eq!(lexicon.concepts()[0].synonyms, ["fixture"]);
        assert!(lexicon.concepts()[1].synonyms.is_empty());
        assert_eq!(lexicon.concepts()[1].label, "zirconia");
    }

    #[test]
    fn missing_dictionaries_load_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let dicts = Dictionaries::load(&dir).unwrap();

        assert!(dicts.abbreviations.is_empty());
        assert!(dicts.tooth_groups.is_empty());
        assert!(Lexicon::load(&dir.lexicon()).unwrap().is_empty());
    }

    #[test]
    fn malformed_dictionary_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();
        std::fs::create_dir_all(dir.dictionaries_dir()).unwrap();
        std::fs::write(dir.dictionary("brand_names"), "[1, 2]").unwrap();

        let err = Dictionaries::load(&dir).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
