//! Matching and ranking configuration.
//!
//! Values come from defaults, then an optional `config.json` in the data
//! directory, then `DENTLINK_*` environment variables.

use std::{path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "DENTLINK_";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EditDistanceKind {
    /// Damerau-Levenshtein distance.
    #[default]
    Exact,
    /// Positional mismatches plus length difference.
    Cheap,
}

impl FromStr for EditDistanceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "cheap" => Ok(Self::Cheap),
            other => Err(Error::Config(format!(
                "unknown edit distance strategy '{other}' (expected exact or cheap)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub topk_vec: usize,
    pub topk_final: usize,
    pub w_lex: f64,
    pub w_vec: f64,
    pub w_prior: f64,
    /// Reserved for a context-boost signal; not used in scoring.
    pub w_ctx: f64,
    pub alias_penalty: f64,
    pub lex_fuzzy_max_ed: usize,
    pub ngram_max: usize,
    pub embedding_cache_size: usize,
    pub edit_distance: EditDistanceKind,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            topk_vec: 10,
            topk_final: 5,
            w_lex: 0.6,
            w_vec: 0.3,
            w_prior: 0.06,
            w_ctx: 0.04,
            alias_penalty: 0.08,
            lex_fuzzy_max_ed: 1,
            ngram_max: 5,
            embedding_cache_size: 256,
            edit_distance: EditDistanceKind::Exact,
        }
    }
}

impl LinkerConfig {
    /// Defaults overlaid with `path` (when it exists) and the process
    /// environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("invalid {}: {e}", path.display()))
        })
    }

    /// Overlay `DENTLINK_<FIELD>` variables resolved through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        fn set<T: FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            field: &str,
            slot: &mut T,
        ) -> Result<()> {
            let name = format!("{ENV_PREFIX}{}", field.to_ascii_uppercase());
            if let Some(raw) = lookup(&name) {
                *slot = raw.trim().parse().map_err(|_| {
                    Error::Config(format!("invalid value for {name}: {raw}"))
                })?;
            }
            Ok(())
        }

        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;
        set(lookup, "topk_vec", &mut self.topk_vec)?;
        set(lookup, "topk_final", &mut self.topk_final)?;
        set(lookup, "w_lex", &mut self.w_lex)?;
        set(lookup, "w_vec", &mut self.w_vec)?;
        set(lookup, "w_prior", &mut self.w_prior)?;
        set(lookup, "w_ctx", &mut self.w_ctx)?;
        set(lookup, "alias_penalty", &mut self.alias_penalty)?;
        set(lookup, "lex_fuzzy_max_ed", &mut self.lex_fuzzy_max_ed)?;
        set(lookup, "ngram_max", &mut self.ngram_max)?;
        set(lookup, "embedding_cache_size", &mut self.embedding_cache_size)?;
        set(lookup, "edit_distance", &mut self.edit_distance)?;
        Ok(())
    }

    pub fn check(&self) -> Result<()> {
        let weights = [self.w_lex, self.w_vec, self.w_prior, self.w_ctx];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config(
                "ranking weights must be finite and non-negative".into(),
            ));
        }
        if self.topk_final == 0 || self.ngram_max == 0 {
            return Err(Error::Config(
                "topk_final and ngram_max must be at least 1".into(),
            ));
        }
        if self.embedding_cache_size == 0 {
            return Err(Error::Config(
                "embedding_cache_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
