//! dentlink - normalization and entity linking for dental clinical notes.
//!
//! Each free-text note line goes through two blocks:
//!
//! - **Block1** canonicalizes the text ([`normalize`]), splits it into typed
//!   tokens ([`tokenize`]) and, when a refine collaborator is configured,
//!   validates and applies its suggested token edits ([`validate`],
//!   [`apply`]).
//! - **Block2** finds ontology concepts in the edited tokens with a
//!   gazetteer ([`gazetteer`], [`matcher`]) and an optional vector store
//!   ([`vector`]), then fuses both into ranked mentions ([`ranker`]).
//!
//! # Quick start
//!
//! ```no_run
//! use dentlink::{DataDir, Linker};
//! use dentlink::pipeline::{InputLine, LinkOptions};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let linker = Linker::open(&data_dir, LinkOptions::default()).unwrap();
//!
//! let lines = vec![InputLine::from("מולטיוניט 17° בגובה 2 מ\"מ")];
//! for record in linker.annotate_batch(&lines) {
//!     for mention in &record.mentions {
//!         let top = &mention.candidates[0];
//!         println!("{} -> {} ({:.2})", mention.surface, top.iri, top.score_final);
//!     }
//! }
//! ```
//!
//! Block1 alone needs no resources:
//!
//! ```
//! use dentlink::{normalize::normalize, tokenize::tokenize};
//!
//! let normalized = normalize("קידוח 2 מ\"מ");
//! assert_eq!(normalized.normalized_text, "קידוח 2 mm");
//! assert_eq!(tokenize(&normalized).len(), 3);
//! ```

pub mod alias;
pub mod apply;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod distance;
pub mod embedding;
pub mod embedding_db;
pub mod error;
pub mod gazetteer;
pub mod lexicon;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod ranker;
pub mod refine;
pub mod schema;
pub mod text_util;
pub mod tokenize;
pub mod validate;
pub mod vector;

pub use config::LinkerConfig;
pub use data_dir::DataDir;
pub use embedding_db::EmbeddingDb;
pub use error::{Error, Result};
pub use gazetteer::Gazetteer;
pub use lexicon::{Dictionaries, Lexicon};
pub use pipeline::{LineRecord, Linker};
