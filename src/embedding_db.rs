use std::path::Path;

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{error::Result, vector::MemoryIndex};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");

const CONCEPTS: TableDefinition<u64, &str> = TableDefinition::new("concepts");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// The concept a stored vector row points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRef {
    pub iri: String,
    pub label: String,
}

/// Stores one embedding vector per lexicon row, plus the concept the row
/// was built from.
///
/// Binary format per vector entry:
/// - 4 bytes: embedding dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
pub struct EmbeddingDb {
    db: Database,
}

impl EmbeddingDb {
    /// Open or create a vector database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use dentlink::EmbeddingDb;
    ///
    /// let db = EmbeddingDb::open(&tmp.path().join("vectors.redb")).unwrap();
    /// assert_eq!(db.len().unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(CONCEPTS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store vectors and their concepts in a single transaction.
    pub fn batch_store(
        &self,
        entries: &[(u64, ConceptRef, Vec<f32>)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut concepts = txn.open_table(CONCEPTS)?;
            for (row, concept, data) in entries {
                let byte_len = HEADER_SIZE + std::mem::size_of_val(data.as_slice());
                let mut guard = vectors.insert_reserve(*row, byte_len)?;
                let dest = guard.as_mut();

                dest[0..4].copy_from_slice(&(data.len() as u32).to_le_bytes());
                dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(data));
                drop(guard);

                let meta = serde_json::to_string(concept)?;
                concepts.insert(*row, meta.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every stored row.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(CONCEPTS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(CONCEPTS)?;
        txn.commit()?;
        Ok(())
    }

    /// Read every row into an in-memory nearest-neighbor index.
    ///
    /// Rows with a corrupt vector or missing concept are skipped.
    pub fn load_index(&self) -> Result<MemoryIndex> {
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let concepts = txn.open_table(CONCEPTS)?;

        let mut index = MemoryIndex::default();
        for entry in vectors.iter()? {
            let (key, value) = entry?;
            let row = key.value();
            let Some(vector) = decode_vector(value.value()) else {
                continue;
            };
            let concept = concepts
                .get(row)?
                .and_then(|g| serde_json::from_str::<ConceptRef>(g.value()).ok());
            let Some(concept) = concept else {
                continue;
            };
            index.insert(row, concept, vector);
        }
        Ok(index)
    }
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let dimension = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as usize;
    if bytes.len() != HEADER_SIZE + dimension * 4 {
        return None;
    }
    // The value slice is not guaranteed to be 4-byte aligned.
    let data = bytes[HEADER_SIZE..]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Some(data)
}
