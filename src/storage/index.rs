use crate::core::config::Config;
use crate::core::error::{Error, Result};
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Position → image path
const PATHS_TABLE: TableDefinition<u64, &str> = TableDefinition::new("paths");

/// Position → embedding, little-endian f32
const VECTORS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");

/// Key → JSON serialized metadata
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

const META_INDEX_KEY: &str = "index";

/// Describes the last successful index build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub total_images: usize,
    pub library_root: String,
    pub embedding_dim: usize,
    /// Embedding model that produced the vectors
    #[serde(default)]
    pub model_id: Option<String>,
    /// Unix timestamp of the build
    #[serde(default)]
    pub indexed_at: Option<u64>,
}

impl IndexMetadata {
    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Database(format!("Failed to serialize index metadata: {}", e)))
    }

    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Database(format!("Failed to deserialize index metadata: {}", e)))
    }
}

/// A complete persisted index as read in a single transaction
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub vectors: Vec<Vec<f32>>,
    pub paths: Vec<String>,
    pub metadata: IndexMetadata,
}

/// Durable store for the `(vectors, paths, metadata)` triple.
///
/// All three artifacts live in one redb file. `save` writes them inside a
/// single write transaction, so the commit publishes the whole set at once
/// and readers (each on its own read transaction) see either the previous
/// index or the new one, never a mix.
pub struct IndexStore {
    db: Database,
}

impl IndexStore {
    /// Open or create the index store at the configured location
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.index_path)
    }

    /// Open or create the index store at an explicit path
    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if path.exists() {
            Database::open(path).map_err(|e| {
                let msg = e.to_string();
                if msg.to_lowercase().contains("lock") {
                    Error::Database("Index database is locked. Another photo-search process may be running. Close other instances and try again.".to_string())
                } else {
                    Error::Database(format!("Failed to open index database: {}", e))
                }
            })?
        } else {
            Database::create(path)
                .map_err(|e| Error::Database(format!("Failed to create index database: {}", e)))?
        };

        Ok(Self { db })
    }

    /// True iff every vector has a path and vice versa
    pub fn is_consistent(vectors: &[Vec<f32>], paths: &[String]) -> bool {
        vectors.len() == paths.len()
    }

    /// Load the full index. Fails with `IndexMissing` if any artifact is absent
    /// and with `IndexInconsistent` if vectors and paths do not pair up.
    pub fn load(&self) -> Result<IndexSnapshot> {
        let read_txn = self.begin_read()?;
        let metadata = Self::read_metadata(&read_txn)?;
        let paths = Self::read_paths(&read_txn)?;
        let vectors = Self::read_vectors(&read_txn)?;

        debug!("Loaded index: {} vectors, {} paths", vectors.len(), paths.len());

        if !Self::is_consistent(&vectors, &paths) {
            return Err(Error::IndexInconsistent {
                vectors: vectors.len(),
                paths: paths.len(),
            });
        }

        Ok(IndexSnapshot {
            vectors,
            paths,
            metadata,
        })
    }

    /// Load only the ordered path list
    pub fn load_paths(&self) -> Result<Vec<String>> {
        let read_txn = self.begin_read()?;
        // Metadata marks a complete build; without it the index counts as missing.
        Self::read_metadata(&read_txn)?;
        Self::read_paths(&read_txn)
    }

    /// Load only the metadata record
    pub fn load_metadata(&self) -> Result<IndexMetadata> {
        let read_txn = self.begin_read()?;
        Self::read_metadata(&read_txn)
    }

    /// Replace the persisted index with a new one in a single transaction.
    pub fn save(&self, vectors: &[Vec<f32>], paths: &[String], metadata: &IndexMetadata) -> Result<()> {
        if !Self::is_consistent(vectors, paths) {
            return Err(Error::IndexInconsistent {
                vectors: vectors.len(),
                paths: paths.len(),
            });
        }

        let write_txn = self.db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;

        {
            Self::drop_tables(&write_txn)?;

            let mut path_table = write_txn.open_table(PATHS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open paths table: {}", e))
            })?;
            for (i, path) in paths.iter().enumerate() {
                path_table.insert(i as u64, path.as_str()).map_err(|e| {
                    Error::Database(format!("Failed to insert path: {}", e))
                })?;
            }

            let mut vector_table = write_txn.open_table(VECTORS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open vectors table: {}", e))
            })?;
            for (i, vector) in vectors.iter().enumerate() {
                let bytes = encode_vector(vector);
                vector_table.insert(i as u64, bytes.as_slice()).map_err(|e| {
                    Error::Database(format!("Failed to insert vector: {}", e))
                })?;
            }

            let mut meta_table = write_txn.open_table(META_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open meta table: {}", e))
            })?;
            let json = metadata.to_json()?;
            meta_table.insert(META_INDEX_KEY, json.as_str()).map_err(|e| {
                Error::Database(format!("Failed to insert metadata: {}", e))
            })?;
        }

        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        debug!("Saved index: {} images", paths.len());
        Ok(())
    }

    /// Remove every persisted artifact
    pub fn clear(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;
        Self::drop_tables(&write_txn)?;
        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    /// Delete one stored vector behind the store's back, leaving the pairs mismatched
    #[cfg(test)]
    pub(crate) fn corrupt_remove_vector(&self, key: u64) {
        let write_txn = self.db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(VECTORS_TABLE).unwrap();
            table.remove(key).unwrap();
        }
        write_txn.commit().unwrap();
    }

    fn begin_read(&self) -> Result<ReadTransaction> {
        self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })
    }

    fn drop_tables(write_txn: &redb::WriteTransaction) -> Result<()> {
        write_txn.delete_table(PATHS_TABLE).map_err(|e| {
            Error::Database(format!("Failed to delete paths table: {}", e))
        })?;
        write_txn.delete_table(VECTORS_TABLE).map_err(|e| {
            Error::Database(format!("Failed to delete vectors table: {}", e))
        })?;
        write_txn.delete_table(META_TABLE).map_err(|e| {
            Error::Database(format!("Failed to delete meta table: {}", e))
        })?;
        Ok(())
    }

    fn read_metadata(read_txn: &ReadTransaction) -> Result<IndexMetadata> {
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Err(Error::IndexMissing),
            Err(e) => return Err(Error::Database(format!("Failed to open meta table: {}", e))),
        };

        let json = match table.get(META_INDEX_KEY).map_err(|e| {
            Error::Database(format!("Failed to get metadata: {}", e))
        })? {
            Some(guard) => guard.value().to_string(),
            None => return Err(Error::IndexMissing),
        };

        IndexMetadata::from_json(&json)
    }

    fn read_paths(read_txn: &ReadTransaction) -> Result<Vec<String>> {
        let table = match read_txn.open_table(PATHS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Err(Error::IndexMissing),
            Err(e) => return Err(Error::Database(format!("Failed to open paths table: {}", e))),
        };

        let mut paths = Vec::new();
        for item in table.iter().map_err(|e| {
            Error::Database(format!("Failed to iterate paths table: {}", e))
        })? {
            let (_key, value) = item.map_err(|e| {
                Error::Database(format!("Failed to read path: {}", e))
            })?;
            paths.push(value.value().to_string());
        }
        Ok(paths)
    }

    fn read_vectors(read_txn: &ReadTransaction) -> Result<Vec<Vec<f32>>> {
        let table = match read_txn.open_table(VECTORS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Err(Error::IndexMissing),
            Err(e) => return Err(Error::Database(format!("Failed to open vectors table: {}", e))),
        };

        let mut vectors = Vec::new();
        for item in table.iter().map_err(|e| {
            Error::Database(format!("Failed to iterate vectors table: {}", e))
        })? {
            let (_key, value) = item.map_err(|e| {
                Error::Database(format!("Failed to read vector: {}", e))
            })?;
            vectors.push(decode_vector(value.value())?);
        }
        Ok(vectors)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Database(format!(
            "Corrupt vector record of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
