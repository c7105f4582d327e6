use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Metadata stored next to each chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub file_id: String,
    pub chunk_id: String,
}

/// A vector to upsert, keyed by chunk id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A nearest-neighbour result. `distance` is cosine distance, `1 - cos`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub distance: f32,
}

/// Live handle to an open collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    name: String,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Named collections of embedding vectors.
pub trait VectorStore: Send + Sync {
    /// Create a new, empty collection. Fails if `name` is taken.
    fn create_collection(&self, name: &str) -> Result<CollectionHandle>;

    /// Reopen an existing collection, e.g. after a restart.
    fn open_collection(&self, name: &str) -> Result<CollectionHandle>;

    fn upsert(&self, handle: &CollectionHandle, records: Vec<VectorRecord>) -> Result<()>;

    /// The `k` nearest records by cosine distance, closest first.
    fn query(&self, handle: &CollectionHandle, vector: &[f32], k: usize)
        -> Result<Vec<VectorMatch>>;

    /// Drop a collection. A missing collection is not an error.
    fn delete_collection(&self, name: &str) -> Result<()>;
}

/// In-memory vector store with optional per-collection disk persistence.
pub struct LocalVectorStore {
    collections: RwLock<HashMap<String, Vec<VectorRecord>>>,
    persist_dir: Option<PathBuf>,
}

impl LocalVectorStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            persist_dir: None,
        }
    }

    /// A store persisting each collection as `<vector_dir>/<name>.json`.
    pub fn open_or_create(vector_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)
            .with_context(|| format!("Failed to create {}", vector_dir.display()))?;
        Ok(Self {
            collections: RwLock::new(HashMap::new()),
            persist_dir: Some(vector_dir.to_path_buf()),
        })
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn entry_count(&self, name: &str) -> usize {
        self.collections.read().get(name).map_or(0, Vec::len)
    }

    /// Names of the collections saved under the persistence directory,
    /// including ones not opened in this process.
    pub fn persisted_collection_names(&self) -> Vec<String> {
        let Some(dir) = &self.persist_dir else {
            return Vec::new();
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot list {}: {e}", dir.display());
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name().into_string().ok()?;
                let name = file_name.strip_suffix(".json")?;
                validate_collection_name(name).ok()?;
                Some(name.to_string())
            })
            .collect();
        names.sort();
        names
    }

    fn collection_path(&self, name: &str) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{name}.json")))
    }

    fn persist(&self, name: &str, records: &[VectorRecord]) -> Result<()> {
        let Some(path) = self.collection_path(name) else {
            return Ok(());
        };
        let data = serde_json::to_string(records)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to persist collection {name}"))?;
        Ok(())
    }
}

impl VectorStore for LocalVectorStore {
    fn create_collection(&self, name: &str) -> Result<CollectionHandle> {
        validate_collection_name(name)?;
        let mut collections = self.collections.write();
        let on_disk = self.collection_path(name).is_some_and(|p| p.exists());
        if collections.contains_key(name) || on_disk {
            anyhow::bail!("Collection already exists: {name}");
        }
        collections.insert(name.to_string(), Vec::new());
        self.persist(name, &[])?;
        Ok(CollectionHandle {
            name: name.to_string(),
        })
    }

    fn open_collection(&self, name: &str) -> Result<CollectionHandle> {
        validate_collection_name(name)?;
        if self.collections.read().contains_key(name) {
            return Ok(CollectionHandle {
                name: name.to_string(),
            });
        }

        let path = self
            .collection_path(name)
            .filter(|p| p.exists())
            .with_context(|| format!("Collection not found: {name}"))?;
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read collection {name}"))?;
        let records: Vec<VectorRecord> = serde_json::from_str(&data)
            .with_context(|| format!("Corrupt collection file {}", path.display()))?;

        self.collections
            .write()
            .entry(name.to_string())
            .or_insert(records);
        Ok(CollectionHandle {
            name: name.to_string(),
        })
    }

    fn upsert(&self, handle: &CollectionHandle, records: Vec<VectorRecord>) -> Result<()> {
        let mut collections = self.collections.write();
        let entries = collections
            .get_mut(handle.name())
            .with_context(|| format!("Collection not found: {}", handle.name()))?;

        let dim = entries
            .first()
            .or(records.first())
            .map(|r| r.embedding.len());
        if let Some(dim) = dim {
            if let Some(bad) = records.iter().find(|r| r.embedding.len() != dim) {
                anyhow::bail!(
                    "Vector for {} has dimension {}, collection expects {dim}",
                    bad.id,
                    bad.embedding.len()
                );
            }
        }

        let mut slots: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        for record in records {
            match slots.get(&record.id) {
                Some(&slot) => entries[slot] = record,
                None => {
                    slots.insert(record.id.clone(), entries.len());
                    entries.push(record);
                }
            }
        }

        let snapshot = entries.clone();
        drop(collections);
        self.persist(handle.name(), &snapshot)
    }

    fn query(
        &self,
        handle: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let collections = self.collections.read();
        let entries = collections
            .get(handle.name())
            .with_context(|| format!("Collection not found: {}", handle.name()))?;

        let mut scored: Vec<VectorMatch> = entries
            .iter()
            .map(|e| VectorMatch {
                id: e.id.clone(),
                distance: 1.0 - cosine_similarity(vector, &e.embedding),
            })
            .collect();

        // Sort ascending by distance, stable on insertion order; NaN goes last
        let key = |m: &VectorMatch| {
            if m.distance.is_nan() {
                f32::INFINITY
            } else {
                m.distance
            }
        };
        scored.sort_by(|a, b| {
            key(a)
                .partial_cmp(&key(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn delete_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        self.collections.write().remove(name);
        if let Some(path) = self.collection_path(name) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to delete collection {name}"))
                }
            }
        }
        Ok(())
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        anyhow::bail!("Invalid collection name: {name:?}");
    }
    Ok(())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
