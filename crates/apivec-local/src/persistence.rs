//! On-disk layout of the local index.
//!
//! Three artifacts live in the index directory:
//!
//! - `index.bin`: the rkyv-encoded [`FlatIndex`]
//! - `metadata.json`: `id -> Document`
//! - `mappings.json`: id/position mappings, the fuzzy name cache, the vector
//!   count and a blake3 checksum of `index.bin`
//!
//! Each file is written to a temporary sibling and renamed into place;
//! `mappings.json` is written last. An index resumes from disk only when
//! all three exist and agree with each other.

use apivec_core::fuzzy::NameEntry;
use apivec_core::{Document, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::index::FlatIndex;

/// Vector index file name.
pub const INDEX_FILE: &str = "index.bin";
/// Document metadata file name.
pub const METADATA_FILE: &str = "metadata.json";
/// Mappings file name.
pub const MAPPINGS_FILE: &str = "mappings.json";

/// Id/position mappings and cached names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMappings {
    /// Vector dimension.
    pub dimension: usize,
    /// Number of vectors in `index.bin`.
    pub vector_count: usize,
    /// Document id for each index position.
    pub position_to_id: Vec<String>,
    /// Index position for each document id.
    pub id_to_position: HashMap<String, usize>,
    /// Fuzzy-match name cache.
    pub names: Vec<NameEntry>,
    /// blake3 hex digest of `index.bin`.
    pub index_checksum: String,
    /// Last write, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Everything the local backend keeps in memory.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    /// The vectors.
    pub index: FlatIndex,
    /// Documents by id.
    pub documents: HashMap<String, Document>,
    /// Mappings and name cache.
    pub mappings: IndexMappings,
}

impl IndexSnapshot {
    /// An empty snapshot.
    pub fn empty(dimension: usize) -> Self {
        Self {
            index: FlatIndex::new(dimension),
            documents: HashMap::new(),
            mappings: IndexMappings {
                dimension,
                ..IndexMappings::default()
            },
        }
    }
}

/// Serialized artifacts ready to be written.
#[derive(Debug)]
pub struct EncodedSnapshot {
    index: Vec<u8>,
    metadata: Vec<u8>,
    mappings: Vec<u8>,
}

/// Serialize a snapshot, stamping the index checksum into the mappings.
pub fn encode_snapshot(snapshot: &IndexSnapshot) -> Result<EncodedSnapshot> {
    let index = snapshot.index.to_bytes()?;
    let mut mappings = snapshot.mappings.clone();
    mappings.index_checksum = blake3::hash(&index).to_hex().to_string();
    mappings.vector_count = snapshot.index.len();

    let ordered: BTreeMap<&String, &Document> = snapshot.documents.iter().collect();
    Ok(EncodedSnapshot {
        index,
        metadata: serde_json::to_vec_pretty(&ordered)?,
        mappings: serde_json::to_vec_pretty(&mappings)?,
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| Error::io_with_path(e, &tmp))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io_with_path(e, path))
}

/// Write encoded artifacts into `dir`. Blocking.
pub fn write_snapshot(dir: &Path, encoded: &EncodedSnapshot) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io_with_path(e, dir))?;
    write_atomic(&dir.join(INDEX_FILE), &encoded.index)?;
    write_atomic(&dir.join(METADATA_FILE), &encoded.metadata)?;
    write_atomic(&dir.join(MAPPINGS_FILE), &encoded.mappings)?;
    Ok(())
}

/// Whether all three artifacts exist in `dir`.
pub fn artifacts_present(dir: &Path) -> bool {
    [INDEX_FILE, METADATA_FILE, MAPPINGS_FILE]
        .iter()
        .all(|f| dir.join(f).is_file())
}

/// Load a snapshot from `dir`. Blocking.
///
/// Returns `Ok(None)` when any artifact is missing and an error when the
/// artifacts exist but disagree.
pub fn load_snapshot(dir: &Path, dimension: usize) -> Result<Option<IndexSnapshot>> {
    if !artifacts_present(dir) {
        return Ok(None);
    }

    let read = |name: &str| {
        let path = dir.join(name);
        std::fs::read(&path).map_err(|e| Error::io_with_path(e, &path))
    };
    let index_bytes = read(INDEX_FILE)?;
    let documents: HashMap<String, Document> = serde_json::from_slice(&read(METADATA_FILE)?)?;
    let mappings: IndexMappings = serde_json::from_slice(&read(MAPPINGS_FILE)?)?;

    let checksum = blake3::hash(&index_bytes).to_hex().to_string();
    if checksum != mappings.index_checksum {
        return Err(Error::operation("index.bin checksum does not match mappings"));
    }
    let index = FlatIndex::from_bytes(&index_bytes)?;

    let snapshot = IndexSnapshot {
        index,
        documents,
        mappings,
    };
    verify(&snapshot, dimension)?;
    Ok(Some(snapshot))
}

fn verify(snapshot: &IndexSnapshot, dimension: usize) -> Result<()> {
    let IndexSnapshot {
        index,
        documents,
        mappings,
    } = snapshot;

    if index.dimension() != dimension || mappings.dimension != dimension {
        return Err(Error::operation(format!(
            "persisted dimension {} does not match configured {dimension}",
            index.dimension()
        )));
    }
    let n = index.len();
    if mappings.vector_count != n
        || mappings.position_to_id.len() != n
        || mappings.id_to_position.len() != n
        || documents.len() != n
    {
        return Err(Error::operation(format!(
            "artifact sizes disagree: {n} vectors, {} positions, {} ids, {} documents",
            mappings.position_to_id.len(),
            mappings.id_to_position.len(),
            documents.len()
        )));
    }
    for (position, id) in mappings.position_to_id.iter().enumerate() {
        if mappings.id_to_position.get(id) != Some(&position) || !documents.contains_key(id) {
            return Err(Error::operation(format!("mapping for '{id}' is inconsistent")));
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
