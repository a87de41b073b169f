//! Flat inner-product vector index.
//!
//! Vectors are stored row-major in one contiguous buffer and searched by an
//! exhaustive dot-product scan. With unit-length inputs the inner product is
//! the cosine similarity.

use apivec_core::{Error, Result};

/// Exhaustive inner-product index over fixed-dimension vectors.
#[derive(Debug, Clone, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct FlatIndex {
    dimension: u32,
    data: Vec<f32>,
}

impl FlatIndex {
    /// An empty index.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension as u32,
            data: Vec::new(),
        }
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension as usize
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        match self.dimension() {
            0 => 0,
            d => self.data.len() / d,
        }
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension() {
            return Err(Error::operation(format!(
                "vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension()
            )));
        }
        Ok(())
    }

    /// Append a vector; returns its position.
    pub fn push(&mut self, vector: &[f32]) -> Result<usize> {
        self.check(vector)?;
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// Overwrite the vector at `position`.
    pub fn set(&mut self, position: usize, vector: &[f32]) -> Result<()> {
        self.check(vector)?;
        let d = self.dimension();
        let row = self
            .data
            .get_mut(position * d..(position + 1) * d)
            .ok_or_else(|| Error::operation(format!("no vector at position {position}")))?;
        row.copy_from_slice(vector);
        Ok(())
    }

    /// The vector at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let d = self.dimension();
        self.data.get(position * d..(position + 1) * d)
    }

    /// The `k` highest inner products with `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || query.len() != self.dimension() || self.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension())
            .enumerate()
            .map(|(pos, row)| (pos, row.iter().zip(query).map(|(a, b)| a * b).sum()))
            .collect();
        scored.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    /// Serialize with rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::operation(format!("failed to encode index: {e}")))
    }

    /// Deserialize bytes written by [`FlatIndex::to_bytes`], validating them.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::operation(format!("failed to decode index: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
