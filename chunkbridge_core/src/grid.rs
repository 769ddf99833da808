//! Chunk-grid arithmetic.
//!
//! A grid is enumerated with a mixed-radix decomposition in which dimension 0
//! varies fastest. Writers and both read paths derive chunk offsets from this
//! one enumeration, so the order is part of the on-disk contract: a different
//! order does not fail, it silently pairs chunks with the wrong offsets.

use crate::descriptor::ArrayDescriptor;
use crate::error::{BridgeError, ChunkId};

/// Number of chunks along each dimension: `ceil(shape / chunk_shape)`.
pub fn grid_dims(shape: &[u64], chunk_shape: &[u64]) -> Result<Vec<u64>, BridgeError> {
    if shape.len() != chunk_shape.len() {
        return Err(BridgeError::InvalidShape(format!(
            "shape has {} dimensions but chunk shape has {}",
            shape.len(),
            chunk_shape.len()
        )));
    }
    shape
        .iter()
        .zip(chunk_shape)
        .enumerate()
        .map(|(dim, (&extent, &chunk))| {
            if extent == 0 {
                return Err(BridgeError::InvalidShape(format!(
                    "dimension {dim} has zero extent"
                )));
            }
            if chunk == 0 {
                return Err(BridgeError::InvalidShape(format!(
                    "dimension {dim} has zero chunk extent"
                )));
            }
            Ok((extent - 1) / chunk + 1)
        })
        .collect()
}

/// Padded logical shape covered by the grid.
pub fn extended_shape(ext_chunk_shape: &[u64], grid_dims: &[u64]) -> Vec<u64> {
    ext_chunk_shape
        .iter()
        .zip(grid_dims)
        .map(|(&c, &g)| c * g)
        .collect()
}

/// Decompose a linear chunk index into its grid coordinate.
pub fn linear_to_multi(linear: u64, grid_dims: &[u64]) -> Result<Vec<u64>, BridgeError> {
    let total = total_chunks(grid_dims);
    if linear >= total {
        return Err(BridgeError::IndexOutOfRange {
            index: linear,
            total,
        });
    }
    let mut rest = linear;
    Ok(grid_dims
        .iter()
        .map(|&g| {
            let coord = rest % g;
            rest /= g;
            coord
        })
        .collect())
}

/// Compose a grid coordinate back into its linear chunk index.
pub fn multi_to_linear(multi: &[u64], grid_dims: &[u64]) -> Result<u64, BridgeError> {
    if multi.len() != grid_dims.len() {
        return Err(BridgeError::InvalidShape(format!(
            "coordinate has {} dimensions, grid has {}",
            multi.len(),
            grid_dims.len()
        )));
    }
    let mut linear = 0u64;
    for (&coord, &g) in multi.iter().zip(grid_dims).rev() {
        if coord >= g {
            return Err(BridgeError::IndexOutOfRange {
                index: coord,
                total: g,
            });
        }
        linear = linear * g + coord;
    }
    Ok(linear)
}

/// Per-dimension origin of a chunk in the padded array.
pub fn chunk_offset(multi: &[u64], ext_chunk_shape: &[u64]) -> Vec<u64> {
    multi
        .iter()
        .zip(ext_chunk_shape)
        .map(|(&m, &c)| m * c)
        .collect()
}

/// Step a row-major (last dimension fastest) coordinate through `0..lens[i]`.
/// Returns false once it wraps back to all zeros.
pub(crate) fn next_row_major(idx: &mut [u64], lens: &[u64]) -> bool {
    for dim in (0..idx.len()).rev() {
        idx[dim] += 1;
        if idx[dim] < lens[dim] {
            return true;
        }
        idx[dim] = 0;
    }
    false
}

fn total_chunks(grid_dims: &[u64]) -> u64 {
    grid_dims.iter().product()
}

/// The chunk grid derived from an [`ArrayDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    shape: Vec<u64>,
    chunk_shape: Vec<u64>,
    ext_chunk_shape: Vec<u64>,
    grid_dims: Vec<u64>,
    extended_shape: Vec<u64>,
    chunk_elem_count: u64,
    total_chunks: u64,
}

impl ChunkGrid {
    pub fn new(descriptor: &ArrayDescriptor) -> Result<Self, BridgeError> {
        let grid_dims = grid_dims(descriptor.shape(), descriptor.chunk_shape())?;
        let ext = descriptor.ext_chunk_shape();
        let chunk_elem_count = checked_product(ext)
            .ok_or_else(|| BridgeError::InvalidShape("chunk element count overflows".into()))?;
        let total_chunks = checked_product(&grid_dims)
            .ok_or_else(|| BridgeError::InvalidShape("chunk count overflows".into()))?;
        let extended_shape = ext
            .iter()
            .zip(&grid_dims)
            .map(|(&c, &g)| c.checked_mul(g))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| BridgeError::InvalidShape("extended shape overflows".into()))?;
        Ok(Self {
            shape: descriptor.shape().to_vec(),
            chunk_shape: descriptor.chunk_shape().to_vec(),
            ext_chunk_shape: ext.to_vec(),
            grid_dims,
            extended_shape,
            chunk_elem_count,
            total_chunks,
        })
    }

    pub fn ndim(&self) -> usize {
        self.grid_dims.len()
    }

    pub fn grid_dims(&self) -> &[u64] {
        &self.grid_dims
    }

    pub fn extended_shape(&self) -> &[u64] {
        &self.extended_shape
    }

    pub fn ext_chunk_shape(&self) -> &[u64] {
        &self.ext_chunk_shape
    }

    /// Elements in one stored (padded) chunk.
    pub fn chunk_elem_count(&self) -> u64 {
        self.chunk_elem_count
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn multi_index(&self, linear: u64) -> Result<Vec<u64>, BridgeError> {
        linear_to_multi(linear, &self.grid_dims)
    }

    pub fn linear_index(&self, multi: &[u64]) -> Result<u64, BridgeError> {
        multi_to_linear(multi, &self.grid_dims)
    }

    pub fn offset(&self, multi: &[u64]) -> Vec<u64> {
        chunk_offset(multi, &self.ext_chunk_shape)
    }

    pub fn chunk_id(&self, linear: u64) -> Result<ChunkId, BridgeError> {
        Ok(ChunkId {
            linear,
            multi: self.multi_index(linear)?,
        })
    }

    /// Extent of logically valid data inside the chunk at `multi`, per dimension.
    ///
    /// Elements at local coordinates at or beyond this extent are padding:
    /// either beyond `chunk_shape` inside an extended chunk, or beyond the
    /// array edge in a partial edge chunk.
    pub fn logical_extent(&self, multi: &[u64]) -> Vec<u64> {
        multi
            .iter()
            .zip(self.chunk_shape.iter().zip(&self.shape))
            .map(|(&m, (&chunk, &extent))| {
                let origin = m * chunk;
                chunk.min(extent.saturating_sub(origin))
            })
            .collect()
    }

    /// Origin of chunk `multi` in the unpadded logical array.
    pub fn logical_origin(&self, multi: &[u64]) -> Vec<u64> {
        chunk_offset(multi, &self.chunk_shape)
    }

    /// Number of logically valid elements in the chunk at `multi`.
    pub fn logical_elem_count(&self, multi: &[u64]) -> u64 {
        self.logical_extent(multi).iter().product()
    }
}

fn checked_product(values: &[u64]) -> Option<u64> {
    values.iter().try_fold(1u64, |acc, &v| acc.checked_mul(v))
}
