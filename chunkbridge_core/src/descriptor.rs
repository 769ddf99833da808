use crate::error::BridgeError;
use crate::grid::ChunkGrid;

/// Immutable layout of a regularly chunked array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDescriptor {
    shape: Vec<u64>,
    chunk_shape: Vec<u64>,
    ext_chunk_shape: Vec<u64>,
    itemsize: usize,
}

impl ArrayDescriptor {
    /// Validate and build a descriptor.
    ///
    /// Every extended chunk extent must be at least the nominal chunk extent,
    /// which also makes it large enough to absorb a partial edge chunk.
    pub fn new(
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        ext_chunk_shape: Vec<u64>,
        itemsize: usize,
    ) -> Result<Self, BridgeError> {
        let ndim = shape.len();
        if ndim == 0 {
            return Err(BridgeError::InvalidShape("array has no dimensions".into()));
        }
        if chunk_shape.len() != ndim || ext_chunk_shape.len() != ndim {
            return Err(BridgeError::InvalidShape(format!(
                "dimension mismatch: shape {}, chunk shape {}, extended chunk shape {}",
                ndim,
                chunk_shape.len(),
                ext_chunk_shape.len()
            )));
        }
        if itemsize == 0 {
            return Err(BridgeError::InvalidShape("item size must be positive".into()));
        }
        for dim in 0..ndim {
            if shape[dim] == 0 || chunk_shape[dim] == 0 {
                return Err(BridgeError::InvalidShape(format!(
                    "dimension {dim} has zero extent (shape {}, chunk {})",
                    shape[dim], chunk_shape[dim]
                )));
            }
            if ext_chunk_shape[dim] < chunk_shape[dim] {
                return Err(BridgeError::InvalidShape(format!(
                    "dimension {dim}: extended chunk extent {} is smaller than chunk extent {}",
                    ext_chunk_shape[dim], chunk_shape[dim]
                )));
            }
        }
        Ok(Self {
            shape,
            chunk_shape,
            ext_chunk_shape,
            itemsize,
        })
    }

    /// Descriptor whose stored chunks carry no padding beyond the nominal chunk shape.
    pub fn unpadded(shape: Vec<u64>, chunk_shape: Vec<u64>, itemsize: usize) -> Result<Self, BridgeError> {
        let ext = chunk_shape.clone();
        Self::new(shape, chunk_shape, ext, itemsize)
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    pub fn ext_chunk_shape(&self) -> &[u64] {
        &self.ext_chunk_shape
    }

    pub fn itemsize(&self) -> usize {
        self.itemsize
    }

    pub fn grid(&self) -> Result<ChunkGrid, BridgeError> {
        ChunkGrid::new(self)
    }

    /// Byte size of one stored (padded) chunk.
    pub fn chunk_nbytes(&self) -> Result<usize, BridgeError> {
        self.ext_chunk_shape
            .iter()
            .try_fold(self.itemsize as u64, |acc, &c| acc.checked_mul(c))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| BridgeError::InvalidShape("chunk byte size overflows".into()))
    }

    /// Number of logical elements in the unpadded array.
    pub fn logical_len(&self) -> u64 {
        self.shape.iter().product()
    }
}
