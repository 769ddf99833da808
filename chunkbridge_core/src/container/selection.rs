use crate::error::FormatError;

/// A regular hyperslab: along each dimension, `count` blocks of `block`
/// elements, the first starting at `start` and each `stride` after the previous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperslab {
    pub start: Vec<u64>,
    pub stride: Vec<u64>,
    pub count: Vec<u64>,
    pub block: Vec<u64>,
}

impl Hyperslab {
    pub fn new(start: Vec<u64>, stride: Vec<u64>, count: Vec<u64>, block: Vec<u64>) -> Self {
        Self {
            start,
            stride,
            count,
            block,
        }
    }

    /// The footprint of one chunk: one block of `extent` at `offset`, with the
    /// stride set to the chunk extent so neighbouring chunk selections tile.
    pub fn chunk(offset: &[u64], extent: &[u64]) -> Self {
        Self {
            start: offset.to_vec(),
            stride: extent.to_vec(),
            count: vec![1; offset.len()],
            block: extent.to_vec(),
        }
    }

    /// Every element of a dataspace of `shape`.
    pub fn all(shape: &[u64]) -> Self {
        Self::chunk(&vec![0; shape.len()], shape)
    }

    pub fn ndim(&self) -> usize {
        self.start.len()
    }

    /// Check the selection against a dataspace of `shape`.
    pub fn validate(&self, shape: &[u64]) -> Result<(), FormatError> {
        let ndim = shape.len();
        if [&self.start, &self.stride, &self.count, &self.block]
            .iter()
            .any(|v| v.len() != ndim)
        {
            return Err(FormatError::Selection(format!(
                "selection rank does not match dataspace rank {ndim}"
            )));
        }
        for dim in 0..ndim {
            let (start, stride, count, block) =
                (self.start[dim], self.stride[dim], self.count[dim], self.block[dim]);
            if count == 0 || block == 0 {
                return Err(FormatError::Selection(format!(
                    "dimension {dim}: count and block must be positive"
                )));
            }
            if count > 1 && stride < block {
                return Err(FormatError::Selection(format!(
                    "dimension {dim}: stride {stride} is smaller than block {block}"
                )));
            }
            let end = (count - 1)
                .checked_mul(stride)
                .and_then(|n| n.checked_add(start))
                .and_then(|n| n.checked_add(block));
            match end {
                Some(end) if end <= shape[dim] => {}
                _ => {
                    return Err(FormatError::Selection(format!(
                        "dimension {dim}: selection exceeds extent {}",
                        shape[dim]
                    )))
                }
            }
        }
        Ok(())
    }

    /// Shape of the selected region once gathered into a dense buffer.
    pub fn dims(&self) -> Vec<u64> {
        self.count
            .iter()
            .zip(&self.block)
            .map(|(&c, &b)| c * b)
            .collect()
    }

    pub fn num_elements(&self) -> u64 {
        self.dims().iter().product()
    }

    /// Dataspace coordinates selected along `dim`, in selection order.
    pub fn coords(&self, dim: usize) -> impl Iterator<Item = u64> + '_ {
        let (start, stride, block) = (self.start[dim], self.stride[dim], self.block[dim]);
        (0..self.count[dim]).flat_map(move |c| (0..block).map(move |b| start + c * stride + b))
    }
}
