//! Chunk-addressable source arrays.

use crate::descriptor::ArrayDescriptor;
use crate::error::{BridgeError, FormatError};
use crate::grid::{next_row_major, ChunkGrid};

/// An array whose chunks can be decoded one at a time by linear index.
///
/// A decoded chunk is `chunk_elem_count * itemsize` bytes in row-major order
/// of the extended chunk shape; elements outside the logical extent are padding.
pub trait SourceArray {
    fn descriptor(&self) -> &ArrayDescriptor;

    fn chunk_grid(&self) -> &ChunkGrid;

    fn nchunks(&self) -> u64 {
        self.chunk_grid().total_chunks()
    }

    /// Internal block size the source was compressed with; 0 when unknown.
    fn blocksize(&self) -> usize {
        0
    }

    /// Decode chunk `linear` into `dest`, returning the bytes written.
    fn decompress_chunk_into(&mut self, linear: u64, dest: &mut [u8]) -> Result<usize, FormatError>;

    fn decompress_chunk(&mut self, linear: u64) -> Result<Vec<u8>, FormatError> {
        let nbytes = self.chunk_grid().chunk_elem_count() as usize * self.descriptor().itemsize();
        let mut out = vec![0u8; nbytes];
        let written = self.decompress_chunk_into(linear, &mut out)?;
        out.truncate(written);
        Ok(out)
    }
}

/// A source backed by the whole logical array held in memory, row-major.
#[derive(Debug, Clone)]
pub struct DenseSource {
    descriptor: ArrayDescriptor,
    grid: ChunkGrid,
    data: Vec<u8>,
}

impl DenseSource {
    pub fn new(descriptor: ArrayDescriptor, data: Vec<u8>) -> Result<Self, BridgeError> {
        let expected = descriptor
            .shape()
            .iter()
            .try_fold(descriptor.itemsize() as u64, |acc, &s| acc.checked_mul(s))
            .ok_or_else(|| BridgeError::InvalidShape("array byte size overflows".into()))?;
        if data.len() as u64 != expected {
            return Err(BridgeError::InvalidShape(format!(
                "array of shape {:?} needs {expected} bytes, got {}",
                descriptor.shape(),
                data.len()
            )));
        }
        let grid = descriptor.grid()?;
        descriptor.chunk_nbytes()?;
        Ok(Self {
            descriptor,
            grid,
            data,
        })
    }

    /// Logical array bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl SourceArray for DenseSource {
    fn descriptor(&self) -> &ArrayDescriptor {
        &self.descriptor
    }

    fn chunk_grid(&self) -> &ChunkGrid {
        &self.grid
    }

    fn decompress_chunk_into(&mut self, linear: u64, dest: &mut [u8]) -> Result<usize, FormatError> {
        let itemsize = self.descriptor.itemsize();
        let nbytes = self.grid.chunk_elem_count() as usize * itemsize;
        if dest.len() < nbytes {
            return Err(FormatError::BufferTooSmall {
                needed: nbytes,
                available: dest.len(),
            });
        }
        let multi = self
            .grid
            .multi_index(linear)
            .map_err(|_| FormatError::ChunkOutOfRange {
                index: linear,
                total: self.grid.total_chunks(),
            })?;
        let dest = &mut dest[..nbytes];
        dest.fill(0);

        let shape = self.descriptor.shape();
        let ext = self.grid.ext_chunk_shape();
        let origin = self.grid.logical_origin(&multi);
        let extent = self.grid.logical_extent(&multi);
        let ndim = shape.len();
        let row = extent[ndim - 1] as usize * itemsize;

        // Walk every row of logically valid elements; rows run along the last dimension.
        let outer = &extent[..ndim - 1];
        let mut local = vec![0u64; ndim - 1];
        loop {
            let mut src = 0u64;
            let mut dst = 0u64;
            for dim in 0..ndim {
                let l = if dim < ndim - 1 { local[dim] } else { 0 };
                src = src * shape[dim] + origin[dim] + l;
                dst = dst * ext[dim] + l;
            }
            let (src, dst) = (src as usize * itemsize, dst as usize * itemsize);
            dest[dst..dst + row].copy_from_slice(&self.data[src..src + row]);
            if !next_row_major(&mut local, outer) {
                break;
            }
        }
        Ok(nbytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_i32(n: usize) -> Vec<u8> {
        (0..n as i32).flat_map(|v| v.to_le_bytes()).collect()
    }

    fn as_i32(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn edge_chunk_is_zero_padded() {
        let desc = ArrayDescriptor::unpadded(vec![10], vec![4], 4).unwrap();
        let mut src = DenseSource::new(desc, ramp_i32(10)).unwrap();
        assert_eq!(src.nchunks(), 3);
        assert_eq!(as_i32(&src.decompress_chunk(1).unwrap()), vec![4, 5, 6, 7]);
        assert_eq!(as_i32(&src.decompress_chunk(2).unwrap()), vec![8, 9, 0, 0]);
        assert!(src.decompress_chunk(3).is_err());
    }

    #[test]
    fn extended_chunks_pad_every_dimension() {
        // 3x5 array, 2x2 chunks stored as 3x3.
        let desc = ArrayDescriptor::new(vec![3, 5], vec![2, 2], vec![3, 3], 4).unwrap();
        let mut src = DenseSource::new(desc, ramp_i32(15)).unwrap();
        assert_eq!(src.nchunks(), 6);
        // Linear 1 is grid coordinate [1, 0]: rows 2.., columns 0..2.
        assert_eq!(
            as_i32(&src.decompress_chunk(1).unwrap()),
            vec![10, 11, 0, 0, 0, 0, 0, 0, 0]
        );
        // Linear 4 is [0, 2]: rows 0..2, column 4.
        assert_eq!(
            as_i32(&src.decompress_chunk(4).unwrap()),
            vec![4, 0, 0, 9, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn wrong_buffer_length_is_rejected() {
        let desc = ArrayDescriptor::unpadded(vec![4], vec![2], 1).unwrap();
        assert!(DenseSource::new(desc, vec![0; 3]).is_err());
    }
}
