//! The two independent read paths over a bridged dataset.

use crate::codec::BlockCodec;
use crate::container::{align_up, ContainerReader, Hyperslab};
use crate::descriptor::ArrayDescriptor;
use crate::error::{BridgeError, ChunkId, CodecError, FormatError};
use crate::frame::max_compressed_len;
use crate::grid::ChunkGrid;

/// Reads chunks of one dataset back either as raw stored blocks decoded
/// directly by the codec, or through the container's typed read path, which
/// runs the registered filter pipeline.
///
/// Both paths derive the chunk's container offset from the same grid
/// enumeration the writer used.
pub struct ChunkStoreReader<'a> {
    container: &'a mut ContainerReader,
    codec: &'a dyn BlockCodec,
    dataset: String,
    grid: ChunkGrid,
    chunk_nbytes: usize,
}

impl<'a> ChunkStoreReader<'a> {
    /// Attach to `dataset`, which must have the layout `descriptor` bridges to.
    pub fn new(
        container: &'a mut ContainerReader,
        codec: &'a dyn BlockCodec,
        dataset: &str,
        descriptor: &ArrayDescriptor,
    ) -> Result<Self, BridgeError> {
        let grid = descriptor.grid()?;
        let chunk_nbytes = descriptor.chunk_nbytes()?;
        let meta = container.dataset(dataset)?;
        if meta.shape() != grid.extended_shape()
            || meta.chunk_dims() != grid.ext_chunk_shape()
            || meta.element_type().size() != descriptor.itemsize()
        {
            return Err(FormatError::InvalidLayout(format!(
                "dataset {dataset:?} ({:?} in {:?} chunks of {}) does not hold {:?} in {:?} chunks of {}-byte items",
                meta.shape(),
                meta.chunk_dims(),
                meta.element_type(),
                grid.extended_shape(),
                grid.ext_chunk_shape(),
                descriptor.itemsize()
            ))
            .into());
        }
        Ok(Self {
            container,
            codec,
            dataset: dataset.to_string(),
            grid,
            chunk_nbytes,
        })
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    /// Bytes in one decoded chunk.
    pub fn chunk_nbytes(&self) -> usize {
        self.chunk_nbytes
    }

    /// Size of a buffer that can hold any stored chunk, alignment padding included.
    pub fn stored_buffer_len(&self) -> usize {
        align_up(max_compressed_len(self.chunk_nbytes) as u64) as usize
    }

    /// Raw path: read the stored block at the chunk's offset into `stored`,
    /// bound it by its own header, and decompress it into `out`.
    ///
    /// `stored` should be at least [`stored_buffer_len`](Self::stored_buffer_len)
    /// bytes; `out` at least [`chunk_nbytes`](Self::chunk_nbytes).
    pub fn read_raw_into(
        &mut self,
        linear: u64,
        stored: &mut [u8],
        out: &mut [u8],
    ) -> Result<usize, BridgeError> {
        let chunk = self.grid.chunk_id(linear)?;
        let offset = self.grid.offset(&chunk.multi);
        let available = out.len();
        let Some(out) = out.get_mut(..self.chunk_nbytes) else {
            return Err(BridgeError::Decompression {
                chunk,
                source: CodecError::Decompression(format!(
                    "output buffer of {available} bytes cannot hold a {}-byte chunk",
                    self.chunk_nbytes
                )),
            });
        };

        // Framing is judged on the bytes as stored, before the checksum.
        let read = self
            .container
            .read_raw_chunk_unchecked_into(&self.dataset, &offset, stored);
        let allocated = match read {
            Ok((allocated, _mask)) => allocated,
            Err(source) => return Err(BridgeError::RawRead { chunk, source }),
        };
        let buf = &stored[..allocated];

        let declared = match self.codec.header_declared_length(buf) {
            Ok(len) => len,
            Err(source) => return Err(BridgeError::Framing { chunk, source }),
        };
        if let Err(source) = self.container.check_raw_chunk(&self.dataset, &offset, buf) {
            return Err(BridgeError::RawRead { chunk, source });
        }

        let written = match self.codec.decompress_into(&buf[..declared], out) {
            Ok(n) if n == self.chunk_nbytes => n,
            Ok(n) => {
                return Err(BridgeError::Decompression {
                    chunk,
                    source: CodecError::Decompression(format!(
                        "decompressed {n} bytes, expected {}",
                        self.chunk_nbytes
                    )),
                })
            }
            Err(source) => return Err(BridgeError::Decompression { chunk, source }),
        };
        tracing::debug!(chunk = linear, offset = ?offset, stored = declared, allocated, "raw path read");
        Ok(written)
    }

    pub fn read_raw(&mut self, linear: u64) -> Result<Vec<u8>, BridgeError> {
        let mut stored = vec![0u8; self.stored_buffer_len()];
        let mut out = vec![0u8; self.chunk_nbytes];
        self.read_raw_into(linear, &mut stored, &mut out)?;
        Ok(out)
    }

    /// Filtered path: a typed read of the chunk's footprint. The container's
    /// filter pipeline decodes the block.
    pub fn read_filtered_into(&mut self, linear: u64, out: &mut [u8]) -> Result<usize, BridgeError> {
        let chunk = self.grid.chunk_id(linear)?;
        let offset = self.grid.offset(&chunk.multi);
        let selection = Hyperslab::chunk(&offset, self.grid.ext_chunk_shape());
        match self.container.read_typed_into(&self.dataset, &selection, out) {
            Ok(n) => {
                tracing::debug!(chunk = linear, offset = ?offset, "filtered path read");
                Ok(n)
            }
            Err(source) => Err(BridgeError::FilteredRead { chunk, source }),
        }
    }

    pub fn read_filtered(&mut self, linear: u64) -> Result<Vec<u8>, BridgeError> {
        let mut out = vec![0u8; self.chunk_nbytes];
        self.read_filtered_into(linear, &mut out)?;
        Ok(out)
    }

    pub fn chunk_id(&self, linear: u64) -> Result<ChunkId, BridgeError> {
        self.grid.chunk_id(linear)
    }
}
