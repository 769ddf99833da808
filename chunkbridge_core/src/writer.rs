use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::codec::BlockCodec;
use crate::container::{ContainerWriter, DatasetSpec};
use crate::element::ElementType;
use crate::error::{BridgeError, FormatError};
use crate::profile::CompressionProfile;
use crate::source::SourceArray;

/// Dataset attribute holding the unpadded array shape.
pub const ATTR_LOGICAL_SHAPE: &str = "logical_shape";
/// Dataset attribute holding the nominal (unpadded) chunk shape.
pub const ATTR_CHUNK_SHAPE: &str = "chunk_shape";

/// Totals for one write pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub chunks: u64,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
}

impl WriteSummary {
    pub fn ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 1.0;
        }
        self.raw_bytes as f64 / self.compressed_bytes as f64
    }
}

/// Moves a source array into a container, chunk by chunk, as pre-compressed
/// blocks written beneath the container's own filter pipeline.
///
/// The dataset's pipeline is registered from the same [`CompressionProfile`]
/// the chunks are compressed with.
pub struct ChunkStoreWriter {
    codec: Arc<dyn BlockCodec>,
    profile: CompressionProfile,
}

impl ChunkStoreWriter {
    pub fn new(codec: Arc<dyn BlockCodec>, profile: CompressionProfile) -> Self {
        Self { codec, profile }
    }

    pub fn profile(&self) -> &CompressionProfile {
        &self.profile
    }

    /// Profile for `source`: an automatic block size defers to the source's own.
    fn effective_profile(&self, source: &dyn SourceArray) -> CompressionProfile {
        let mut profile = self.profile.clone();
        if profile.blocksize == 0 {
            profile.blocksize = source.blocksize();
        }
        profile
    }

    /// Dataset layout that receives `source`: the padded array, chunked by
    /// the extended chunk shape, decoded by the framed-block filter.
    pub fn dataset_spec(&self, source: &dyn SourceArray) -> Result<DatasetSpec, BridgeError> {
        let descriptor = source.descriptor();
        let grid = source.chunk_grid();
        let element_type = ElementType::for_itemsize(descriptor.itemsize())?;
        Ok(DatasetSpec::new(
            element_type,
            grid.extended_shape().to_vec(),
            grid.ext_chunk_shape().to_vec(),
        )
        .filter(self.profile.filter_params().description())
        .attribute(ATTR_LOGICAL_SHAPE, descriptor.shape().to_vec())
        .attribute(ATTR_CHUNK_SHAPE, descriptor.chunk_shape().to_vec()))
    }

    /// Create `dataset` in `container` and write every chunk of `source` into it.
    pub fn write_all(
        &self,
        source: &mut dyn SourceArray,
        container: &mut ContainerWriter,
        dataset: &str,
    ) -> Result<WriteSummary, BridgeError> {
        let profile = self.effective_profile(source);
        profile.validate().map_err(FormatError::from)?;
        let spec = self.dataset_spec(source)?;
        container.create_dataset(dataset, spec)?;

        let grid = source.chunk_grid().clone();
        let itemsize = source.descriptor().itemsize();
        let chunk_nbytes = source.descriptor().chunk_nbytes()?;
        let mut raw = vec![0u8; chunk_nbytes];
        let mut summary = WriteSummary::default();

        for linear in 0..grid.total_chunks() {
            let chunk = grid.chunk_id(linear)?;
            let offset = grid.offset(&chunk.multi);

            let written = match source.decompress_chunk_into(linear, &mut raw) {
                Ok(n) => n,
                Err(source) => return Err(BridgeError::SourceRead { chunk, source }),
            };
            if written != chunk_nbytes {
                return Err(BridgeError::SourceRead {
                    chunk,
                    source: FormatError::Corrupt(format!(
                        "source produced {written} bytes, chunk holds {chunk_nbytes}"
                    )),
                });
            }

            let block = match self.codec.compress(&raw, itemsize, &profile) {
                Ok(block) => block,
                Err(source) => return Err(BridgeError::Compression { chunk, source }),
            };
            if let Err(source) = container.write_raw_chunk(dataset, &offset, 0, &block) {
                return Err(BridgeError::ContainerWrite { chunk, source });
            }

            debug!(
                chunk = linear,
                multi = ?chunk.multi,
                offset = ?offset,
                compressed = block.len(),
                "wrote chunk"
            );
            summary.chunks += 1;
            summary.raw_bytes += chunk_nbytes as u64;
            summary.compressed_bytes += block.len() as u64;
        }

        info!(
            dataset,
            codec = self.codec.name(),
            chunks = summary.chunks,
            ratio = %format!("{:.2}", summary.ratio()),
            "write pass complete"
        );
        Ok(summary)
    }
}
