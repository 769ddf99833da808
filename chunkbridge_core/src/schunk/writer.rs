use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

use crate::codec::BlockCodec;
use crate::descriptor::ArrayDescriptor;
use crate::error::FormatError;
use crate::profile::CompressionProfile;
use crate::schunk::format::{header_size, BlockEntry, SChunkHeader, FLAG_HAS_CHECKSUM, VERSION};
use crate::source::SourceArray;

/// Streaming writer for super-chunk files.
///
/// # Write contract
/// Call [`append_chunk`](Self::append_chunk) once per chunk, in linear chunk
/// order, with the decoded (padded) chunk bytes. Call [`finish`](Self::finish)
/// to append the chunk index and footer and write back the final header.
///
/// # Format layout written
/// ```text
/// [HEADER: 32 + 24·ndim bytes placeholder]
/// [CHUNK 0] [CHUNK 1] ... [CHUNK N-1]      ← independent compressed blocks
/// [CHUNK INDEX: 32 bytes × N]
/// [FOOTER: 8 bytes, u64 LE offset of chunk index]
/// ← seek back to 0, overwrite header with real values
/// ```
pub struct SChunkWriter {
    file: BufWriter<File>,
    descriptor: ArrayDescriptor,
    codec: Arc<dyn BlockCodec>,
    profile: CompressionProfile,
    chunk_nbytes: usize,
    total_chunks: u64,
    entries: Vec<BlockEntry>,
    current_offset: u64,
}

impl SChunkWriter {
    /// Create a new super-chunk file at `path`, overwriting any existing file.
    pub fn create(
        path: impl AsRef<Path>,
        descriptor: ArrayDescriptor,
        codec: Arc<dyn BlockCodec>,
        profile: CompressionProfile,
    ) -> Result<Self, FormatError> {
        profile.validate()?;
        let layout = |e: crate::error::BridgeError| FormatError::InvalidLayout(e.to_string());
        let chunk_nbytes = descriptor.chunk_nbytes().map_err(layout)?;
        let total_chunks = descriptor.grid().map_err(layout)?.total_chunks();
        let header_len = header_size(descriptor.ndim());

        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&vec![0u8; header_len as usize])?;
        Ok(Self {
            file,
            descriptor,
            codec,
            profile,
            chunk_nbytes,
            total_chunks,
            entries: Vec::new(),
            current_offset: header_len,
        })
    }

    /// Compress and append the next chunk. Returns its linear index.
    pub fn append_chunk(&mut self, raw: &[u8]) -> Result<u64, FormatError> {
        let index = self.entries.len() as u64;
        if index >= self.total_chunks {
            return Err(FormatError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        if raw.len() != self.chunk_nbytes {
            return Err(FormatError::InvalidLayout(format!(
                "chunk {index} has {} bytes, expected {}",
                raw.len(),
                self.chunk_nbytes
            )));
        }
        let compressed = self
            .codec
            .compress(raw, self.descriptor.itemsize(), &self.profile)?;
        let compressed_len = u32::try_from(compressed.len())
            .map_err(|_| FormatError::InvalidLayout(format!("chunk {index} compresses beyond 4 GiB")))?;
        let raw_len = u32::try_from(raw.len())
            .map_err(|_| FormatError::InvalidLayout(format!("chunk {index} exceeds 4 GiB")))?;

        self.file.write_all(&compressed)?;
        self.entries.push(BlockEntry {
            offset: self.current_offset,
            compressed_len,
            raw_len,
            checksum: xxh3_64(&compressed),
        });
        self.current_offset += compressed_len as u64;
        debug!(chunk = index, raw = raw_len, compressed = compressed_len, "appended chunk");
        Ok(index)
    }

    /// Write the chunk index and footer, then seal the file with the final
    /// header. Every chunk of the grid must have been appended.
    ///
    /// Returns the number of chunks written.
    pub fn finish(mut self) -> Result<u64, FormatError> {
        let chunk_count = self.entries.len() as u64;
        if chunk_count != self.total_chunks {
            return Err(FormatError::InvalidLayout(format!(
                "grid has {} chunks but {chunk_count} were appended",
                self.total_chunks
            )));
        }

        // ── Chunk index ────────────────────────────────────────────────────
        let index_offset = self.current_offset;
        for entry in &self.entries {
            self.file.write_all(&entry.to_bytes())?;
        }

        // ── Footer ─────────────────────────────────────────────────────────
        self.file.write_all(&index_offset.to_le_bytes())?;

        // ── Real header ────────────────────────────────────────────────────
        let header = SChunkHeader {
            version: VERSION,
            flags: FLAG_HAS_CHECKSUM,
            chunk_count,
            descriptor: self.descriptor,
            profile: self.profile,
        };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes()?)?;
        self.file.flush()?;

        Ok(chunk_count)
    }

    /// Persist every chunk of `source` into a new super-chunk file.
    pub fn from_source(
        path: impl AsRef<Path>,
        source: &mut dyn SourceArray,
        codec: Arc<dyn BlockCodec>,
        profile: CompressionProfile,
    ) -> Result<u64, FormatError> {
        let mut writer = Self::create(path, source.descriptor().clone(), codec, profile)?;
        let mut raw = vec![0u8; writer.chunk_nbytes];
        for linear in 0..source.nchunks() {
            let written = source.decompress_chunk_into(linear, &mut raw)?;
            writer.append_chunk(&raw[..written])?;
        }
        let chunks = writer.finish()?;
        info!(chunks, "super-chunk file written");
        Ok(chunks)
    }
}
