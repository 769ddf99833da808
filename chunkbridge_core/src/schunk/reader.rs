use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use crate::codec::BlockCodec;
use crate::descriptor::ArrayDescriptor;
use crate::error::FormatError;
use crate::grid::ChunkGrid;
use crate::profile::CompressionProfile;
use crate::schunk::format::{
    BlockEntry, SChunkHeader, BLOCK_ENTRY_SIZE, FIXED_HEADER_SIZE, FLAG_HAS_CHECKSUM, FOOTER_SIZE,
    VERSION,
};
use crate::source::SourceArray;

/// Random-access reader for super-chunk files.
///
/// # Open sequence
/// 1. Read the fixed header, then the dimension block it announces.
/// 2. Seek to `file_end - 8`, read the chunk index offset.
/// 3. Load the full chunk index into RAM.
///
/// [`read_block`](Self::read_block) seeks straight to one chunk; no other
/// chunk is touched.
pub struct SChunkReader {
    file: File,
    header: SChunkHeader,
    grid: ChunkGrid,
    entries: Vec<BlockEntry>,
    codec: Arc<dyn BlockCodec>,
    scratch: Vec<u8>,
}

impl SChunkReader {
    pub fn open(path: impl AsRef<Path>, codec: Arc<dyn BlockCodec>) -> Result<Self, FormatError> {
        let mut file = File::open(path)?;

        // ── Header ─────────────────────────────────────────────────────────
        let mut fixed_buf = [0u8; FIXED_HEADER_SIZE as usize];
        file.read_exact(&mut fixed_buf)?;
        let (fixed, ndim) = SChunkHeader::parse_fixed(&fixed_buf)?;
        if fixed.version != VERSION {
            return Err(FormatError::UnsupportedVersion {
                kind: "super-chunk",
                version: fixed.version,
            });
        }
        let mut dims = vec![0u8; 3 * 8 * ndim];
        file.read_exact(&mut dims)?;
        let header = SChunkHeader::from_parts(fixed, &dims, ndim)?;
        let grid = header
            .descriptor
            .grid()
            .map_err(|e| FormatError::Corrupt(e.to_string()))?;
        if grid.total_chunks() != header.chunk_count {
            return Err(FormatError::Corrupt(format!(
                "header lists {} chunks, grid has {}",
                header.chunk_count,
                grid.total_chunks()
            )));
        }

        // ── Footer → index offset ──────────────────────────────────────────
        let file_len = file.metadata()?.len();
        if file_len < FOOTER_SIZE {
            return Err(FormatError::Corrupt(format!("super-chunk of {file_len} bytes is truncated")));
        }
        file.seek(SeekFrom::Start(file_len - FOOTER_SIZE))?;
        let mut footer_buf = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer_buf)?;
        let index_offset = u64::from_le_bytes(footer_buf);

        // The index must fit between its offset and the footer.
        let index_end = header
            .chunk_count
            .checked_mul(BLOCK_ENTRY_SIZE)
            .and_then(|len| len.checked_add(index_offset));
        if index_end.map_or(true, |end| end > file_len - FOOTER_SIZE) {
            return Err(FormatError::Corrupt(format!(
                "index of {} entries at {index_offset} overruns {file_len}-byte file",
                header.chunk_count
            )));
        }

        // ── Chunk index ────────────────────────────────────────────────────
        file.seek(SeekFrom::Start(index_offset))?;
        let mut entries = Vec::with_capacity(header.chunk_count as usize);
        let mut entry_buf = [0u8; BLOCK_ENTRY_SIZE as usize];
        for _ in 0..header.chunk_count {
            file.read_exact(&mut entry_buf)?;
            entries.push(BlockEntry::from_bytes(&entry_buf)?);
        }

        Ok(Self {
            file,
            header,
            grid,
            entries,
            codec,
            scratch: Vec::new(),
        })
    }

    pub fn header(&self) -> &SChunkHeader {
        &self.header
    }

    /// Compression parameters recorded by the writer.
    pub fn profile(&self) -> &CompressionProfile {
        &self.header.profile
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    /// Total uncompressed size of all chunks in bytes.
    pub fn raw_size(&self) -> u64 {
        self.entries.iter().map(|e| e.raw_len as u64).sum()
    }

    /// Total compressed size of all chunks in bytes.
    pub fn compressed_size(&self) -> u64 {
        self.entries.iter().map(|e| e.compressed_len as u64).sum()
    }

    /// Compression ratio (raw / compressed).
    pub fn ratio(&self) -> f64 {
        let compressed = self.compressed_size();
        if compressed == 0 {
            return 1.0;
        }
        self.raw_size() as f64 / compressed as f64
    }

    /// Read the compressed bytes of chunk `idx`, verifying their checksum.
    pub fn read_block(&mut self, idx: u64) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::new();
        self.read_block_into(idx, &mut out)?;
        Ok(out)
    }

    fn read_block_into(&mut self, idx: u64, out: &mut Vec<u8>) -> Result<BlockEntry, FormatError> {
        let entry = self
            .entries
            .get(idx as usize)
            .ok_or(FormatError::ChunkOutOfRange {
                index: idx,
                total: self.header.chunk_count,
            })?
            .clone();
        self.file.seek(SeekFrom::Start(entry.offset))?;
        out.resize(entry.compressed_len as usize, 0);
        self.file.read_exact(out)?;
        if self.header.has_flag(FLAG_HAS_CHECKSUM) {
            let actual = xxh3_64(out);
            if actual != entry.checksum {
                return Err(FormatError::ChecksumMismatch {
                    index: idx,
                    expected: entry.checksum,
                    actual,
                });
            }
        }
        Ok(entry)
    }
}

impl SourceArray for SChunkReader {
    fn descriptor(&self) -> &ArrayDescriptor {
        &self.header.descriptor
    }

    fn chunk_grid(&self) -> &ChunkGrid {
        &self.grid
    }

    fn blocksize(&self) -> usize {
        self.header.profile.blocksize
    }

    fn decompress_chunk_into(&mut self, linear: u64, dest: &mut [u8]) -> Result<usize, FormatError> {
        let mut compressed = std::mem::take(&mut self.scratch);
        let result = self.read_block_into(linear, &mut compressed).and_then(|entry| {
            let raw_len = entry.raw_len as usize;
            if dest.len() < raw_len {
                return Err(FormatError::BufferTooSmall {
                    needed: raw_len,
                    available: dest.len(),
                });
            }
            let written = self.codec.decompress_into(&compressed, &mut dest[..raw_len])?;
            if written != raw_len {
                return Err(FormatError::Corrupt(format!(
                    "chunk {linear} decompressed to {written} bytes but index says {raw_len}"
                )));
            }
            Ok(written)
        });
        self.scratch = compressed;
        result
    }
}
