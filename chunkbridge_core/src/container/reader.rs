use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tracing::trace;
use xxhash_rust::xxh3::xxh3_64;

use crate::container::filter::FilterRegistry;
use crate::container::format::{
    decode_metadata, ChunkRecord, ContainerHeader, DatasetMeta, FOOTER_SIZE, HEADER_SIZE, VERSION,
};
use crate::container::selection::Hyperslab;
use crate::element::{decode_elements, Element};
use crate::error::FormatError;
use crate::grid::next_row_major;

/// Raw bytes of one stored chunk, exactly as allocated in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Stored payload followed by alignment padding.
    pub bytes: Vec<u8>,
    /// Length of the payload as written.
    pub size: u64,
    pub filter_mask: u32,
}

/// Random-access reader for container files.
///
/// # Open sequence
/// 1. Read the 32-byte header (magic, version, dataset count, metadata offset).
/// 2. Read the footer and check it agrees with the header.
/// 3. Load and decode all dataset metadata into RAM.
///
/// Chunk payloads are only touched by [`read_raw_chunk`](Self::read_raw_chunk)
/// and the typed reads, which decode exactly the chunks a selection intersects.
pub struct ContainerReader {
    file: File,
    header: ContainerHeader,
    datasets: Vec<DatasetMeta>,
    filters: Arc<FilterRegistry>,
}

impl ContainerReader {
    /// Open a container. `filters` serves the typed read path.
    pub fn open(path: impl AsRef<Path>, filters: Arc<FilterRegistry>) -> Result<Self, FormatError> {
        let mut file = File::open(path)?;

        // ── Header ─────────────────────────────────────────────────────────
        let mut header_buf = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header_buf)?;
        let header = ContainerHeader::from_bytes(&header_buf)?;
        if header.version != VERSION {
            return Err(FormatError::UnsupportedVersion {
                kind: "container",
                version: header.version,
            });
        }

        // ── Footer must point at the same metadata ─────────────────────────
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE + FOOTER_SIZE {
            return Err(FormatError::Corrupt(format!("container of {file_len} bytes is truncated")));
        }
        let metadata_end = file_len - FOOTER_SIZE;
        file.seek(SeekFrom::Start(metadata_end))?;
        let mut footer_buf = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer_buf)?;
        let footer_offset = u64::from_le_bytes(footer_buf);
        if footer_offset != header.metadata_offset
            || header.metadata_offset < HEADER_SIZE
            || header.metadata_offset > metadata_end
        {
            return Err(FormatError::Corrupt(format!(
                "metadata offset {} (footer {footer_offset}) outside {HEADER_SIZE}..={metadata_end}",
                header.metadata_offset
            )));
        }

        // ── Metadata ───────────────────────────────────────────────────────
        file.seek(SeekFrom::Start(header.metadata_offset))?;
        let mut metadata = vec![0u8; (metadata_end - header.metadata_offset) as usize];
        file.read_exact(&mut metadata)?;
        let datasets = decode_metadata(&metadata, header.dataset_count)?;

        Ok(Self {
            file,
            header,
            datasets,
            filters,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn datasets(&self) -> &[DatasetMeta] {
        &self.datasets
    }

    pub fn dataset(&self, name: &str) -> Result<&DatasetMeta, FormatError> {
        find_dataset(&self.datasets, name)
    }

    /// Read the allocated bytes of the chunk at `offset`, padding included.
    pub fn read_raw_chunk(&mut self, name: &str, offset: &[u64]) -> Result<RawChunk, FormatError> {
        let record = self.stored_record(name, offset)?.clone();
        let mut bytes = vec![0u8; record.allocated as usize];
        read_payload(&mut self.file, &record, &mut bytes)?;
        Ok(RawChunk {
            bytes,
            size: record.size,
            filter_mask: record.filter_mask,
        })
    }

    /// Like [`read_raw_chunk`](Self::read_raw_chunk), into a caller-owned buffer.
    ///
    /// Returns the number of bytes written (the allocated size) and the filter mask.
    pub fn read_raw_chunk_into(
        &mut self,
        name: &str,
        offset: &[u64],
        buf: &mut [u8],
    ) -> Result<(usize, u32), FormatError> {
        let record = self.stored_record(name, offset)?.clone();
        let allocated = record.allocated as usize;
        if buf.len() < allocated {
            return Err(FormatError::BufferTooSmall {
                needed: allocated,
                available: buf.len(),
            });
        }
        read_payload(&mut self.file, &record, &mut buf[..allocated])?;
        Ok((allocated, record.filter_mask))
    }

    /// Like [`read_raw_chunk_into`](Self::read_raw_chunk_into) without the
    /// checksum check: the bytes come back exactly as found in the file.
    /// Pair with [`check_raw_chunk`](Self::check_raw_chunk).
    pub fn read_raw_chunk_unchecked_into(
        &mut self,
        name: &str,
        offset: &[u64],
        buf: &mut [u8],
    ) -> Result<(usize, u32), FormatError> {
        let record = self.stored_record(name, offset)?.clone();
        let allocated = record.allocated as usize;
        if buf.len() < allocated {
            return Err(FormatError::BufferTooSmall {
                needed: allocated,
                available: buf.len(),
            });
        }
        read_stored(&mut self.file, &record, &mut buf[..allocated])?;
        Ok((allocated, record.filter_mask))
    }

    /// Check bytes returned by
    /// [`read_raw_chunk_unchecked_into`](Self::read_raw_chunk_unchecked_into)
    /// against the checksum recorded for the chunk.
    pub fn check_raw_chunk(&self, name: &str, offset: &[u64], bytes: &[u8]) -> Result<(), FormatError> {
        verify_stored(self.stored_record(name, offset)?, bytes)
    }

    /// Decode the elements selected by `selection` into a row-major byte buffer.
    ///
    /// Each intersecting chunk runs through the dataset's filter pipeline in
    /// reverse. Chunks that were never written read as zeros.
    pub fn read_typed(&mut self, name: &str, selection: &Hyperslab) -> Result<Vec<u8>, FormatError> {
        let meta = self.dataset(name)?;
        selection.validate(meta.shape())?;
        let nbytes = selection.num_elements() as usize * meta.element_type().size();
        let mut out = vec![0u8; nbytes];
        self.read_typed_into(name, selection, &mut out)?;
        Ok(out)
    }

    /// Like [`read_typed`](Self::read_typed), into a caller-owned buffer.
    /// Returns the number of bytes written.
    pub fn read_typed_into(
        &mut self,
        name: &str,
        selection: &Hyperslab,
        out: &mut [u8],
    ) -> Result<usize, FormatError> {
        let Self {
            file,
            datasets,
            filters,
            ..
        } = self;
        let meta = find_dataset(datasets, name)?;
        selection.validate(meta.shape())?;
        let itemsize = meta.element_type().size();
        let needed = selection.num_elements() as usize * itemsize;
        if out.len() < needed {
            return Err(FormatError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }
        let out = &mut out[..needed];

        let ndim = meta.spec.ndim();
        let chunk_dims = meta.chunk_dims();
        let out_dims = selection.dims();
        let chunk_nbytes = meta.spec.chunk_nbytes()?;

        // Per dimension: chunk coordinate → [(local coordinate, output coordinate)].
        let per_dim: Vec<BTreeMap<u64, Vec<(u64, u64)>>> = (0..ndim)
            .map(|dim| {
                let mut map: BTreeMap<u64, Vec<(u64, u64)>> = BTreeMap::new();
                for (pos, coord) in selection.coords(dim).enumerate() {
                    map.entry(coord / chunk_dims[dim])
                        .or_default()
                        .push((coord % chunk_dims[dim], pos as u64));
                }
                map
            })
            .collect();
        let chunk_keys: Vec<Vec<u64>> = per_dim.iter().map(|m| m.keys().copied().collect()).collect();
        let chunk_lens: Vec<u64> = chunk_keys.iter().map(|k| k.len() as u64).collect();

        let mut which = vec![0u64; ndim];
        let mut decoded = Vec::new();
        loop {
            let chunk_coord: Vec<u64> = (0..ndim).map(|d| chunk_keys[d][which[d] as usize]).collect();
            let offset: Vec<u64> = chunk_coord
                .iter()
                .zip(chunk_dims)
                .map(|(&c, &e)| c * e)
                .collect();
            let present = match meta.chunk(&offset) {
                Some(record) => {
                    let mut stored = vec![0u8; record.size as usize];
                    read_payload(file, record, &mut stored)?;
                    decoded = filters.decode_pipeline(
                        meta.pipeline(),
                        record.filter_mask,
                        &stored,
                        itemsize,
                        chunk_nbytes,
                    )?;
                    trace!(dataset = name, offset = ?offset, "decoded chunk");
                    true
                }
                None => false,
            };

            let lists: Vec<&Vec<(u64, u64)>> = (0..ndim).map(|d| &per_dim[d][&chunk_coord[d]]).collect();
            let list_lens: Vec<u64> = lists.iter().map(|l| l.len() as u64).collect();
            let mut elem = vec![0u64; ndim];
            loop {
                let mut src = 0u64;
                let mut dst = 0u64;
                for d in 0..ndim {
                    let (local, pos) = lists[d][elem[d] as usize];
                    src = src * chunk_dims[d] + local;
                    dst = dst * out_dims[d] + pos;
                }
                let dst = dst as usize * itemsize;
                let target = &mut out[dst..dst + itemsize];
                if present {
                    let src = src as usize * itemsize;
                    target.copy_from_slice(&decoded[src..src + itemsize]);
                } else {
                    target.fill(0);
                }
                if !next_row_major(&mut elem, &list_lens) {
                    break;
                }
            }

            if !next_row_major(&mut which, &chunk_lens) {
                break;
            }
        }
        Ok(needed)
    }

    /// Typed read into Rust values. The dataset's element type must be `T`'s.
    pub fn read_typed_as<T: Element>(
        &mut self,
        name: &str,
        selection: &Hyperslab,
    ) -> Result<Vec<T>, FormatError> {
        let stored = self.dataset(name)?.element_type();
        if stored != T::TYPE {
            return Err(FormatError::TypeMismatch {
                stored: stored.name(),
                requested: T::TYPE.name(),
            });
        }
        let bytes = self.read_typed(name, selection)?;
        Ok(decode_elements(&bytes))
    }

    fn stored_record(&self, name: &str, offset: &[u64]) -> Result<&ChunkRecord, FormatError> {
        let meta = self.dataset(name)?;
        meta.check_chunk_offset(offset)?;
        meta.chunk(offset)
            .ok_or_else(|| FormatError::MissingChunk(offset.to_vec()))
    }
}

fn find_dataset<'a>(datasets: &'a [DatasetMeta], name: &str) -> Result<&'a DatasetMeta, FormatError> {
    datasets
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| FormatError::UnknownDataset(name.to_string()))
}

/// Read `buf.len()` bytes at the record's address and verify the stored part.
fn read_payload(file: &mut File, record: &ChunkRecord, buf: &mut [u8]) -> Result<(), FormatError> {
    read_stored(file, record, buf)?;
    verify_stored(record, buf)
}

fn read_stored(file: &mut File, record: &ChunkRecord, buf: &mut [u8]) -> Result<(), FormatError> {
    file.seek(SeekFrom::Start(record.address))?;
    file.read_exact(buf)?;
    Ok(())
}

fn verify_stored(record: &ChunkRecord, buf: &[u8]) -> Result<(), FormatError> {
    let stored = &buf[..(record.size as usize).min(buf.len())];
    let actual = xxh3_64(stored);
    if actual != record.checksum {
        return Err(FormatError::ChecksumMismatch {
            index: record.address,
            expected: record.checksum,
            actual,
        });
    }
    Ok(())
}
