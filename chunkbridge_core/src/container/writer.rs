use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;

use crate::container::filter::FilterRegistry;
use crate::container::format::{
    align_up, encode_metadata, ChunkRecord, ContainerHeader, DatasetMeta, DatasetSpec, HEADER_SIZE,
    VERSION,
};
use crate::error::FormatError;
use crate::grid::next_row_major;

/// Streaming writer for container files.
///
/// # Format layout written
/// ```text
/// [HEADER: 32 bytes placeholder]
/// [CHUNK] [pad] [CHUNK] [pad] ...          ← each payload starts on a 64-byte boundary
/// [METADATA: datasets, pipelines, chunk records]
/// [FOOTER: 8 bytes, u64 LE offset of metadata]
/// ← seek back to 0, overwrite header with real values
/// ```
///
/// Chunks are appended in the order they are written. Rewriting a chunk
/// appends the new payload and replaces the record; the old bytes stay in
/// the file unreferenced.
pub struct ContainerWriter {
    file: BufWriter<File>,
    datasets: Vec<DatasetMeta>,
    filters: Option<Arc<FilterRegistry>>,
    current_offset: u64,
}

impl ContainerWriter {
    /// Create a new container at `path`, overwriting any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&[0u8; HEADER_SIZE as usize])?;
        Ok(Self {
            file,
            datasets: Vec::new(),
            filters: None,
            current_offset: HEADER_SIZE,
        })
    }

    /// Filters used by [`ContainerWriter::write_typed`].
    pub fn with_filters(mut self, filters: Arc<FilterRegistry>) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn create_dataset(&mut self, name: &str, spec: DatasetSpec) -> Result<(), FormatError> {
        if self.datasets.iter().any(|d| d.name == name) {
            return Err(FormatError::DuplicateDataset(name.to_string()));
        }
        if self.datasets.len() >= u16::MAX as usize {
            return Err(FormatError::InvalidLayout("too many datasets".into()));
        }
        spec.validate()?;
        debug!(
            dataset = name,
            shape = ?spec.shape,
            chunks = ?spec.chunk_dims,
            element = %spec.element_type,
            filters = spec.pipeline.len(),
            "created dataset"
        );
        self.datasets.push(DatasetMeta::new(name.to_string(), spec));
        Ok(())
    }

    pub fn dataset(&self, name: &str) -> Result<&DatasetMeta, FormatError> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| FormatError::UnknownDataset(name.to_string()))
    }

    /// Store `bytes` verbatim as the chunk whose origin is `offset`.
    ///
    /// No filter runs; `filter_mask` records which pipeline filters the
    /// caller did *not* apply, exactly as a typed read must honour it.
    pub fn write_raw_chunk(
        &mut self,
        name: &str,
        offset: &[u64],
        filter_mask: u32,
        bytes: &[u8],
    ) -> Result<(), FormatError> {
        let index = self.dataset_index(name)?;
        self.datasets[index].check_chunk_offset(offset)?;
        let record = self.append_payload(offset, filter_mask, bytes)?;
        trace!(
            dataset = name,
            offset = ?offset,
            address = record.address,
            size = record.size,
            "stored raw chunk"
        );
        self.datasets[index].chunks.insert(offset.to_vec(), record);
        Ok(())
    }

    /// Write a whole dataset from its row-major element bytes, running every
    /// chunk through the filter pipeline.
    pub fn write_typed(&mut self, name: &str, data: &[u8]) -> Result<(), FormatError> {
        let index = self.dataset_index(name)?;
        let spec = self.datasets[index].spec.clone();
        let itemsize = spec.element_type.size();
        let expected = spec
            .shape
            .iter()
            .try_fold(itemsize as u64, |acc, &s| acc.checked_mul(s))
            .ok_or_else(|| FormatError::InvalidLayout("dataset byte size overflows".into()))?;
        if data.len() as u64 != expected {
            return Err(FormatError::InvalidLayout(format!(
                "dataset {name:?} holds {expected} bytes, got {}",
                data.len()
            )));
        }
        let filters = self.filters.clone().unwrap_or_default();

        let ndim = spec.ndim();
        let grid: Vec<u64> = spec.shape.iter().zip(&spec.chunk_dims).map(|(&s, &c)| s / c).collect();
        let mut chunk_buf = Vec::with_capacity(spec.chunk_nbytes()?);
        let mut coord = vec![0u64; ndim];
        loop {
            let offset: Vec<u64> = coord.iter().zip(&spec.chunk_dims).map(|(&g, &c)| g * c).collect();
            gather_chunk(&spec.shape, &spec.chunk_dims, &offset, itemsize, data, &mut chunk_buf);
            let (stored, mask) = filters.encode_pipeline(&spec.pipeline, &chunk_buf, itemsize)?;
            let record = self.append_payload(&offset, mask, &stored)?;
            self.datasets[index].chunks.insert(offset, record);
            if !next_row_major(&mut coord, &grid) {
                break;
            }
        }
        debug!(dataset = name, chunks = self.datasets[index].chunks.len(), "typed write complete");
        Ok(())
    }

    fn dataset_index(&self, name: &str) -> Result<usize, FormatError> {
        self.datasets
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| FormatError::UnknownDataset(name.to_string()))
    }

    fn append_payload(
        &mut self,
        offset: &[u64],
        filter_mask: u32,
        bytes: &[u8],
    ) -> Result<ChunkRecord, FormatError> {
        let address = align_up(self.current_offset);
        self.write_zeros(address - self.current_offset)?;
        self.file.write_all(bytes)?;
        let size = bytes.len() as u64;
        let allocated = align_up(size);
        self.current_offset = address + size;
        self.write_zeros(allocated - size)?;
        Ok(ChunkRecord {
            offset: offset.to_vec(),
            address,
            size,
            allocated,
            filter_mask,
            checksum: xxh3_64(bytes),
        })
    }

    fn write_zeros(&mut self, n: u64) -> Result<(), FormatError> {
        const ZEROS: [u8; 64] = [0; 64];
        let mut left = n;
        while left > 0 {
            let step = left.min(ZEROS.len() as u64);
            self.file.write_all(&ZEROS[..step as usize])?;
            left -= step;
        }
        self.current_offset += n;
        Ok(())
    }

    /// Write the metadata and footer, then seal the file with the final header.
    ///
    /// Returns the number of chunks stored across all datasets.
    pub fn finish(mut self) -> Result<u64, FormatError> {
        let metadata_offset = self.current_offset;
        let metadata = encode_metadata(&self.datasets)?;
        self.file.write_all(&metadata)?;
        self.file.write_all(&metadata_offset.to_le_bytes())?;

        let header = ContainerHeader {
            version: VERSION,
            dataset_count: self.datasets.len() as u16,
            metadata_offset,
        };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.flush()?;

        let chunks = self.datasets.iter().map(|d| d.chunks.len() as u64).sum();
        debug!(datasets = self.datasets.len(), chunks, "container sealed");
        Ok(chunks)
    }
}

/// Copy the chunk at `offset` out of a row-major array into `out`.
fn gather_chunk(
    shape: &[u64],
    chunk_dims: &[u64],
    offset: &[u64],
    itemsize: usize,
    data: &[u8],
    out: &mut Vec<u8>,
) {
    out.clear();
    let ndim = shape.len();
    let row = chunk_dims[ndim - 1] as usize * itemsize;
    let outer: Vec<u64> = chunk_dims[..ndim - 1].to_vec();
    let mut local = vec![0u64; ndim - 1];
    loop {
        let mut src = 0u64;
        for dim in 0..ndim {
            let coord = offset[dim] + if dim < ndim - 1 { local[dim] } else { 0 };
            src = src * shape[dim] + coord;
        }
        let start = src as usize * itemsize;
        out.extend_from_slice(&data[start..start + row]);
        if !next_row_major(&mut local, &outer) {
            break;
        }
    }
}
