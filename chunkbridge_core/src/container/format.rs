use std::collections::BTreeMap;

use crate::container::filter::FilterDescription;
use crate::element::ElementType;
use crate::error::FormatError;
use crate::wire::{self, WireReader};

/// Magic bytes opening every container file.
pub const MAGIC: &[u8; 8] = b"CBCONTv1";

pub const VERSION: u16 = 1;

/// Fixed size of the container header in bytes.
///   magic[8] + version:u16 + dataset_count:u16 + reserved[4]
///   + metadata_offset:u64 + reserved[8]
///   = 8 + 2 + 2 + 4 + 8 + 8 = 32
pub const HEADER_SIZE: u64 = 32;

/// Size of the footer (single u64 metadata offset) in bytes.
pub const FOOTER_SIZE: u64 = 8;

/// Chunk payloads start on this boundary; the gap is zero-filled and counted
/// in the chunk's allocated size.
pub const CHUNK_ALIGN: u64 = 64;

/// Pipelines are capped by the width of the per-chunk filter mask.
pub const MAX_FILTERS: usize = 32;

pub fn align_up(n: u64) -> u64 {
    n.div_ceil(CHUNK_ALIGN) * CHUNK_ALIGN
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u16,
    pub dataset_count: u16,
    pub metadata_offset: u64,
}

impl ContainerHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.dataset_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.metadata_offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self, FormatError> {
        if &buf[..8] != MAGIC {
            return Err(FormatError::BadMagic("container"));
        }
        let mut r = WireReader::new(&buf[8..]);
        let version = r.u16()?;
        let dataset_count = r.u16()?;
        r.take(4)?;
        let metadata_offset = r.u64()?;
        Ok(Self {
            version,
            dataset_count,
            metadata_offset,
        })
    }
}

/// Everything fixed at dataset creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    pub element_type: ElementType,
    /// Dataspace extent; a whole number of chunks along every dimension.
    pub shape: Vec<u64>,
    pub chunk_dims: Vec<u64>,
    pub pipeline: Vec<FilterDescription>,
    /// Small named integer vectors stored alongside the dataset.
    pub attributes: BTreeMap<String, Vec<u64>>,
}

impl DatasetSpec {
    pub fn new(element_type: ElementType, shape: Vec<u64>, chunk_dims: Vec<u64>) -> Self {
        Self {
            element_type,
            shape,
            chunk_dims,
            pipeline: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn filter(mut self, desc: FilterDescription) -> Self {
        self.pipeline.push(desc);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, values: Vec<u64>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        let ndim = self.shape.len();
        if ndim == 0 || ndim > u8::MAX as usize {
            return Err(FormatError::InvalidLayout(format!("unsupported rank {ndim}")));
        }
        if self.chunk_dims.len() != ndim {
            return Err(FormatError::InvalidLayout(format!(
                "chunk dims have rank {}, dataspace has rank {ndim}",
                self.chunk_dims.len()
            )));
        }
        if self.element_type.size() == 0 {
            return Err(FormatError::InvalidLayout("zero-size element type".into()));
        }
        for (dim, (&extent, &chunk)) in self.shape.iter().zip(&self.chunk_dims).enumerate() {
            if extent == 0 || chunk == 0 {
                return Err(FormatError::InvalidLayout(format!(
                    "dimension {dim} has zero extent"
                )));
            }
            if extent % chunk != 0 {
                return Err(FormatError::InvalidLayout(format!(
                    "dimension {dim}: extent {extent} is not a multiple of chunk extent {chunk}"
                )));
            }
        }
        if self.pipeline.len() > MAX_FILTERS {
            return Err(FormatError::InvalidLayout(format!(
                "pipeline has {} filters, at most {MAX_FILTERS} are supported",
                self.pipeline.len()
            )));
        }
        self.chunk_nbytes().map(|_| ())
    }

    /// Bytes in one decoded chunk.
    pub fn chunk_nbytes(&self) -> Result<usize, FormatError> {
        self.chunk_dims
            .iter()
            .try_fold(self.element_type.size() as u64, |acc, &c| acc.checked_mul(c))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| FormatError::InvalidLayout("chunk byte size overflows".into()))
    }
}

/// Location and state of one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Dataspace coordinate of the chunk's first element.
    pub offset: Vec<u64>,
    /// Byte address of the payload in the file.
    pub address: u64,
    /// Bytes written by the caller.
    pub size: u64,
    /// Bytes reserved for the payload, including alignment padding.
    pub allocated: u64,
    /// Bit `i` set: pipeline filter `i` was not applied to this chunk.
    pub filter_mask: u32,
    /// xxh3-64 of the `size` stored bytes.
    pub checksum: u64,
}

/// A dataset as recorded in container metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMeta {
    pub name: String,
    pub spec: DatasetSpec,
    pub chunks: BTreeMap<Vec<u64>, ChunkRecord>,
}

impl DatasetMeta {
    pub fn new(name: String, spec: DatasetSpec) -> Self {
        Self {
            name,
            spec,
            chunks: BTreeMap::new(),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.spec.element_type
    }

    pub fn shape(&self) -> &[u64] {
        &self.spec.shape
    }

    pub fn chunk_dims(&self) -> &[u64] {
        &self.spec.chunk_dims
    }

    pub fn pipeline(&self) -> &[FilterDescription] {
        &self.spec.pipeline
    }

    pub fn attribute(&self, name: &str) -> Option<&[u64]> {
        self.spec.attributes.get(name).map(Vec::as_slice)
    }

    pub fn chunk(&self, offset: &[u64]) -> Option<&ChunkRecord> {
        self.chunks.get(offset)
    }

    /// Number of chunk slots in the dataspace.
    pub fn chunk_capacity(&self) -> u64 {
        self.spec
            .shape
            .iter()
            .zip(&self.spec.chunk_dims)
            .map(|(&s, &c)| s / c)
            .product()
    }

    pub fn stored_bytes(&self) -> u64 {
        self.chunks.values().map(|c| c.size).sum()
    }

    /// Fails unless `offset` is the origin of a chunk inside the dataspace.
    pub fn check_chunk_offset(&self, offset: &[u64]) -> Result<(), FormatError> {
        let aligned = offset.len() == self.spec.ndim()
            && offset
                .iter()
                .zip(self.spec.shape.iter().zip(&self.spec.chunk_dims))
                .all(|(&o, (&s, &c))| o % c == 0 && o < s);
        if aligned {
            Ok(())
        } else {
            Err(FormatError::InvalidChunkOffset(offset.to_vec()))
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        let spec = &self.spec;
        wire::put_string(out, &self.name)?;
        spec.element_type.encode(out);
        out.push(spec.ndim() as u8);
        wire::put_u64s(out, &spec.shape);
        wire::put_u64s(out, &spec.chunk_dims);

        wire::put_u16(out, spec.pipeline.len() as u16);
        for desc in &spec.pipeline {
            wire::put_u16(out, desc.id);
            wire::put_u16(out, desc.flags);
            let n = u16::try_from(desc.cd_values.len()).map_err(|_| {
                FormatError::InvalidLayout(format!("filter {} has too many parameters", desc.id))
            })?;
            wire::put_u16(out, n);
            for &v in &desc.cd_values {
                wire::put_u32(out, v);
            }
        }

        let n_attrs = u16::try_from(spec.attributes.len())
            .map_err(|_| FormatError::InvalidLayout("too many attributes".into()))?;
        wire::put_u16(out, n_attrs);
        for (name, values) in &spec.attributes {
            wire::put_string(out, name)?;
            let n = u16::try_from(values.len())
                .map_err(|_| FormatError::InvalidLayout(format!("attribute {name:?} is too long")))?;
            wire::put_u16(out, n);
            wire::put_u64s(out, values);
        }

        wire::put_u64(out, self.chunks.len() as u64);
        for record in self.chunks.values() {
            wire::put_u64s(out, &record.offset);
            wire::put_u64(out, record.address);
            wire::put_u64(out, record.size);
            wire::put_u64(out, record.allocated);
            wire::put_u32(out, record.filter_mask);
            wire::put_u64(out, record.checksum);
        }
        Ok(())
    }

    pub(crate) fn decode(r: &mut WireReader<'_>) -> Result<Self, FormatError> {
        let name = r.string()?;
        let element_type = ElementType::decode(r)?;
        let ndim = r.u8()? as usize;
        let shape = r.u64s(ndim)?;
        let chunk_dims = r.u64s(ndim)?;

        let n_filters = r.u16()? as usize;
        let mut pipeline = Vec::with_capacity(n_filters);
        for _ in 0..n_filters {
            let id = r.u16()?;
            let flags = r.u16()?;
            let n = r.u16()? as usize;
            let cd_values = (0..n).map(|_| r.u32()).collect::<Result<Vec<_>, _>>()?;
            pipeline.push(FilterDescription { id, flags, cd_values });
        }

        let n_attrs = r.u16()? as usize;
        let mut attributes = BTreeMap::new();
        for _ in 0..n_attrs {
            let key = r.string()?;
            let n = r.u16()? as usize;
            attributes.insert(key, r.u64s(n)?);
        }

        let spec = DatasetSpec {
            element_type,
            shape,
            chunk_dims,
            pipeline,
            attributes,
        };
        spec.validate()
            .map_err(|e| FormatError::Corrupt(format!("dataset {name:?}: {e}")))?;

        let n_chunks = r.u64()?;
        let mut meta = DatasetMeta::new(name, spec);
        for _ in 0..n_chunks {
            let record = ChunkRecord {
                offset: r.u64s(ndim)?,
                address: r.u64()?,
                size: r.u64()?,
                allocated: r.u64()?,
                filter_mask: r.u32()?,
                checksum: r.u64()?,
            };
            if record.size > record.allocated {
                return Err(FormatError::Corrupt(format!(
                    "chunk at {:?} stores {} bytes in {} allocated",
                    record.offset, record.size, record.allocated
                )));
            }
            meta.check_chunk_offset(&record.offset)
                .map_err(|_| FormatError::Corrupt(format!("misaligned chunk at {:?}", record.offset)))?;
            meta.chunks.insert(record.offset.clone(), record);
        }
        Ok(meta)
    }
}

pub(crate) fn encode_metadata(datasets: &[DatasetMeta]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::new();
    for dataset in datasets {
        dataset.encode(&mut out)?;
    }
    Ok(out)
}

pub(crate) fn decode_metadata(buf: &[u8], count: u16) -> Result<Vec<DatasetMeta>, FormatError> {
    let mut r = WireReader::new(buf);
    let datasets = (0..count)
        .map(|_| DatasetMeta::decode(&mut r))
        .collect::<Result<Vec<_>, _>>()?;
    if !r.is_empty() {
        return Err(FormatError::Corrupt("trailing bytes after dataset metadata".into()));
    }
    Ok(datasets)
}
