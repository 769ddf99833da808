//! Single-file chunked container holding named datasets.
//!
//! A dataset has a fixed dataspace, a regular chunk layout and a filter
//! pipeline. Chunks can be written two ways: verbatim through
//! [`ContainerWriter::write_raw_chunk`], bypassing the pipeline, or through
//! [`ContainerWriter::write_typed`], which runs it. Both are read back either
//! verbatim or through a typed, hyperslab-selected read that inverts the
//! pipeline transparently.

mod filter;
mod format;
mod reader;
mod selection;
mod writer;

pub use filter::{Filter, FilterDescription, FilterRegistry};
pub use format::{
    align_up, ChunkRecord, ContainerHeader, DatasetMeta, DatasetSpec, CHUNK_ALIGN, HEADER_SIZE,
    MAGIC, MAX_FILTERS,
};
pub use reader::{ContainerReader, RawChunk};
pub use selection::Hyperslab;
pub use writer::ContainerWriter;
