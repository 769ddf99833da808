//! Chunk-grid indexing and compressed-block bridging between a chunked array
//! source and a chunked container, with two independent read paths.

pub mod codec;
pub mod container;
pub mod descriptor;
pub mod element;
pub mod error;
pub mod frame;
pub mod grid;
pub mod profile;
pub mod reader;
pub mod schunk;
pub mod source;
pub mod verify;
mod wire;
pub mod writer;

pub use codec::BlockCodec;
pub use container::{ContainerReader, ContainerWriter, Filter, FilterDescription, FilterRegistry, Hyperslab};
pub use descriptor::ArrayDescriptor;
pub use element::{Element, ElementType};
pub use error::{BridgeError, ChunkId, CodecError, FormatError};
pub use grid::ChunkGrid;
pub use profile::{CompressionProfile, Compressor, FilterParams};
pub use reader::ChunkStoreReader;
pub use schunk::{SChunkReader, SChunkWriter};
pub use source::{DenseSource, SourceArray};
pub use verify::{ConsistencyVerifier, VerificationReport, VerifyOptions, Violation};
pub use writer::{ChunkStoreWriter, WriteSummary};
