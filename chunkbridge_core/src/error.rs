use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a single chunk by its linear index and its grid coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkId {
    pub linear: u64,
    pub multi: Vec<u64>,
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}", self.linear, self.multi)
    }
}

/// Failures raised by a block codec or by the compressed-block framing layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The header length field cannot be trusted to bound the block.
    #[error("block header declares {declared} bytes but the buffer holds {available}")]
    Framing { declared: i64, available: usize },

    #[error("unrecognised block header: {0}")]
    BadHeader(String),

    #[error("unknown compressor code {0}")]
    UnknownCompressor(u8),

    #[error("invalid codec parameters: {0}")]
    InvalidParams(String),
}

impl CodecError {
    /// True for errors that concern the block envelope rather than its payload.
    pub fn is_framing(&self) -> bool {
        matches!(self, CodecError::Framing { .. } | CodecError::BadHeader(_))
    }
}

/// Failures of the two on-disk formats (super-chunk source files and containers).
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic bytes, not a {0} file")]
    BadMagic(&'static str),

    #[error("unsupported {kind} version {version}")]
    UnsupportedVersion { kind: &'static str, version: u16 },

    #[error("corrupt metadata: {0}")]
    Corrupt(String),

    #[error("block {index} checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch { index: u64, expected: u64, actual: u64 },

    #[error("chunk index {index} out of range (total {total})")]
    ChunkOutOfRange { index: u64, total: u64 },

    #[error("no dataset named {0:?}")]
    UnknownDataset(String),

    #[error("dataset {0:?} already exists")]
    DuplicateDataset(String),

    #[error("invalid dataset layout: {0}")]
    InvalidLayout(String),

    #[error("offset {0:?} is not a chunk origin of the dataset")]
    InvalidChunkOffset(Vec<u64>),

    #[error("no chunk stored at offset {0:?}")]
    MissingChunk(Vec<u64>),

    #[error("invalid selection: {0}")]
    Selection(String),

    #[error("element type mismatch: dataset holds {stored}, requested {requested}")]
    TypeMismatch {
        stored: &'static str,
        requested: &'static str,
    },

    #[error("buffer of {available} bytes cannot hold {needed} bytes")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("filter {0} is not registered")]
    UnregisteredFilter(u16),

    #[error("filter {id} ({name}) failed")]
    Filter {
        id: u16,
        name: &'static str,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors surfaced by the chunk store protocol.
///
/// Every per-chunk failure names the offending chunk; a pass aborts on the
/// first one.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("linear chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: u64, total: u64 },

    #[error("chunk {chunk}: source chunk could not be decoded")]
    SourceRead {
        chunk: ChunkId,
        #[source]
        source: FormatError,
    },

    #[error("chunk {chunk}: compression failed")]
    Compression {
        chunk: ChunkId,
        #[source]
        source: CodecError,
    },

    #[error("chunk {chunk}: container write failed")]
    ContainerWrite {
        chunk: ChunkId,
        #[source]
        source: FormatError,
    },

    #[error("chunk {chunk}: raw chunk read failed")]
    RawRead {
        chunk: ChunkId,
        #[source]
        source: FormatError,
    },

    #[error("chunk {chunk}: compressed block framing is invalid")]
    Framing {
        chunk: ChunkId,
        #[source]
        source: CodecError,
    },

    #[error("chunk {chunk}: decompression failed")]
    Decompression {
        chunk: ChunkId,
        #[source]
        source: CodecError,
    },

    #[error("chunk {chunk}: filtered read failed")]
    FilteredRead {
        chunk: ChunkId,
        #[source]
        source: FormatError,
    },

    #[error("chunk {chunk}: raw and filtered paths disagree at element {element}")]
    ConsistencyViolation { chunk: ChunkId, element: u64 },

    /// Container failures that are not tied to a chunk (open, dataset creation, finish).
    #[error("container error")]
    Container(#[from] FormatError),
}

impl BridgeError {
    /// The chunk this error is attributed to, if any.
    pub fn chunk(&self) -> Option<&ChunkId> {
        match self {
            BridgeError::SourceRead { chunk, .. }
            | BridgeError::Compression { chunk, .. }
            | BridgeError::ContainerWrite { chunk, .. }
            | BridgeError::RawRead { chunk, .. }
            | BridgeError::Framing { chunk, .. }
            | BridgeError::Decompression { chunk, .. }
            | BridgeError::FilteredRead { chunk, .. }
            | BridgeError::ConsistencyViolation { chunk, .. } => Some(chunk),
            BridgeError::InvalidShape(_)
            | BridgeError::IndexOutOfRange { .. }
            | BridgeError::Container(_) => None,
        }
    }
}
