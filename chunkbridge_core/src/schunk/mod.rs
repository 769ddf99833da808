//! Super-chunk files: a compressed array persisted chunk by chunk.

mod format;
mod reader;
mod writer;

pub use format::{BlockEntry, SChunkHeader, MAGIC};
pub use reader::SChunkReader;
pub use writer::SChunkWriter;
