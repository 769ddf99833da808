use serde::Serialize;
use tracing::{info, warn};

use crate::codec::BlockCodec;
use crate::container::ContainerReader;
use crate::descriptor::ArrayDescriptor;
use crate::error::{BridgeError, ChunkId};
use crate::grid::next_row_major;
use crate::reader::ChunkStoreReader;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Stop at the first mismatching element.
    pub fail_fast: bool,
    /// Also compare padding elements outside the logical array.
    pub include_padding: bool,
}

/// One element on which the two read paths disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub chunk: ChunkId,
    /// Element offset within the chunk, row-major over the extended chunk shape.
    pub element: u64,
    pub raw: Vec<u8>,
    pub filtered: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub dataset: String,
    pub chunks_checked: u64,
    pub elements_compared: u64,
    /// Bytes produced by the raw path.
    pub bytes_raw: u64,
    /// Bytes produced by the filtered path.
    pub bytes_filtered: u64,
    pub violations: Vec<Violation>,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    /// The report itself when consistent, else the first violation as an error.
    pub fn into_result(self) -> Result<Self, BridgeError> {
        match self.violations.first() {
            None => Ok(self),
            Some(v) => Err(BridgeError::ConsistencyViolation {
                chunk: v.chunk.clone(),
                element: v.element,
            }),
        }
    }
}

/// Per-pass buffers, sized once and reused for every chunk.
struct Scratch {
    stored: Vec<u8>,
    raw: Vec<u8>,
    filtered: Vec<u8>,
}

/// Compares, chunk by chunk and element by element, the raw and filtered
/// read paths over a bridged dataset.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyVerifier {
    options: VerifyOptions,
}

impl ConsistencyVerifier {
    pub fn new(options: VerifyOptions) -> Self {
        Self { options }
    }

    /// Run both paths over every chunk of `dataset` in linear order.
    ///
    /// Read failures abort the pass with the path's error. Mismatches do not:
    /// they are collected into the report (only the first one when
    /// `fail_fast` is set).
    pub fn verify(
        &self,
        container: &mut ContainerReader,
        codec: &dyn BlockCodec,
        dataset: &str,
        descriptor: &ArrayDescriptor,
    ) -> Result<VerificationReport, BridgeError> {
        let mut reader = ChunkStoreReader::new(container, codec, dataset, descriptor)?;
        let itemsize = descriptor.itemsize();
        let mut scratch = Scratch {
            stored: vec![0u8; reader.stored_buffer_len()],
            raw: vec![0u8; reader.chunk_nbytes()],
            filtered: vec![0u8; reader.chunk_nbytes()],
        };
        let mut report = VerificationReport {
            dataset: dataset.to_string(),
            ..Default::default()
        };

        let total = reader.grid().total_chunks();
        'chunks: for linear in 0..total {
            let raw_len = reader.read_raw_into(linear, &mut scratch.stored, &mut scratch.raw)?;
            let filtered_len = reader.read_filtered_into(linear, &mut scratch.filtered)?;
            report.chunks_checked += 1;
            report.bytes_raw += raw_len as u64;
            report.bytes_filtered += filtered_len as u64;

            let chunk = reader.chunk_id(linear)?;
            let grid = reader.grid();
            let ext = grid.ext_chunk_shape();
            let extent = if self.options.include_padding {
                ext.to_vec()
            } else {
                grid.logical_extent(&chunk.multi)
            };

            let ndim = ext.len();
            let mut local = vec![0u64; ndim];
            loop {
                let mut element = 0u64;
                for d in 0..ndim {
                    element = element * ext[d] + local[d];
                }
                let at = element as usize * itemsize;
                let raw = &scratch.raw[at..at + itemsize];
                let filtered = &scratch.filtered[at..at + itemsize];
                report.elements_compared += 1;
                if raw != filtered {
                    warn!(dataset, chunk = %chunk, element, "read paths disagree");
                    report.violations.push(Violation {
                        chunk: chunk.clone(),
                        element,
                        raw: raw.to_vec(),
                        filtered: filtered.to_vec(),
                    });
                    if self.options.fail_fast {
                        break 'chunks;
                    }
                }
                if !next_row_major(&mut local, &extent) {
                    break;
                }
            }
        }

        info!(
            dataset,
            chunks = report.chunks_checked,
            elements = report.elements_compared,
            violations = report.violations.len(),
            "verification pass complete"
        );
        Ok(report)
    }
}
