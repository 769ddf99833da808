//! Compressed-block framing.
//!
//! Every compressed chunk starts with a 16-byte little-endian header:
//!
//! ```text
//! byte  0      version      format marker, FORMAT_VERSION
//! byte  1      versionlz    backend stream version
//! byte  2      flags        bit 0 shuffle, bit 1 memcpyed, bits 5..7 compressor code
//! byte  3      typesize     1..=255
//! bytes 4..8   nbytes       i32, uncompressed length
//! bytes 8..12  blocksize    i32
//! bytes 12..16 cbytes       i32, total block length including this header
//! ```
//!
//! Unless the memcpyed flag is set, `nblocks` i32 block-start offsets follow
//! the header, and each block is stored as `[csize: i32][payload]`.
//!
//! Storage may hand back more bytes than a block occupies (alignment padding,
//! worst-case read buffers). `cbytes` is the only trustworthy bound.

use crate::error::CodecError;

pub const HEADER_LEN: usize = 16;
pub const FORMAT_VERSION: u8 = 2;
pub const VERSION_LZ: u8 = 1;

pub const FLAG_SHUFFLE: u8 = 0x01;
pub const FLAG_MEMCPYED: u8 = 0x02;
const COMPCODE_SHIFT: u8 = 5;
const COMPCODE_MASK: u8 = 0b111 << COMPCODE_SHIFT;

/// Item sizes above this are recorded as 1 and never shuffled.
pub const MAX_TYPESIZE: usize = 255;

/// Smallest internal block the codec will split a chunk into.
pub const MIN_BLOCKSIZE: usize = 256;

/// Byte width of a block-start entry and of a per-block length prefix.
pub const BSTART_LEN: usize = 4;

/// Largest uncompressed buffer a block header can describe.
pub const MAX_BUFFERSIZE: usize = i32::MAX as usize - 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u8,
    pub versionlz: u8,
    pub flags: u8,
    pub typesize: u8,
    pub nbytes: i32,
    pub blocksize: i32,
    pub cbytes: i32,
}

impl BlockHeader {
    pub fn new(flags: u8, compcode: u8, typesize: u8, nbytes: usize, blocksize: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            versionlz: VERSION_LZ,
            flags: (flags & !COMPCODE_MASK) | ((compcode << COMPCODE_SHIFT) & COMPCODE_MASK),
            typesize,
            nbytes: nbytes as i32,
            blocksize: blocksize as i32,
            cbytes: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.versionlz;
        buf[2] = self.flags;
        buf[3] = self.typesize;
        buf[4..8].copy_from_slice(&self.nbytes.to_le_bytes());
        buf[8..12].copy_from_slice(&self.blocksize.to_le_bytes());
        buf[12..16].copy_from_slice(&self.cbytes.to_le_bytes());
        buf
    }

    /// Parse and sanity-check the fixed header at the start of `buf`.
    ///
    /// Checks the format marker and the internal consistency of the size
    /// fields, but not `cbytes` against `buf`; see [`header_declared_length`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::BadHeader(format!(
                "need {HEADER_LEN} header bytes, got {}",
                buf.len()
            )));
        }
        let header = Self {
            version: buf[0],
            versionlz: buf[1],
            flags: buf[2],
            typesize: buf[3],
            nbytes: read_i32(buf, 4),
            blocksize: read_i32(buf, 8),
            cbytes: read_i32(buf, 12),
        };
        if header.version != FORMAT_VERSION {
            return Err(CodecError::BadHeader(format!(
                "unknown format marker {:#04x}",
                header.version
            )));
        }
        if header.typesize == 0 {
            return Err(CodecError::BadHeader("zero typesize".into()));
        }
        if header.nbytes < 0 || header.blocksize < 0 {
            return Err(CodecError::BadHeader(format!(
                "negative sizes (nbytes {}, blocksize {})",
                header.nbytes, header.blocksize
            )));
        }
        if header.nbytes > 0 && !header.is_memcpyed() && header.blocksize == 0 {
            return Err(CodecError::BadHeader("zero blocksize for a compressed payload".into()));
        }
        Ok(header)
    }

    pub fn is_shuffled(&self) -> bool {
        self.flags & FLAG_SHUFFLE != 0
    }

    pub fn is_memcpyed(&self) -> bool {
        self.flags & FLAG_MEMCPYED != 0
    }

    pub fn compressor_code(&self) -> u8 {
        (self.flags & COMPCODE_MASK) >> COMPCODE_SHIFT
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes as usize
    }

    pub fn blocksize(&self) -> usize {
        self.blocksize as usize
    }

    pub fn nblocks(&self) -> usize {
        if self.is_memcpyed() || self.nbytes == 0 {
            0
        } else {
            self.nbytes().div_ceil(self.blocksize())
        }
    }

    /// Smallest `cbytes` consistent with the rest of the header.
    pub fn min_cbytes(&self) -> usize {
        if self.is_memcpyed() {
            HEADER_LEN + self.nbytes()
        } else {
            HEADER_LEN + self.nblocks() * 2 * BSTART_LEN
        }
    }
}

/// Read the block length recorded in a compressed block's header.
///
/// Fails when the header is not ours, or when the declared length is smaller
/// than the header implies or larger than `buf`.
pub fn header_declared_length(buf: &[u8]) -> Result<usize, CodecError> {
    let header = BlockHeader::from_bytes(buf)?;
    let declared = header.cbytes;
    if declared <= 0 || (declared as usize) < header.min_cbytes() || declared as usize > buf.len() {
        return Err(CodecError::Framing {
            declared: declared as i64,
            available: buf.len(),
        });
    }
    Ok(declared as usize)
}

/// Upper bound on the size of a compressed block holding `nbytes` raw bytes.
pub fn max_compressed_len(nbytes: usize) -> usize {
    let max_blocks = nbytes.div_ceil(MIN_BLOCKSIZE);
    HEADER_LEN + max_blocks * 2 * BSTART_LEN + nbytes
}

pub(crate) fn read_i32(buf: &[u8], pos: usize) -> i32 {
    i32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}
