use crate::descriptor::ArrayDescriptor;
use crate::error::FormatError;
use crate::profile::{CompressionProfile, Compressor};
use crate::wire::{self, WireReader};

/// Magic bytes for super-chunk files.
pub const MAGIC: &[u8; 8] = b"CBSCHNK1";

pub const VERSION: u16 = 1;

/// Size of the fixed part of the header in bytes.
///   magic[8] + version:u16 + ndim:u8 + flags:u8 + itemsize:u32
///   + chunk_count:u64 + compressor:u8 + level:u8 + shuffle:u8 + _pad:u8
///   + blocksize:u32
///   = 8 + 2 + 1 + 1 + 4 + 8 + 4 + 4 = 32
/// followed by shape, chunk shape and extended chunk shape, `ndim` u64 each.
pub const FIXED_HEADER_SIZE: u64 = 32;

/// Size of each [`BlockEntry`] in the chunk index, in bytes.
///   offset:u64 + compressed_len:u32 + raw_len:u32 + checksum:u64 + _pad[8]
///   = 8 + 4 + 4 + 8 + 8 = 32
pub const BLOCK_ENTRY_SIZE: u64 = 32;

/// Size of the index footer (single u64 offset) in bytes.
pub const FOOTER_SIZE: u64 = 8;

/// Each chunk carries an xxhash3-64 checksum.
pub const FLAG_HAS_CHECKSUM: u8 = 1 << 0;

pub fn header_size(ndim: usize) -> u64 {
    FIXED_HEADER_SIZE + 3 * 8 * ndim as u64
}

/// Decoded super-chunk file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SChunkHeader {
    pub version: u16,
    pub flags: u8,
    pub chunk_count: u64,
    pub descriptor: ArrayDescriptor,
    /// Parameters the chunks were compressed with.
    pub profile: CompressionProfile,
}

impl SChunkHeader {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let d = &self.descriptor;
        let itemsize = u32::try_from(d.itemsize())
            .map_err(|_| FormatError::InvalidLayout(format!("item size {} too large", d.itemsize())))?;
        let ndim = u8::try_from(d.ndim())
            .map_err(|_| FormatError::InvalidLayout(format!("rank {} too large", d.ndim())))?;
        let blocksize = u32::try_from(self.profile.blocksize).map_err(|_| {
            FormatError::InvalidLayout(format!("block size {} too large", self.profile.blocksize))
        })?;

        let mut out = Vec::with_capacity(header_size(d.ndim()) as usize);
        out.extend_from_slice(MAGIC);
        wire::put_u16(&mut out, self.version);
        out.push(ndim);
        out.push(self.flags);
        wire::put_u32(&mut out, itemsize);
        wire::put_u64(&mut out, self.chunk_count);
        out.push(self.profile.compressor.code());
        out.push(self.profile.level);
        out.push(self.profile.shuffle as u8);
        out.push(0);
        wire::put_u32(&mut out, blocksize);
        wire::put_u64s(&mut out, d.shape());
        wire::put_u64s(&mut out, d.chunk_shape());
        wire::put_u64s(&mut out, d.ext_chunk_shape());
        Ok(out)
    }

    /// Parse the fixed header; returns it together with `ndim` so the caller
    /// can read the dimension block that follows.
    pub fn parse_fixed(buf: &[u8; FIXED_HEADER_SIZE as usize]) -> Result<(FixedHeader, usize), FormatError> {
        if &buf[..8] != MAGIC {
            return Err(FormatError::BadMagic("super-chunk"));
        }
        let mut r = WireReader::new(&buf[8..]);
        let version = r.u16()?;
        let ndim = r.u8()? as usize;
        let fixed = FixedHeader {
            version,
            flags: r.u8()?,
            itemsize: r.u32()? as usize,
            chunk_count: r.u64()?,
            compressor: r.u8()?,
            level: r.u8()?,
            shuffle: r.u8()?,
            blocksize: {
                r.u8()?;
                r.u32()? as usize
            },
        };
        Ok((fixed, ndim))
    }

    pub fn from_parts(fixed: FixedHeader, dims: &[u8], ndim: usize) -> Result<Self, FormatError> {
        let mut r = WireReader::new(dims);
        let shape = r.u64s(ndim)?;
        let chunk_shape = r.u64s(ndim)?;
        let ext_chunk_shape = r.u64s(ndim)?;
        let descriptor = ArrayDescriptor::new(shape, chunk_shape, ext_chunk_shape, fixed.itemsize)
            .map_err(|e| FormatError::Corrupt(e.to_string()))?;
        let compressor = Compressor::from_code(fixed.compressor)?;
        let profile = CompressionProfile::default()
            .compressor(compressor)
            .level(fixed.level)
            .shuffle(fixed.shuffle != 0)
            .blocksize(fixed.blocksize);
        Ok(Self {
            version: fixed.version,
            flags: fixed.flags,
            chunk_count: fixed.chunk_count,
            descriptor,
            profile,
        })
    }
}

/// Fixed-size leading part of [`SChunkHeader`], before the dimension block.
#[derive(Debug, Clone, Copy)]
pub struct FixedHeader {
    pub version: u16,
    pub flags: u8,
    pub itemsize: usize,
    pub chunk_count: u64,
    pub compressor: u8,
    pub level: u8,
    pub shuffle: u8,
    pub blocksize: usize,
}

/// Locates and describes one compressed chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEntry {
    /// Byte offset of the compressed chunk from the start of the file.
    pub offset: u64,
    pub compressed_len: u32,
    pub raw_len: u32,
    /// xxhash3-64 of the compressed bytes.
    pub checksum: u64,
}

impl BlockEntry {
    pub fn to_bytes(&self) -> [u8; BLOCK_ENTRY_SIZE as usize] {
        let mut buf = [0u8; BLOCK_ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.compressed_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.raw_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_ENTRY_SIZE as usize]) -> Result<Self, FormatError> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            offset: r.u64()?,
            compressed_len: r.u32()?,
            raw_len: r.u32()?,
            checksum: r.u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encodes_dims_after_fixed_part() {
        let header = SChunkHeader {
            version: VERSION,
            flags: FLAG_HAS_CHECKSUM,
            chunk_count: 6,
            descriptor: ArrayDescriptor::new(vec![3, 5], vec![2, 2], vec![3, 3], 8).unwrap(),
            profile: CompressionProfile::default().level(5).blocksize(4096),
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len() as u64, header_size(2));

        let mut fixed = [0u8; FIXED_HEADER_SIZE as usize];
        fixed.copy_from_slice(&bytes[..FIXED_HEADER_SIZE as usize]);
        let (parsed, ndim) = SChunkHeader::parse_fixed(&fixed).unwrap();
        assert_eq!(ndim, 2);
        let back = SChunkHeader::from_parts(parsed, &bytes[FIXED_HEADER_SIZE as usize..], ndim).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn bad_magic() {
        let buf = [0u8; FIXED_HEADER_SIZE as usize];
        assert!(matches!(SChunkHeader::parse_fixed(&buf), Err(FormatError::BadMagic(_))));
    }

    #[test]
    fn entry_layout() {
        let entry = BlockEntry {
            offset: 80,
            compressed_len: 12,
            raw_len: 64,
            checksum: 42,
        };
        assert_eq!(BlockEntry::from_bytes(&entry.to_bytes()).unwrap(), entry);
    }
}
