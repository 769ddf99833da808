//! Compression parameters shared by the chunk writer and the container filter.
//!
//! The writer compresses chunks with a [`CompressionProfile`] and registers
//! the container's decompression filter from the same profile via
//! [`FilterParams`], so the two paths cannot disagree on compressor, level or
//! shuffle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::container::FilterDescription;
use crate::error::CodecError;

/// Filter id under which the framed block codec is registered in containers.
pub const FILTER_BLOSC2: u16 = 32002;

/// The filter may be skipped when it cannot be applied.
pub const FILTER_FLAG_OPTIONAL: u16 = 0x0001;

/// Leading `cd_values` slots owned by the filter itself.
pub const RESERVED_SLOTS: usize = 4;
const CD_LEVEL: usize = 4;
const CD_SHUFFLE: usize = 5;
const CD_COMPRESSOR: usize = 6;
/// Length of the filter parameter block.
pub const CD_VALUES_LEN: usize = 7;

pub const MAX_LEVEL: u8 = 9;

/// Compressor backend used inside a compressed block. Codes follow blosc numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    Lz4,
    Zlib,
    Zstd,
}

impl Compressor {
    pub const ALL: [Compressor; 3] = [Compressor::Lz4, Compressor::Zlib, Compressor::Zstd];

    pub fn code(self) -> u8 {
        match self {
            Compressor::Lz4 => 1,
            Compressor::Zlib => 4,
            Compressor::Zstd => 5,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            1 => Ok(Compressor::Lz4),
            4 => Ok(Compressor::Zlib),
            5 => Ok(Compressor::Zstd),
            other => Err(CodecError::UnknownCompressor(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compressor::Lz4 => "lz4",
            Compressor::Zlib => "zlib",
            Compressor::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compressor {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lz4" => Ok(Compressor::Lz4),
            "zlib" | "deflate" => Ok(Compressor::Zlib),
            "zstd" => Ok(Compressor::Zstd),
            other => Err(CodecError::InvalidParams(format!(
                "unknown compressor '{other}'; valid options: lz4, zlib, zstd"
            ))),
        }
    }
}

/// How chunks are compressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionProfile {
    pub compressor: Compressor,
    /// 0 stores blocks uncompressed, 9 compresses hardest.
    pub level: u8,
    /// Byte-transpose elements before compressing.
    pub shuffle: bool,
    /// Bytes per internal block; 0 picks one automatically.
    pub blocksize: usize,
    /// Worker threads the codec may use per call.
    pub nthreads: usize,
}

impl Default for CompressionProfile {
    fn default() -> Self {
        Self {
            compressor: Compressor::Zlib,
            level: 1,
            shuffle: true,
            blocksize: 0,
            nthreads: 1,
        }
    }
}

impl CompressionProfile {
    pub fn compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn blocksize(mut self, blocksize: usize) -> Self {
        self.blocksize = blocksize;
        self
    }

    pub fn nthreads(mut self, nthreads: usize) -> Self {
        self.nthreads = nthreads;
        self
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if self.level > MAX_LEVEL {
            return Err(CodecError::InvalidParams(format!(
                "compression level {} exceeds {MAX_LEVEL}",
                self.level
            )));
        }
        if self.nthreads == 0 {
            return Err(CodecError::InvalidParams("nthreads must be at least 1".into()));
        }
        if self.blocksize > i32::MAX as usize {
            return Err(CodecError::InvalidParams(format!(
                "block size {} does not fit a block header",
                self.blocksize
            )));
        }
        Ok(())
    }

    pub fn filter_params(&self) -> FilterParams {
        FilterParams {
            reserved: [0; RESERVED_SLOTS],
            level: self.level,
            shuffle: self.shuffle,
            compressor: self.compressor,
        }
    }
}

/// Typed view of the container filter's `cd_values` parameter block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParams {
    /// Slots 0..=3, carried verbatim.
    pub reserved: [u32; RESERVED_SLOTS],
    pub level: u8,
    pub shuffle: bool,
    pub compressor: Compressor,
}

impl FilterParams {
    pub fn from_cd_values(values: &[u32]) -> Result<Self, CodecError> {
        if values.len() < CD_VALUES_LEN {
            return Err(CodecError::InvalidParams(format!(
                "filter expects {CD_VALUES_LEN} parameters, got {}",
                values.len()
            )));
        }
        let level = u8::try_from(values[CD_LEVEL])
            .ok()
            .filter(|&l| l <= MAX_LEVEL)
            .ok_or_else(|| {
                CodecError::InvalidParams(format!("invalid compression level {}", values[CD_LEVEL]))
            })?;
        let shuffle = match values[CD_SHUFFLE] {
            0 => false,
            1 => true,
            other => {
                return Err(CodecError::InvalidParams(format!(
                    "shuffle flag must be 0 or 1, got {other}"
                )))
            }
        };
        let code = u8::try_from(values[CD_COMPRESSOR])
            .map_err(|_| CodecError::InvalidParams(format!("invalid compressor code {}", values[CD_COMPRESSOR])))?;
        let mut reserved = [0u32; RESERVED_SLOTS];
        reserved.copy_from_slice(&values[..RESERVED_SLOTS]);
        Ok(Self {
            reserved,
            level,
            shuffle,
            compressor: Compressor::from_code(code)?,
        })
    }

    pub fn to_cd_values(&self) -> Vec<u32> {
        let mut values = Vec::with_capacity(CD_VALUES_LEN);
        values.extend_from_slice(&self.reserved);
        values.push(self.level as u32);
        values.push(self.shuffle as u32);
        values.push(self.compressor.code() as u32);
        values
    }

    /// Pipeline entry registering the framed codec with these parameters.
    pub fn description(&self) -> FilterDescription {
        FilterDescription {
            id: FILTER_BLOSC2,
            flags: FILTER_FLAG_OPTIONAL,
            cd_values: self.to_cd_values(),
        }
    }

    /// Rebuild a profile carrying these parameters.
    pub fn profile(&self) -> CompressionProfile {
        CompressionProfile::default()
            .compressor(self.compressor)
            .level(self.level)
            .shuffle(self.shuffle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cd_values_layout() {
        let params = CompressionProfile::default().filter_params();
        assert_eq!(params.to_cd_values(), vec![0, 0, 0, 0, 1, 1, 4]);
    }

    #[test]
    fn reserved_slots_survive_reparse() {
        let values = [7, 8, 9, 10, 5, 0, 5];
        let params = FilterParams::from_cd_values(&values).unwrap();
        assert_eq!(params.reserved, [7, 8, 9, 10]);
        assert_eq!(params.level, 5);
        assert!(!params.shuffle);
        assert_eq!(params.compressor, Compressor::Zstd);
        assert_eq!(params.to_cd_values(), values.to_vec());
    }

    #[test]
    fn rejects_bad_parameter_blocks() {
        assert!(FilterParams::from_cd_values(&[0, 0, 0, 0, 1, 1]).is_err());
        assert!(FilterParams::from_cd_values(&[0, 0, 0, 0, 12, 1, 4]).is_err());
        assert!(FilterParams::from_cd_values(&[0, 0, 0, 0, 1, 2, 4]).is_err());
        assert_eq!(
            FilterParams::from_cd_values(&[0, 0, 0, 0, 1, 1, 3]),
            Err(CodecError::UnknownCompressor(3))
        );
    }

    #[test]
    fn profile_validation() {
        assert!(CompressionProfile::default().validate().is_ok());
        assert!(CompressionProfile::default().level(10).validate().is_err());
        assert!(CompressionProfile::default().nthreads(0).validate().is_err());
    }

    #[test]
    fn compressor_names_parse() {
        for c in Compressor::ALL {
            assert_eq!(c.name().parse::<Compressor>().unwrap(), c);
            assert_eq!(Compressor::from_code(c.code()).unwrap(), c);
        }
        assert!("snappy".parse::<Compressor>().is_err());
    }
}
