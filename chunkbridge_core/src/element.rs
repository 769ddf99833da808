use std::fmt;

use crate::error::FormatError;

/// On-disk element type of a container dataset. All types are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// Fixed-size elements with no numeric interpretation.
    Opaque(u32),
}

const OPAQUE_CODE: u8 = 0xff;

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U32 | ElementType::I32 | ElementType::F32 => 4,
            ElementType::U64 | ElementType::I64 | ElementType::F64 => 8,
            ElementType::Opaque(n) => n as usize,
        }
    }

    /// The type used when a source array only reports an item size.
    pub fn for_itemsize(itemsize: usize) -> Result<Self, FormatError> {
        match itemsize {
            1 => Ok(ElementType::U8),
            2 => Ok(ElementType::I16),
            4 => Ok(ElementType::I32),
            8 => Ok(ElementType::I64),
            0 => Err(FormatError::InvalidLayout("zero item size".into())),
            n => u32::try_from(n)
                .map(ElementType::Opaque)
                .map_err(|_| FormatError::InvalidLayout(format!("item size {n} too large"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::U8 => "u8",
            ElementType::I8 => "i8",
            ElementType::U16 => "u16",
            ElementType::I16 => "i16",
            ElementType::U32 => "u32",
            ElementType::I32 => "i32",
            ElementType::U64 => "u64",
            ElementType::I64 => "i64",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Opaque(_) => "opaque",
        }
    }

    pub(crate) fn encode(self, out: &mut Vec<u8>) {
        let code = match self {
            ElementType::U8 => 0,
            ElementType::I8 => 1,
            ElementType::U16 => 2,
            ElementType::I16 => 3,
            ElementType::U32 => 4,
            ElementType::I32 => 5,
            ElementType::U64 => 6,
            ElementType::I64 => 7,
            ElementType::F32 => 8,
            ElementType::F64 => 9,
            ElementType::Opaque(n) => {
                out.push(OPAQUE_CODE);
                out.extend_from_slice(&n.to_le_bytes());
                return;
            }
        };
        out.push(code);
    }

    pub(crate) fn decode(r: &mut crate::wire::WireReader<'_>) -> Result<Self, FormatError> {
        Ok(match r.u8()? {
            0 => ElementType::U8,
            1 => ElementType::I8,
            2 => ElementType::U16,
            3 => ElementType::I16,
            4 => ElementType::U32,
            5 => ElementType::I32,
            6 => ElementType::U64,
            7 => ElementType::I64,
            8 => ElementType::F32,
            9 => ElementType::F64,
            OPAQUE_CODE => match r.u32()? {
                0 => return Err(FormatError::Corrupt("zero-size opaque element".into())),
                n => ElementType::Opaque(n),
            },
            other => return Err(FormatError::Corrupt(format!("unknown element type code {other}"))),
        })
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Opaque(n) => write!(f, "opaque[{n}]"),
            other => f.write_str(other.name()),
        }
    }
}

/// Rust types that can be read out of a dataset of the matching [`ElementType`].
pub trait Element: Copy + Default {
    const TYPE: ElementType;

    fn from_le(bytes: &[u8]) -> Self;

    fn put_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const TYPE: ElementType = ElementType::$variant;

            fn from_le(bytes: &[u8]) -> Self {
                let mut arr = [0u8; std::mem::size_of::<$t>()];
                arr.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(arr)
            }

            fn put_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_element!(u8, U8);
impl_element!(i8, I8);
impl_element!(u16, U16);
impl_element!(i16, I16);
impl_element!(u32, U32);
impl_element!(i32, I32);
impl_element!(u64, U64);
impl_element!(i64, I64);
impl_element!(f32, F32);
impl_element!(f64, F64);

/// Decode a little-endian byte buffer into typed elements.
pub fn decode_elements<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::TYPE.size())
        .map(T::from_le)
        .collect()
}

/// Encode typed elements as little-endian bytes.
pub fn encode_elements<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::TYPE.size());
    for &v in values {
        v.put_le(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireReader;

    #[test]
    fn itemsize_mapping() {
        assert_eq!(ElementType::for_itemsize(1).unwrap(), ElementType::U8);
        assert_eq!(ElementType::for_itemsize(4).unwrap(), ElementType::I32);
        assert_eq!(ElementType::for_itemsize(8).unwrap(), ElementType::I64);
        assert_eq!(ElementType::for_itemsize(12).unwrap(), ElementType::Opaque(12));
        assert!(ElementType::for_itemsize(0).is_err());
    }

    #[test]
    fn type_codes_decode_back() {
        for t in [ElementType::F64, ElementType::I16, ElementType::Opaque(3)] {
            let mut out = Vec::new();
            t.encode(&mut out);
            assert_eq!(ElementType::decode(&mut WireReader::new(&out)).unwrap(), t);
        }
    }

    #[test]
    fn typed_codec_is_little_endian() {
        let bytes = encode_elements(&[1i32, -2]);
        assert_eq!(bytes, vec![1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(decode_elements::<i32>(&bytes), vec![1, -2]);
    }
}
