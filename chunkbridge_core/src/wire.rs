//! Little-endian encode/decode helpers for variable-length metadata.

use crate::error::FormatError;

pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                FormatError::Corrupt(format!(
                    "unexpected end of metadata: need {n} bytes at {}, have {}",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, FormatError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, FormatError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub(crate) fn u64s(&mut self, n: usize) -> Result<Vec<u64>, FormatError> {
        (0..n).map(|_| self.u64()).collect()
    }

    pub(crate) fn string(&mut self) -> Result<String, FormatError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| FormatError::Corrupt(format!("name is not utf-8: {e}")))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64s(out: &mut Vec<u8>, values: &[u64]) {
    for &v in values {
        put_u64(out, v);
    }
}

pub(crate) fn put_string(out: &mut Vec<u8>, s: &str) -> Result<(), FormatError> {
    let len = u16::try_from(s.len())
        .map_err(|_| FormatError::InvalidLayout(format!("name of {} bytes is too long", s.len())))?;
    put_u16(out, len);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_input_is_corrupt() {
        let mut r = WireReader::new(&[1, 2, 3]);
        assert_eq!(r.u16().unwrap(), 0x0201);
        assert!(matches!(r.u32(), Err(FormatError::Corrupt(_))));
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut out = Vec::new();
        put_string(&mut out, "DSCAT").unwrap();
        put_u64s(&mut out, &[3, 4]);
        let mut r = WireReader::new(&out);
        assert_eq!(r.string().unwrap(), "DSCAT");
        assert_eq!(r.u64s(2).unwrap(), vec![3, 4]);
        assert!(r.is_empty());
    }
}
