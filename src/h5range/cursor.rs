use crate::error::KiraError;

/// Little-endian reader over one block of HDF5 metadata.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], KiraError> {
        if self.remaining() < len {
            return Err(KiraError::Hdf5(format!(
                "truncated metadata: wanted {len} bytes at {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), KiraError> {
        self.bytes(len).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, KiraError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, KiraError> {
        Ok(self.uint(2)? as u16)
    }

    pub fn u32(&mut self) -> Result<u32, KiraError> {
        Ok(self.uint(4)? as u32)
    }

    pub fn u64(&mut self) -> Result<u64, KiraError> {
        self.uint(8)
    }

    /// Unsigned little-endian integer of `width` bytes (at most eight).
    pub fn uint(&mut self, width: usize) -> Result<u64, KiraError> {
        if width > 8 {
            return Err(KiraError::Hdf5(format!("unsupported integer width {width}")));
        }
        Ok(self
            .bytes(width)?
            .iter()
            .rev()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
    }

    pub fn signature(&mut self, expected: &[u8; 4]) -> Result<(), KiraError> {
        let found = self.bytes(4)?;
        if found != expected {
            return Err(KiraError::Hdf5(format!(
                "expected {} signature, found {:?}",
                String::from_utf8_lossy(expected),
                found
            )));
        }
        Ok(())
    }
}
