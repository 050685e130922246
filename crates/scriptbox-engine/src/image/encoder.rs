//! Binary writer and reader for module and symbol images
//!
//! All multi-byte integers are little-endian. Strings are a u32 byte length
//! followed by UTF-8 bytes.

use thiserror::Error;

/// Errors raised while decoding binary images
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Ran out of input
    #[error("Unexpected end of input at offset {offset} (needed {needed} bytes)")]
    UnexpectedEof {
        /// Read position
        offset: usize,
        /// Bytes requested
        needed: usize,
    },

    /// String bytes are not valid UTF-8
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Unknown opcode byte
    #[error("Invalid opcode {opcode:#x} at offset {offset}")]
    InvalidOpcode {
        /// The opcode byte
        opcode: u8,
        /// Offset in the code stream
        offset: usize,
    },

    /// Unknown enum discriminant
    #[error("Invalid {what} tag {tag}")]
    InvalidTag {
        /// What was being decoded
        what: &'static str,
        /// The tag byte
        tag: u8,
    },
}

/// Append-only binary writer
#[derive(Debug, Default)]
pub struct ImageWriter {
    /// Output buffer
    pub buffer: Vec<u8>,
}

impl ImageWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Current write offset
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Write a byte
    pub fn emit_u8(&mut self, v: u8) {
        self.buffer.push(v);
    }

    /// Write a bool as one byte
    pub fn emit_bool(&mut self, v: bool) {
        self.buffer.push(v as u8);
    }

    /// Write a u16
    pub fn emit_u16(&mut self, v: u16) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a u32
    pub fn emit_u32(&mut self, v: u32) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    /// Write an i64
    pub fn emit_i64(&mut self, v: i64) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    /// Write an f64
    pub fn emit_f64(&mut self, v: f64) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a length-prefixed string
    pub fn emit_string(&mut self, s: &str) {
        self.emit_u32(s.len() as u32);
        self.buffer.extend_from_slice(s.as_bytes());
    }

    /// Write an optional string (presence byte, then string)
    pub fn emit_opt_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.emit_bool(true);
                self.emit_string(s);
            }
            None => self.emit_bool(false),
        }
    }

    /// Write a length-prefixed byte blob
    pub fn emit_blob(&mut self, bytes: &[u8]) {
        self.emit_u32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    /// Overwrite a previously written u32
    pub fn patch_u32(&mut self, offset: usize, v: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Consume the writer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Cursor over an encoded image
#[derive(Debug)]
pub struct ImageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ImageReader<'a> {
    /// Create a reader at offset 0
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether all input has been consumed
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Read raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.data.len() - self.pos < n {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a bool byte
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a u16
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a u32
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read an i64
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Read an f64
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read an optional string
    pub fn read_opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        if self.read_bool()? {
            self.read_string().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read a length-prefixed byte blob
    pub fn read_blob(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Read a u32 element count followed by that many elements
    pub fn read_vec<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        let count = self.read_u32()? as usize;
        // Cap the preallocation so a corrupt count cannot exhaust memory
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }
}
