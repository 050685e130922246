//! Debug symbol image format (.sbsym)
//!
//! Maps instruction indices of each method back to source positions. Symbol
//! images are optional and produced alongside a module when requested.

use super::encoder::{ImageReader, ImageWriter};
use super::module::ImageError;

/// Magic number for symbol images: "SBSY"
pub const SYMBOLS_MAGIC: [u8; 4] = *b"SBSY";

/// Current symbol image version
pub const SYMBOLS_VERSION: u32 = 1;

/// One entry in a method's line table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// Instruction index within the method body
    pub instr: u32,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

/// Line table of one method
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodSymbols {
    /// Index of the declaring type in the module's type table
    pub type_index: u32,
    /// Index of the method in the type's method table
    pub method_index: u32,
    /// Index into `SymbolImage::source_files`
    pub source_file: u32,
    /// Line entries sorted by instruction index
    pub lines: Vec<LineEntry>,
}

/// Debug symbols for a whole module
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolImage {
    /// Source file paths
    pub source_files: Vec<String>,
    /// Per-method line tables
    pub methods: Vec<MethodSymbols>,
}

impl SymbolImage {
    /// Create an empty symbol image
    pub fn new() -> Self {
        Self::default()
    }

    /// Source position of an instruction, if known
    pub fn locate(&self, type_index: u32, method_index: u32, instr: u32) -> Option<(&str, LineEntry)> {
        let method = self
            .methods
            .iter()
            .find(|m| m.type_index == type_index && m.method_index == method_index)?;
        let entry = method.lines.iter().rev().find(|e| e.instr <= instr)?;
        let file = self.source_files.get(method.source_file as usize)?;
        Some((file.as_str(), *entry))
    }

    /// Encode: magic + version + crc32 header, then tables
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ImageWriter::new();
        writer.buffer.extend_from_slice(&SYMBOLS_MAGIC);
        writer.emit_u32(SYMBOLS_VERSION);
        let crc_offset = writer.offset();
        writer.emit_u32(0);
        let payload_start = writer.offset();

        writer.emit_u32(self.source_files.len() as u32);
        for file in &self.source_files {
            writer.emit_string(file);
        }

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            writer.emit_u32(method.type_index);
            writer.emit_u32(method.method_index);
            writer.emit_u32(method.source_file);
            writer.emit_u32(method.lines.len() as u32);
            for entry in &method.lines {
                writer.emit_u32(entry.instr);
                writer.emit_u32(entry.line);
                writer.emit_u32(entry.column);
            }
        }

        let crc = crc32fast::hash(&writer.buffer[payload_start..]);
        writer.patch_u32(crc_offset, crc);
        writer.into_bytes()
    }

    /// Decode a symbol image
    pub fn decode(data: &[u8]) -> Result<Self, ImageError> {
        let mut reader = ImageReader::new(data);

        let mut magic = [0u8; 4];
        magic.copy_from_slice(reader.read_bytes(4)?);
        if magic != SYMBOLS_MAGIC {
            return Err(ImageError::InvalidMagic(magic));
        }
        let version = reader.read_u32()?;
        if version != SYMBOLS_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        let stored_crc = reader.read_u32()?;
        let actual_crc = crc32fast::hash(&data[reader.offset()..]);
        if stored_crc != actual_crc {
            return Err(ImageError::ChecksumMismatch {
                expected: format!("{:#010x}", stored_crc),
                actual: format!("{:#010x}", actual_crc),
            });
        }

        let source_files = reader.read_vec(|r| r.read_string())?;
        let methods = reader.read_vec(|r| {
            Ok(MethodSymbols {
                type_index: r.read_u32()?,
                method_index: r.read_u32()?,
                source_file: r.read_u32()?,
                lines: r.read_vec(|r| {
                    Ok(LineEntry {
                        instr: r.read_u32()?,
                        line: r.read_u32()?,
                        column: r.read_u32()?,
                    })
                })?,
            })
        })?;

        Ok(Self {
            source_files,
            methods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SymbolImage {
        SymbolImage {
            source_files: vec!["enemy.sbs".to_string()],
            methods: vec![MethodSymbols {
                type_index: 0,
                method_index: 1,
                source_file: 0,
                lines: vec![
                    LineEntry { instr: 0, line: 4, column: 9 },
                    LineEntry { instr: 3, line: 5, column: 9 },
                ],
            }],
        }
    }

    #[test]
    fn test_locate_uses_nearest_preceding_entry() {
        let symbols = sample();
        let (file, entry) = symbols.locate(0, 1, 2).unwrap();
        assert_eq!(file, "enemy.sbs");
        assert_eq!(entry.line, 4);
        assert_eq!(symbols.locate(0, 1, 7).unwrap().1.line, 5);
        assert!(symbols.locate(0, 0, 0).is_none());
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut bytes = sample().encode();
        assert_eq!(SymbolImage::decode(&bytes).unwrap(), sample());
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            SymbolImage::decode(&bytes),
            Err(ImageError::ChecksumMismatch { .. })
        ));
    }
}
