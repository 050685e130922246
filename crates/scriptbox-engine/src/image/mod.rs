//! Module image definitions
//!
//! This module provides the binary module format, the instruction set and
//! the optional debug-symbol format produced by compiler services and
//! consumed by the security gate and the interpreter.

pub mod encoder;
pub mod module;
pub mod opcode;
pub mod symbols;

pub use encoder::{DecodeError, ImageReader, ImageWriter};
pub use module::{
    field_flags, flags, qualify, Attribute, EventDef, FieldDef, FieldType, ImageError, ImportDef,
    MethodDef, ModuleImage, ParamDef, PropertyDef, ReplaceInfo, TypeDef, TypeKind,
};
pub use opcode::{decode_code, encode_code, Instr, Opcode};
pub use symbols::{LineEntry, MethodSymbols, SymbolImage};
