//! Module image format (.sbx)

use super::encoder::{DecodeError, ImageReader, ImageWriter};
use scriptbox_sdk::Value;
use thiserror::Error;

/// Magic number for Scriptbox module images: "SBOX"
pub const MAGIC: [u8; 4] = *b"SBOX";

/// Current image version
pub const VERSION: u32 = 1;

/// Size of the fixed header: magic + version + flags + crc32 + sha256
pub const HEADER_SIZE: usize = 48;

/// Image encoding/decoding errors
#[derive(Debug, Error)]
pub enum ImageError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected SBOX, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: String,
        /// Checksum computed over the payload
        actual: String,
    },

    /// Structural problem (dangling index, duplicate name)
    #[error("Invalid image: {0}")]
    Invalid(String),
}

/// Module flags
pub mod flags {
    /// A symbol image was produced alongside this module
    pub const HAS_SYMBOLS: u32 = 1 << 0;
    /// The module was compiled with unsafe code enabled
    pub const ALLOW_UNSAFE: u32 = 1 << 1;
    /// The module was produced by a compiler at run time
    pub const RUNTIME_COMPILED: u32 = 1 << 2;
}

/// Declared type of a field, parameter or property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Any value
    Any = 0,
    /// Boolean
    Bool = 1,
    /// 64-bit integer
    Int = 2,
    /// Single-precision float
    Float = 3,
    /// Double-precision float
    Double = 4,
    /// String
    Str = 5,
}

impl FieldType {
    /// Source-level name
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Any => "any",
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Str => "string",
        }
    }

    /// Parse a source-level name
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "any" => FieldType::Any,
            "bool" => FieldType::Bool,
            "int" => FieldType::Int,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "string" => FieldType::Str,
            _ => return None,
        })
    }

    fn from_u8(tag: u8) -> Result<Self, DecodeError> {
        Ok(match tag {
            0 => FieldType::Any,
            1 => FieldType::Bool,
            2 => FieldType::Int,
            3 => FieldType::Float,
            4 => FieldType::Double,
            5 => FieldType::Str,
            _ => return Err(DecodeError::InvalidTag { what: "field type", tag }),
        })
    }

    /// Default value for an uninitialized slot of this type
    pub fn zero(self) -> Value {
        match self {
            FieldType::Any => Value::Null,
            FieldType::Bool => Value::Bool(false),
            FieldType::Int => Value::Int(0),
            FieldType::Float | FieldType::Double => Value::Float(0.0),
            FieldType::Str => Value::str(""),
        }
    }

    /// Coerce a value for storage in a slot of this type
    ///
    /// Integers widen into float slots and float slots round to single
    /// precision. Returns `None` when the value cannot be stored.
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (FieldType::Any, v) => Some(v),
            (FieldType::Bool, v @ Value::Bool(_)) => Some(v),
            (FieldType::Int, v @ Value::Int(_)) => Some(v),
            (FieldType::Float, Value::Float(f)) => Some(Value::Float(f as f32 as f64)),
            (FieldType::Float, Value::Int(i)) => Some(Value::Float(i as f32 as f64)),
            (FieldType::Double, v @ Value::Float(_)) => Some(v),
            (FieldType::Double, Value::Int(i)) => Some(Value::Float(i as f64)),
            (FieldType::Str, v @ Value::Str(_)) => Some(v),
            _ => None,
        }
    }

    /// Whether a slot of type `self` can receive a value from a slot of `other`
    ///
    /// Declared types must match exactly; `any` receives everything.
    pub fn is_assignable_from(self, other: FieldType) -> bool {
        self == FieldType::Any || self == other
    }
}

/// Category of a declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TypeKind {
    /// Free-standing instances
    #[default]
    Plain = 0,
    /// Instances live on a host entity
    Attached = 1,
    /// Contract only; never instantiated
    Interface = 2,
}

impl TypeKind {
    fn from_u8(tag: u8) -> Result<Self, DecodeError> {
        Ok(match tag {
            0 => TypeKind::Plain,
            1 => TypeKind::Attached,
            2 => TypeKind::Interface,
            _ => return Err(DecodeError::InvalidTag { what: "type kind", tag }),
        })
    }
}

/// Free-form metadata attached to a type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Key/value arguments in declaration order
    pub args: Vec<(String, String)>,
}

impl Attribute {
    /// Value of a named argument
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Hot-swap matching metadata declared on a replaceable type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplaceInfo {
    /// Name a replacement must have; defaults to the type's own name
    pub replace_name: Option<String>,
    /// Required direct base type of the replacement
    pub require_base: Option<String>,
    /// Interfaces the replacement must implement
    pub require_interfaces: Vec<String>,
}

/// Field flag bits
pub mod field_flags {
    /// Static field
    pub const STATIC: u8 = 1 << 0;
    /// Publicly visible field (serialized by default)
    pub const PUBLIC: u8 = 1 << 1;
    /// Explicitly serialized non-public field
    pub const SERIALIZED: u8 = 1 << 2;
    /// Explicitly excluded from serialization
    pub const NON_SERIALIZED: u8 = 1 << 3;
}

/// Field declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: FieldType,
    /// Flag bits (see [`field_flags`])
    pub flags: u8,
    /// Initial value
    pub default: Value,
}

impl FieldDef {
    /// Create a public instance field with the zero default
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            flags: field_flags::PUBLIC,
            default: ty.zero(),
        }
    }

    /// Whether the field is static
    pub fn is_static(&self) -> bool {
        self.flags & field_flags::STATIC != 0
    }

    /// Whether the field is public
    pub fn is_public(&self) -> bool {
        self.flags & field_flags::PUBLIC != 0
    }

    /// Whether the field is explicitly marked serialized
    pub fn is_marked_serialized(&self) -> bool {
        self.flags & field_flags::SERIALIZED != 0
    }

    /// Whether the field is explicitly excluded from serialization
    pub fn is_non_serialized(&self) -> bool {
        self.flags & field_flags::NON_SERIALIZED != 0
    }

    /// Public or marked serialized, and not excluded
    pub fn is_serializable(&self) -> bool {
        (self.is_public() || self.is_marked_serialized()) && !self.is_non_serialized()
    }
}

/// Property declaration backed by accessor methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    /// Property name
    pub name: String,
    /// Declared type
    pub ty: FieldType,
    /// Static property
    pub is_static: bool,
    /// Getter method name
    pub getter: Option<String>,
    /// Setter method name
    pub setter: Option<String>,
}

/// Method parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub ty: FieldType,
}

/// Method declaration
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Static method
    pub is_static: bool,
    /// Returns a resumable sequence
    pub is_sequence: bool,
    /// Parameters
    pub params: Vec<ParamDef>,
    /// Return type (`None` for void)
    pub returns: Option<FieldType>,
    /// Local slots beyond the parameters
    pub local_count: u16,
    /// Encoded body
    pub code: Vec<u8>,
}

impl MethodDef {
    /// Total local slots (parameters first)
    pub fn slot_count(&self) -> usize {
        self.params.len() + self.local_count as usize
    }
}

/// Event declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDef {
    /// Event name
    pub name: String,
    /// Static event
    pub is_static: bool,
}

/// Reference to an external member the module calls into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportDef {
    /// Library providing the member
    pub library: String,
    /// Namespace of the declaring type
    pub namespace: String,
    /// Declaring type name
    pub type_name: String,
    /// Member name
    pub member: String,
    /// Number of arguments the call site passes
    pub param_count: u8,
    /// Unsafe interop call
    pub is_unsafe: bool,
}

impl ImportDef {
    /// Fully qualified type name (`Namespace.Type`)
    pub fn full_type_name(&self) -> String {
        qualify(&self.namespace, &self.type_name)
    }

    /// Fully qualified member name (`Namespace.Type.member`)
    pub fn full_member_name(&self) -> String {
        format!("{}.{}", self.full_type_name(), self.member)
    }
}

/// Type declaration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeDef {
    /// Namespace (empty for the global namespace)
    pub namespace: String,
    /// Simple name (for nested types, `Outer.Inner`)
    pub name: String,
    /// Category
    pub kind: TypeKind,
    /// Publicly visible
    pub is_public: bool,
    /// Direct base type (fully qualified)
    pub base: Option<String>,
    /// Implemented interfaces (fully qualified)
    pub interfaces: Vec<String>,
    /// Attributes
    pub attributes: Vec<Attribute>,
    /// Hot-swap metadata
    pub replace: Option<ReplaceInfo>,
    /// Fields
    pub fields: Vec<FieldDef>,
    /// Properties
    pub properties: Vec<PropertyDef>,
    /// Methods
    pub methods: Vec<MethodDef>,
    /// Events
    pub events: Vec<EventDef>,
    /// Index of the enclosing type for nested types
    pub parent: Option<u32>,
}

impl TypeDef {
    /// Fully qualified name (`Namespace.Name`)
    pub fn full_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }
}

/// Join a namespace and a name
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}

/// A module image
#[derive(Debug, Clone)]
pub struct ModuleImage {
    /// Magic number (must be "SBOX")
    pub magic: [u8; 4],
    /// Image version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// Module name
    pub name: String,
    /// String table referenced by instruction operands
    pub strings: Vec<String>,
    /// External members referenced by `call_extern`
    pub imports: Vec<ImportDef>,
    /// Declared types (nested types included, linked through `parent`)
    pub types: Vec<TypeDef>,
    /// SHA-256 of the payload, filled in by `encode`/`decode`
    pub checksum: [u8; 32],
}

impl ModuleImage {
    /// Create an empty image
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            name: name.into(),
            strings: Vec::new(),
            imports: Vec::new(),
            types: Vec::new(),
            checksum: [0; 32],
        }
    }

    /// Intern a string into the string table
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.strings.iter().position(|existing| existing == s) {
            return idx as u32;
        }
        self.strings.push(s.to_string());
        (self.strings.len() - 1) as u32
    }

    /// Resolve a string table index
    pub fn string(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    /// Check a flag bit
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Index of the main type: first non-interface type, else the first type
    pub fn main_type_index(&self) -> Option<usize> {
        self.types
            .iter()
            .position(|t| t.kind != TypeKind::Interface && t.parent.is_none())
            .or(if self.types.is_empty() { None } else { Some(0) })
    }

    /// SHA-256 checksum as lowercase hex
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }

    /// Validate structure: magic, version, parent links and unique type names
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.magic != MAGIC {
            return Err(ImageError::InvalidMagic(self.magic));
        }
        if self.version != VERSION {
            return Err(ImageError::UnsupportedVersion(self.version));
        }

        let mut seen = rustc_hash::FxHashSet::default();
        for (idx, ty) in self.types.iter().enumerate() {
            if let Some(parent) = ty.parent {
                if parent as usize >= self.types.len() || parent as usize == idx {
                    return Err(ImageError::Invalid(format!(
                        "type '{}' has invalid parent index {}",
                        ty.full_name(),
                        parent
                    )));
                }
            }
            if !seen.insert(ty.full_name()) {
                return Err(ImageError::Invalid(format!(
                    "duplicate type '{}'",
                    ty.full_name()
                )));
            }
        }
        Ok(())
    }

    /// Encode the module to binary format (.sbx)
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + crc32 (u32) + checksum (32 bytes SHA-256)
    /// - Module name
    /// - String table
    /// - Import table
    /// - Type table
    pub fn encode(&self) -> Vec<u8> {
        use sha2::{Digest, Sha256};

        let mut writer = ImageWriter::new();

        // Reserve space for header (checksums patched at the end)
        writer.buffer.extend_from_slice(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let crc32_offset = writer.offset();
        writer.emit_u32(0);
        let sha256_offset = writer.offset();
        writer.buffer.extend_from_slice(&[0u8; 32]);

        writer.emit_string(&self.name);

        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }

        writer.emit_u32(self.imports.len() as u32);
        for import in &self.imports {
            encode_import(import, &mut writer);
        }

        writer.emit_u32(self.types.len() as u32);
        for ty in &self.types {
            encode_type(ty, &mut writer);
        }

        // Checksums cover everything after the header
        let payload = &writer.buffer[HEADER_SIZE..];
        let crc32 = crc32fast::hash(payload);
        let checksum: [u8; 32] = Sha256::digest(payload).into();

        writer.patch_u32(crc32_offset, crc32);
        writer.buffer[sha256_offset..sha256_offset + 32].copy_from_slice(&checksum);

        writer.into_bytes()
    }

    /// Decode a module from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ImageError> {
        use sha2::{Digest, Sha256};

        let mut reader = ImageReader::new(data);

        // Read header
        let mut magic = [0u8; 4];
        magic.copy_from_slice(reader.read_bytes(4)?);
        if magic != MAGIC {
            return Err(ImageError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_crc32 = reader.read_u32()?;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(reader.read_bytes(32)?);

        let payload = &data[HEADER_SIZE..];

        let calculated_crc32 = crc32fast::hash(payload);
        if stored_crc32 != calculated_crc32 {
            return Err(ImageError::ChecksumMismatch {
                expected: format!("{:#010x}", stored_crc32),
                actual: format!("{:#010x}", calculated_crc32),
            });
        }

        let calculated_sha256: [u8; 32] = Sha256::digest(payload).into();
        if checksum != calculated_sha256 {
            return Err(ImageError::ChecksumMismatch {
                expected: hex::encode(checksum),
                actual: hex::encode(calculated_sha256),
            });
        }

        let name = reader.read_string()?;
        let strings = reader.read_vec(|r| r.read_string())?;
        let imports = reader.read_vec(decode_import)?;
        let types = reader.read_vec(decode_type)?;

        let image = Self {
            magic,
            version,
            flags,
            name,
            strings,
            imports,
            types,
            checksum,
        };
        image.validate()?;
        Ok(image)
    }
}

// ============================================================================
// Table encoding
// ============================================================================

fn encode_value(value: &Value, writer: &mut ImageWriter) {
    match value {
        Value::Bool(b) => {
            writer.emit_u8(1);
            writer.emit_bool(*b);
        }
        Value::Int(i) => {
            writer.emit_u8(2);
            writer.emit_i64(*i);
        }
        Value::Float(f) => {
            writer.emit_u8(3);
            writer.emit_f64(*f);
        }
        Value::Str(s) => {
            writer.emit_u8(4);
            writer.emit_string(s);
        }
        // Only constants are stored in images
        _ => writer.emit_u8(0),
    }
}

fn decode_value(reader: &mut ImageReader<'_>) -> Result<Value, DecodeError> {
    Ok(match reader.read_u8()? {
        0 => Value::Null,
        1 => Value::Bool(reader.read_bool()?),
        2 => Value::Int(reader.read_i64()?),
        3 => Value::Float(reader.read_f64()?),
        4 => Value::str(reader.read_string()?),
        tag => return Err(DecodeError::InvalidTag { what: "constant", tag }),
    })
}

fn encode_opt_type(ty: Option<FieldType>, writer: &mut ImageWriter) {
    writer.emit_u8(ty.map_or(0xFF, |t| t as u8));
}

fn decode_opt_type(reader: &mut ImageReader<'_>) -> Result<Option<FieldType>, DecodeError> {
    match reader.read_u8()? {
        0xFF => Ok(None),
        tag => FieldType::from_u8(tag).map(Some),
    }
}

fn encode_import(import: &ImportDef, writer: &mut ImageWriter) {
    writer.emit_string(&import.library);
    writer.emit_string(&import.namespace);
    writer.emit_string(&import.type_name);
    writer.emit_string(&import.member);
    writer.emit_u8(import.param_count);
    writer.emit_bool(import.is_unsafe);
}

fn decode_import(reader: &mut ImageReader<'_>) -> Result<ImportDef, DecodeError> {
    Ok(ImportDef {
        library: reader.read_string()?,
        namespace: reader.read_string()?,
        type_name: reader.read_string()?,
        member: reader.read_string()?,
        param_count: reader.read_u8()?,
        is_unsafe: reader.read_bool()?,
    })
}

fn encode_type(ty: &TypeDef, writer: &mut ImageWriter) {
    writer.emit_string(&ty.namespace);
    writer.emit_string(&ty.name);
    writer.emit_u8(ty.kind as u8);
    writer.emit_bool(ty.is_public);
    writer.emit_opt_string(ty.base.as_deref());

    writer.emit_u32(ty.interfaces.len() as u32);
    for iface in &ty.interfaces {
        writer.emit_string(iface);
    }

    writer.emit_u32(ty.attributes.len() as u32);
    for attr in &ty.attributes {
        writer.emit_string(&attr.name);
        writer.emit_u32(attr.args.len() as u32);
        for (k, v) in &attr.args {
            writer.emit_string(k);
            writer.emit_string(v);
        }
    }

    match &ty.replace {
        Some(info) => {
            writer.emit_bool(true);
            writer.emit_opt_string(info.replace_name.as_deref());
            writer.emit_opt_string(info.require_base.as_deref());
            writer.emit_u32(info.require_interfaces.len() as u32);
            for iface in &info.require_interfaces {
                writer.emit_string(iface);
            }
        }
        None => writer.emit_bool(false),
    }

    writer.emit_u32(ty.fields.len() as u32);
    for field in &ty.fields {
        writer.emit_string(&field.name);
        writer.emit_u8(field.ty as u8);
        writer.emit_u8(field.flags);
        encode_value(&field.default, writer);
    }

    writer.emit_u32(ty.properties.len() as u32);
    for prop in &ty.properties {
        writer.emit_string(&prop.name);
        writer.emit_u8(prop.ty as u8);
        writer.emit_bool(prop.is_static);
        writer.emit_opt_string(prop.getter.as_deref());
        writer.emit_opt_string(prop.setter.as_deref());
    }

    writer.emit_u32(ty.methods.len() as u32);
    for method in &ty.methods {
        writer.emit_string(&method.name);
        writer.emit_bool(method.is_static);
        writer.emit_bool(method.is_sequence);
        writer.emit_u32(method.params.len() as u32);
        for param in &method.params {
            writer.emit_string(&param.name);
            writer.emit_u8(param.ty as u8);
        }
        encode_opt_type(method.returns, writer);
        writer.emit_u16(method.local_count);
        writer.emit_blob(&method.code);
    }

    writer.emit_u32(ty.events.len() as u32);
    for event in &ty.events {
        writer.emit_string(&event.name);
        writer.emit_bool(event.is_static);
    }

    match ty.parent {
        Some(parent) => {
            writer.emit_bool(true);
            writer.emit_u32(parent);
        }
        None => writer.emit_bool(false),
    }
}

fn decode_type(reader: &mut ImageReader<'_>) -> Result<TypeDef, DecodeError> {
    let namespace = reader.read_string()?;
    let name = reader.read_string()?;
    let kind = TypeKind::from_u8(reader.read_u8()?)?;
    let is_public = reader.read_bool()?;
    let base = reader.read_opt_string()?;
    let interfaces = reader.read_vec(|r| r.read_string())?;

    let attributes = reader.read_vec(|r| {
        let name = r.read_string()?;
        let args = r.read_vec(|r| Ok((r.read_string()?, r.read_string()?)))?;
        Ok(Attribute { name, args })
    })?;

    let replace = if reader.read_bool()? {
        Some(ReplaceInfo {
            replace_name: reader.read_opt_string()?,
            require_base: reader.read_opt_string()?,
            require_interfaces: reader.read_vec(|r| r.read_string())?,
        })
    } else {
        None
    };

    let fields = reader.read_vec(|r| {
        Ok(FieldDef {
            name: r.read_string()?,
            ty: FieldType::from_u8(r.read_u8()?)?,
            flags: r.read_u8()?,
            default: decode_value(r)?,
        })
    })?;

    let properties = reader.read_vec(|r| {
        Ok(PropertyDef {
            name: r.read_string()?,
            ty: FieldType::from_u8(r.read_u8()?)?,
            is_static: r.read_bool()?,
            getter: r.read_opt_string()?,
            setter: r.read_opt_string()?,
        })
    })?;

    let methods = reader.read_vec(|r| {
        let name = r.read_string()?;
        let is_static = r.read_bool()?;
        let is_sequence = r.read_bool()?;
        let params = r.read_vec(|r| {
            Ok(ParamDef {
                name: r.read_string()?,
                ty: FieldType::from_u8(r.read_u8()?)?,
            })
        })?;
        Ok(MethodDef {
            name,
            is_static,
            is_sequence,
            params,
            returns: decode_opt_type(r)?,
            local_count: r.read_u16()?,
            code: r.read_blob()?,
        })
    })?;

    let events = reader.read_vec(|r| {
        Ok(EventDef {
            name: r.read_string()?,
            is_static: r.read_bool()?,
        })
    })?;

    let parent = if reader.read_bool()? {
        Some(reader.read_u32()?)
    } else {
        None
    };

    Ok(TypeDef {
        namespace,
        name,
        kind,
        is_public,
        base,
        interfaces,
        attributes,
        replace,
        fields,
        properties,
        methods,
        events,
        parent,
    })
}
