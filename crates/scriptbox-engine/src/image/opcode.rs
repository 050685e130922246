//! Instruction set of the script interpreter
//!
//! Method bodies are stored in the image as a byte stream of opcodes with
//! inline operands. At type construction the stream is decoded once into a
//! `Vec<Instr>`; jump operands are instruction indices, not byte offsets.
//!
//! Opcode ranges:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Locals, fields and statics
//! - 0x20-0x2F: Arithmetic & logic
//! - 0x30-0x3F: Comparison
//! - 0x40-0x4F: Control flow
//! - 0x50-0x5F: Calls, events and sequences

use super::encoder::{DecodeError, ImageReader, ImageWriter};

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Push null
    PushNull = 0x03,
    /// Push true
    PushTrue = 0x04,
    /// Push false
    PushFalse = 0x05,
    /// Push i64 constant (operand: i64)
    PushInt = 0x06,
    /// Push f64 constant (operand: f64)
    PushFloat = 0x07,
    /// Push string from the module string table (operand: u32 index)
    PushStr = 0x08,
    /// Push the current instance
    LoadThis = 0x09,

    // ===== Locals, fields and statics (0x10-0x1F) =====
    /// Load local slot (operand: u16)
    Load = 0x10,
    /// Store to local slot (operand: u16)
    Store = 0x11,
    /// Load instance field (operand: u32 name)
    LoadField = 0x12,
    /// Store instance field (operand: u32 name)
    StoreField = 0x13,
    /// Load static field of the current type (operand: u32 name)
    LoadStatic = 0x14,
    /// Store static field of the current type (operand: u32 name)
    StoreStatic = 0x15,

    // ===== Arithmetic & logic (0x20-0x2F) =====
    /// Pop b, pop a, push a + b (concatenates when either is a string)
    Add = 0x20,
    /// Pop b, pop a, push a - b
    Sub = 0x21,
    /// Pop b, pop a, push a * b
    Mul = 0x22,
    /// Pop b, pop a, push a / b
    Div = 0x23,
    /// Pop b, pop a, push a % b
    Rem = 0x24,
    /// Negate top of stack
    Neg = 0x25,
    /// Logical not of top of stack
    Not = 0x26,

    // ===== Comparison (0x30-0x3F) =====
    /// Equal
    Eq = 0x30,
    /// Not equal
    Ne = 0x31,
    /// Less than
    Lt = 0x32,
    /// Less or equal
    Le = 0x33,
    /// Greater than
    Gt = 0x34,
    /// Greater or equal
    Ge = 0x35,

    // ===== Control flow (0x40-0x4F) =====
    /// Unconditional jump (operand: u32 instruction index)
    Jmp = 0x40,
    /// Pop; jump if truthy (operand: u32)
    JmpIf = 0x41,
    /// Pop; jump if falsy (operand: u32)
    JmpIfNot = 0x42,
    /// Return top of stack
    Ret = 0x43,
    /// Return null
    RetVoid = 0x44,
    /// Pop a message and fail the invocation
    Throw = 0x45,

    // ===== Calls, events and sequences (0x50-0x5F) =====
    /// Call a method on the current type (operands: u32 name, u8 argc)
    Call = 0x50,
    /// Call a static method of a type in the same module (operands: u32 type, u32 name, u8 argc)
    CallStatic = 0x51,
    /// Call a host native through the import table (operands: u32 import, u8 argc)
    CallExtern = 0x52,
    /// Raise an event of the current type (operands: u32 name, u8 argc)
    Raise = 0x53,
    /// Suspend a sequence method with the top of stack
    Yield = 0x54,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Nop,
            0x01 => Self::Pop,
            0x02 => Self::Dup,
            0x03 => Self::PushNull,
            0x04 => Self::PushTrue,
            0x05 => Self::PushFalse,
            0x06 => Self::PushInt,
            0x07 => Self::PushFloat,
            0x08 => Self::PushStr,
            0x09 => Self::LoadThis,
            0x10 => Self::Load,
            0x11 => Self::Store,
            0x12 => Self::LoadField,
            0x13 => Self::StoreField,
            0x14 => Self::LoadStatic,
            0x15 => Self::StoreStatic,
            0x20 => Self::Add,
            0x21 => Self::Sub,
            0x22 => Self::Mul,
            0x23 => Self::Div,
            0x24 => Self::Rem,
            0x25 => Self::Neg,
            0x26 => Self::Not,
            0x30 => Self::Eq,
            0x31 => Self::Ne,
            0x32 => Self::Lt,
            0x33 => Self::Le,
            0x34 => Self::Gt,
            0x35 => Self::Ge,
            0x40 => Self::Jmp,
            0x41 => Self::JmpIf,
            0x42 => Self::JmpIfNot,
            0x43 => Self::Ret,
            0x44 => Self::RetVoid,
            0x45 => Self::Throw,
            0x50 => Self::Call,
            0x51 => Self::CallStatic,
            0x52 => Self::CallExtern,
            0x53 => Self::Raise,
            0x54 => Self::Yield,
            _ => return None,
        })
    }

    /// Assembler mnemonic
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::PushNull => "push_null",
            Self::PushTrue => "push_true",
            Self::PushFalse => "push_false",
            Self::PushInt => "push_int",
            Self::PushFloat => "push_float",
            Self::PushStr => "push_str",
            Self::LoadThis => "load_this",
            Self::Load => "load",
            Self::Store => "store",
            Self::LoadField => "load_field",
            Self::StoreField => "store_field",
            Self::LoadStatic => "load_static",
            Self::StoreStatic => "store_static",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Neg => "neg",
            Self::Not => "not",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Jmp => "jmp",
            Self::JmpIf => "jmp_if",
            Self::JmpIfNot => "jmp_ifnot",
            Self::Ret => "ret",
            Self::RetVoid => "ret_void",
            Self::Throw => "throw",
            Self::Call => "call",
            Self::CallStatic => "call_static",
            Self::CallExtern => "call_extern",
            Self::Raise => "raise",
            Self::Yield => "yield",
        }
    }

    /// Look up an opcode by assembler mnemonic
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        (0u8..=0x54)
            .filter_map(Self::from_u8)
            .find(|op| op.mnemonic() == name)
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Jmp | Self::Ret | Self::RetVoid | Self::Throw)
    }
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    /// No operation
    Nop,
    /// Discard top of stack
    Pop,
    /// Duplicate top of stack
    Dup,
    /// Push null
    PushNull,
    /// Push a bool
    PushBool(bool),
    /// Push an integer
    PushInt(i64),
    /// Push a float
    PushFloat(f64),
    /// Push a string table entry
    PushStr(u32),
    /// Push the current instance
    LoadThis,
    /// Load a local slot
    Load(u16),
    /// Store a local slot
    Store(u16),
    /// Load an instance field by name
    LoadField(u32),
    /// Store an instance field by name
    StoreField(u32),
    /// Load a static field by name
    LoadStatic(u32),
    /// Store a static field by name
    StoreStatic(u32),
    /// Add or concatenate
    Add,
    /// Subtract
    Sub,
    /// Multiply
    Mul,
    /// Divide
    Div,
    /// Remainder
    Rem,
    /// Negate
    Neg,
    /// Logical not
    Not,
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less or equal
    Le,
    /// Greater than
    Gt,
    /// Greater or equal
    Ge,
    /// Jump to instruction index
    Jmp(u32),
    /// Conditional jump
    JmpIf(u32),
    /// Conditional jump on falsy
    JmpIfNot(u32),
    /// Return top of stack
    Ret,
    /// Return null
    RetVoid,
    /// Fail with the message on top of stack
    Throw,
    /// Call a method of the current type
    Call {
        /// Method name (string table index)
        name: u32,
        /// Argument count
        argc: u8,
    },
    /// Call a static method of another type in the module
    CallStatic {
        /// Type name (string table index)
        type_name: u32,
        /// Method name (string table index)
        name: u32,
        /// Argument count
        argc: u8,
    },
    /// Call a host native
    CallExtern {
        /// Import table index
        import: u32,
        /// Argument count
        argc: u8,
    },
    /// Raise an event
    Raise {
        /// Event name (string table index)
        name: u32,
        /// Argument count
        argc: u8,
    },
    /// Suspend a sequence method
    Yield,
}

impl Instr {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Nop => Opcode::Nop,
            Instr::Pop => Opcode::Pop,
            Instr::Dup => Opcode::Dup,
            Instr::PushNull => Opcode::PushNull,
            Instr::PushBool(true) => Opcode::PushTrue,
            Instr::PushBool(false) => Opcode::PushFalse,
            Instr::PushInt(_) => Opcode::PushInt,
            Instr::PushFloat(_) => Opcode::PushFloat,
            Instr::PushStr(_) => Opcode::PushStr,
            Instr::LoadThis => Opcode::LoadThis,
            Instr::Load(_) => Opcode::Load,
            Instr::Store(_) => Opcode::Store,
            Instr::LoadField(_) => Opcode::LoadField,
            Instr::StoreField(_) => Opcode::StoreField,
            Instr::LoadStatic(_) => Opcode::LoadStatic,
            Instr::StoreStatic(_) => Opcode::StoreStatic,
            Instr::Add => Opcode::Add,
            Instr::Sub => Opcode::Sub,
            Instr::Mul => Opcode::Mul,
            Instr::Div => Opcode::Div,
            Instr::Rem => Opcode::Rem,
            Instr::Neg => Opcode::Neg,
            Instr::Not => Opcode::Not,
            Instr::Eq => Opcode::Eq,
            Instr::Ne => Opcode::Ne,
            Instr::Lt => Opcode::Lt,
            Instr::Le => Opcode::Le,
            Instr::Gt => Opcode::Gt,
            Instr::Ge => Opcode::Ge,
            Instr::Jmp(_) => Opcode::Jmp,
            Instr::JmpIf(_) => Opcode::JmpIf,
            Instr::JmpIfNot(_) => Opcode::JmpIfNot,
            Instr::Ret => Opcode::Ret,
            Instr::RetVoid => Opcode::RetVoid,
            Instr::Throw => Opcode::Throw,
            Instr::Call { .. } => Opcode::Call,
            Instr::CallStatic { .. } => Opcode::CallStatic,
            Instr::CallExtern { .. } => Opcode::CallExtern,
            Instr::Raise { .. } => Opcode::Raise,
            Instr::Yield => Opcode::Yield,
        }
    }

    /// Jump target, if this is a jump
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Instr::Jmp(t) | Instr::JmpIf(t) | Instr::JmpIfNot(t) => Some(*t),
            _ => None,
        }
    }

    /// Append the encoded instruction
    pub fn encode(&self, writer: &mut ImageWriter) {
        writer.emit_u8(self.opcode() as u8);
        match *self {
            Instr::PushInt(v) => writer.emit_i64(v),
            Instr::PushFloat(v) => writer.emit_f64(v),
            Instr::Load(slot) | Instr::Store(slot) => writer.emit_u16(slot),
            Instr::PushStr(idx)
            | Instr::LoadField(idx)
            | Instr::StoreField(idx)
            | Instr::LoadStatic(idx)
            | Instr::StoreStatic(idx)
            | Instr::Jmp(idx)
            | Instr::JmpIf(idx)
            | Instr::JmpIfNot(idx) => writer.emit_u32(idx),
            Instr::Call { name, argc } | Instr::Raise { name, argc } => {
                writer.emit_u32(name);
                writer.emit_u8(argc);
            }
            Instr::CallStatic {
                type_name,
                name,
                argc,
            } => {
                writer.emit_u32(type_name);
                writer.emit_u32(name);
                writer.emit_u8(argc);
            }
            Instr::CallExtern { import, argc } => {
                writer.emit_u32(import);
                writer.emit_u8(argc);
            }
            _ => {}
        }
    }

    /// Decode one instruction
    pub fn decode(reader: &mut ImageReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.offset();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;

        Ok(match opcode {
            Opcode::Nop => Instr::Nop,
            Opcode::Pop => Instr::Pop,
            Opcode::Dup => Instr::Dup,
            Opcode::PushNull => Instr::PushNull,
            Opcode::PushTrue => Instr::PushBool(true),
            Opcode::PushFalse => Instr::PushBool(false),
            Opcode::PushInt => Instr::PushInt(reader.read_i64()?),
            Opcode::PushFloat => Instr::PushFloat(reader.read_f64()?),
            Opcode::PushStr => Instr::PushStr(reader.read_u32()?),
            Opcode::LoadThis => Instr::LoadThis,
            Opcode::Load => Instr::Load(reader.read_u16()?),
            Opcode::Store => Instr::Store(reader.read_u16()?),
            Opcode::LoadField => Instr::LoadField(reader.read_u32()?),
            Opcode::StoreField => Instr::StoreField(reader.read_u32()?),
            Opcode::LoadStatic => Instr::LoadStatic(reader.read_u32()?),
            Opcode::StoreStatic => Instr::StoreStatic(reader.read_u32()?),
            Opcode::Add => Instr::Add,
            Opcode::Sub => Instr::Sub,
            Opcode::Mul => Instr::Mul,
            Opcode::Div => Instr::Div,
            Opcode::Rem => Instr::Rem,
            Opcode::Neg => Instr::Neg,
            Opcode::Not => Instr::Not,
            Opcode::Eq => Instr::Eq,
            Opcode::Ne => Instr::Ne,
            Opcode::Lt => Instr::Lt,
            Opcode::Le => Instr::Le,
            Opcode::Gt => Instr::Gt,
            Opcode::Ge => Instr::Ge,
            Opcode::Jmp => Instr::Jmp(reader.read_u32()?),
            Opcode::JmpIf => Instr::JmpIf(reader.read_u32()?),
            Opcode::JmpIfNot => Instr::JmpIfNot(reader.read_u32()?),
            Opcode::Ret => Instr::Ret,
            Opcode::RetVoid => Instr::RetVoid,
            Opcode::Throw => Instr::Throw,
            Opcode::Call => Instr::Call {
                name: reader.read_u32()?,
                argc: reader.read_u8()?,
            },
            Opcode::CallStatic => Instr::CallStatic {
                type_name: reader.read_u32()?,
                name: reader.read_u32()?,
                argc: reader.read_u8()?,
            },
            Opcode::CallExtern => Instr::CallExtern {
                import: reader.read_u32()?,
                argc: reader.read_u8()?,
            },
            Opcode::Raise => Instr::Raise {
                name: reader.read_u32()?,
                argc: reader.read_u8()?,
            },
            Opcode::Yield => Instr::Yield,
        })
    }
}

/// Encode a method body
pub fn encode_code(code: &[Instr]) -> Vec<u8> {
    let mut writer = ImageWriter::new();
    for instr in code {
        instr.encode(&mut writer);
    }
    writer.into_bytes()
}

/// Decode a complete method body
pub fn decode_code(bytes: &[u8]) -> Result<Vec<Instr>, DecodeError> {
    let mut reader = ImageReader::new(bytes);
    let mut code = Vec::new();
    while !reader.is_eof() {
        code.push(Instr::decode(&mut reader)?);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0u8..=0xFF {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op as u8, byte);
                assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
            }
        }
    }

    #[test]
    fn test_code_with_operands() {
        let code = vec![
            Instr::PushInt(-7),
            Instr::PushFloat(2.5),
            Instr::CallStatic {
                type_name: 3,
                name: 4,
                argc: 2,
            },
            Instr::JmpIfNot(0),
            Instr::Ret,
        ];
        let bytes = encode_code(&code);
        assert_eq!(decode_code(&bytes).unwrap(), code);
    }

    #[test]
    fn test_invalid_opcode_reports_offset() {
        let mut bytes = encode_code(&[Instr::Nop, Instr::Pop]);
        bytes.push(0xEE);
        assert_eq!(
            decode_code(&bytes),
            Err(DecodeError::InvalidOpcode {
                opcode: 0xEE,
                offset: 2
            })
        );
    }
}
