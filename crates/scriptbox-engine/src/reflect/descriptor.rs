//! Member descriptors handed out by the caches

use crate::image::{field_flags, FieldType, ParamDef};

/// A resolved field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: FieldType,
    /// Static field
    pub is_static: bool,
    /// Flag bits
    pub flags: u8,
    /// Storage slot (instance slots and static slots are numbered separately)
    pub slot: usize,
}

impl FieldDescriptor {
    /// Whether hot-swap treats this field as serialized state
    pub fn is_serializable(&self) -> bool {
        let marked = self.flags & (field_flags::PUBLIC | field_flags::SERIALIZED) != 0;
        marked && self.flags & field_flags::NON_SERIALIZED == 0
    }
}

/// A resolved property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Property name
    pub name: String,
    /// Declared type
    pub ty: FieldType,
    /// Static property
    pub is_static: bool,
    /// Getter method
    pub getter: Option<String>,
    /// Setter method
    pub setter: Option<String>,
}

/// A resolved method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method name
    pub name: String,
    /// Index into the type's method table
    pub index: usize,
    /// Static method
    pub is_static: bool,
    /// Returns a sequence
    pub is_sequence: bool,
    /// Parameters
    pub params: Vec<ParamDef>,
    /// Return type
    pub returns: Option<FieldType>,
    /// Parameters plus locals
    pub slot_count: usize,
}

/// A resolved event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    /// Event name
    pub name: String,
    /// Static event
    pub is_static: bool,
}
