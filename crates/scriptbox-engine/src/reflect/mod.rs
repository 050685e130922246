//! Reflection over loaded script types
//!
//! - [`ModuleType`]: one declared type with its member caches
//! - [`InstanceProxy`]: a live instance with disposable accessors
//! - field/property/event proxies in throwing and safe flavors

pub mod descriptor;
pub mod instance;
pub mod member_cache;
pub mod module_type;
pub mod proxy;

pub use descriptor::{EventDescriptor, FieldDescriptor, MethodDescriptor, PropertyDescriptor};
pub use instance::{InstanceProxy, ProxyId};
pub use member_cache::MemberCache;
pub use module_type::ModuleType;
pub use proxy::{
    CallConvention, EventProxy, FieldProxy, PropertyProxy, SafeEventProxy, SafeFieldProxy,
    SafePropertyProxy, Target,
};
