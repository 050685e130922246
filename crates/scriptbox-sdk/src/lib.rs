//! Scriptbox SDK - host-facing types for embedding Scriptbox
//!
//! This crate provides the minimal types a host needs to exchange data with
//! dynamically loaded scripts without depending on the full engine:
//!
//! - [`Value`]: the dynamic value model
//! - [`FromValue`] / [`IntoValue`]: conversions for host natives
//! - [`Sequence`] / [`SequenceHandle`]: resumable work driven by the host
//! - [`Host`]: the entity lifecycle contract for attached script types

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod convert;
pub mod error;
pub mod host;
pub mod sequence;
pub mod value;

pub use convert::{FromValue, IntoValue};
pub use error::{HostError, NativeError, NativeResult};
pub use host::{ComponentId, EntityId, Host, SceneId};
pub use sequence::{Sequence, SequenceHandle, SequenceStep};
pub use value::{ObjectRef, Value, ValueType};
