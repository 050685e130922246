//! Scriptbox Engine
//!
//! Runtime loading of compiled script modules into a host application:
//! - **Images**: the binary module format and debug symbols (`image`)
//! - **Compiler**: the pluggable compiler service and the bundled assembler (`compiler`)
//! - **Security**: policy-driven verification of images before registration (`security`)
//! - **Domains**: isolated registries of modules and live instances (`domain`)
//! - **Pipeline**: compile, emit, post-process, verify and register (`pipeline`, `task`)
//! - **Reflection**: types, instances and member proxies (`reflect`)
//! - **Hot-swap**: replacing live instances with newly loaded types (`hotswap`)
//!
//! # Example
//!
//! ```rust,ignore
//! use scriptbox_engine::{Domain, SecurityMode};
//!
//! let domain = Domain::builder("game").with_default_compiler().make_active(true).build()?;
//! let module = domain.compile_and_load_source(
//!     "type Greeter { static method hello() { ret \"hi\" } }",
//!     SecurityMode::Secure,
//!     &[],
//! )?;
//! let greeter = module.find_type("Greeter").unwrap();
//! let value = greeter.call_static("hello", vec![])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Binary module images and symbols
pub mod image;

/// Compiler service contract and the bundled assembler
pub mod compiler;

/// Security policies and the verifier
pub mod security;

/// Engine settings
pub mod settings;

/// Error types
pub mod error;

/// Host natives
pub mod natives;

/// Interpreter and live objects
pub mod vm;

/// Reflection over loaded types
pub mod reflect;

/// Domains and loaded modules
pub mod domain;

/// Compile and load pipeline
pub mod pipeline;

/// Background operations
pub mod task;

/// Live instance replacement
pub mod hotswap;

/// In-memory host
pub mod host;

// ============================================================================
// Re-exports
// ============================================================================

pub use compiler::{
    AssemblerCompiler, CompileOptions, CompilerService, Diagnostic, Reference, Severity,
    SourceText,
};
pub use domain::{
    active_domain, all_domains, find_domain, BroadcastErrorSink, BroadcastFilter,
    BroadcastSummary, Domain, DomainBuilder, Module, ModuleSource,
};
pub use error::{MemberKind, ReferenceError, ScriptError, ScriptResult};
pub use host::SceneHost;
pub use hotswap::{
    replace_in_scene, replace_instance, replace_on_entity, FieldOutcome, ReplaceOptions,
    ReplaceReport, ReplaceSource,
};
pub use image::ModuleImage;
pub use natives::{NativeLibrary, NativeRegistry};
pub use pipeline::{CompileResult, ModuleOutput, ModuleProcessor, ReferenceProvider};
pub use reflect::{CallConvention, InstanceProxy, ModuleType};
pub use security::{SecurityMode, SecurityPolicy, SecurityReport, Verifier};
pub use settings::{EngineSettings, LogDetail};
pub use task::{block_on_poll, AsyncOperation, CompileOperation, LoadOperation, Operation};

pub use scriptbox_sdk::{EntityId, Host, SceneId, Value};
