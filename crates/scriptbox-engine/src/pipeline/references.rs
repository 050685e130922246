//! Reference providers
//!
//! A compile sees the types of every reference it is given. Providers turn
//! something the caller has (a loaded module, a file, bytes, a stream, a
//! native library, an earlier compile) into a [`Reference`].

use super::result::CompileResult;
use crate::compiler::{ExportedMember, ExportedType, Reference};
use crate::domain::{Domain, Module};
use crate::error::{ReferenceError, ScriptError, ScriptResult};
use crate::image::ModuleImage;
use crate::natives::NativeLibrary;
use parking_lot::Mutex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Something a compile can reference
pub trait ReferenceProvider: Send + Sync {
    /// Produce the reference; `domain` is the domain compiling
    fn resolve(&self, domain: &Domain) -> ScriptResult<Reference>;

    /// Short description used in resolution errors
    fn describe(&self) -> String;
}

/// Compile-time view of an image's public types
pub fn image_reference(image: &ModuleImage) -> Reference {
    Reference {
        name: image.name.clone(),
        types: image
            .types
            .iter()
            .filter(|t| t.is_public)
            .map(|t| ExportedType {
                full_name: t.full_name(),
                kind: t.kind,
                // A method whose arity the call encoding cannot carry is not exported
                members: t
                    .methods
                    .iter()
                    .filter_map(|m| {
                        let param_count = u8::try_from(m.params.len()).ok()?;
                        Some(ExportedMember {
                            name: m.name.clone(),
                            param_count: Some(param_count),
                        })
                    })
                    .chain(t.fields.iter().map(|f| ExportedMember {
                        name: f.name.clone(),
                        param_count: None,
                    }))
                    .collect(),
            })
            .collect(),
    }
}

fn decode_reference(bytes: &[u8]) -> ScriptResult<Reference> {
    Ok(image_reference(&ModuleImage::decode(bytes)?))
}

/// A module already loaded in a domain
#[derive(Debug, Clone)]
pub struct LoadedModuleReference(pub Arc<Module>);

impl ReferenceProvider for LoadedModuleReference {
    fn resolve(&self, _domain: &Domain) -> ScriptResult<Reference> {
        Ok(self.0.reference())
    }

    fn describe(&self) -> String {
        format!("module '{}'", self.0.name())
    }
}

/// A name or a path
///
/// An existing file is read as an image. Otherwise the file stem names a
/// module in the compiling domain or one of its native libraries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedReference(pub String);

impl NamedReference {
    /// Reference by name or path
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl ReferenceProvider for NamedReference {
    fn resolve(&self, domain: &Domain) -> ScriptResult<Reference> {
        let path = Path::new(&self.0);
        if path.is_file() {
            return decode_reference(&std::fs::read(path)?);
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(self.0.as_str());
        if let Some(module) = domain.find_module(stem) {
            return Ok(module.reference());
        }
        if let Some(library) = domain.natives().library(stem) {
            return Ok(library.reference());
        }
        Err(ScriptError::InvalidArgument(format!(
            "no file, module or native library named '{}'",
            self.0
        )))
    }

    fn describe(&self) -> String {
        format!("name '{}'", self.0)
    }
}

/// An image held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference(pub Vec<u8>);

impl ReferenceProvider for ImageReference {
    fn resolve(&self, _domain: &Domain) -> ScriptResult<Reference> {
        decode_reference(&self.0)
    }

    fn describe(&self) -> String {
        format!("image ({} bytes)", self.0.len())
    }
}

/// An image read from a byte stream on first resolve
pub struct StreamReference {
    label: String,
    reader: Mutex<Box<dyn Read + Send>>,
}

impl StreamReference {
    /// Wrap a reader
    pub fn new(label: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            label: label.into(),
            reader: Mutex::new(Box::new(reader)),
        }
    }
}

impl std::fmt::Debug for StreamReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReference").field("label", &self.label).finish()
    }
}

impl ReferenceProvider for StreamReference {
    fn resolve(&self, _domain: &Domain) -> ScriptResult<Reference> {
        let mut bytes = Vec::new();
        self.reader.lock().read_to_end(&mut bytes)?;
        decode_reference(&bytes)
    }

    fn describe(&self) -> String {
        format!("stream '{}'", self.label)
    }
}

/// A file path, read when resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference(pub PathBuf);

impl ReferenceProvider for FileReference {
    fn resolve(&self, _domain: &Domain) -> ScriptResult<Reference> {
        decode_reference(&std::fs::read(&self.0)?)
    }

    fn describe(&self) -> String {
        format!("file '{}'", self.0.display())
    }
}

impl ReferenceProvider for CompileResult {
    fn resolve(&self, _domain: &Domain) -> ScriptResult<Reference> {
        if !self.success() {
            return Err(ScriptError::InvalidArgument(
                "an unsuccessful compile cannot be referenced".to_string(),
            ));
        }
        match (self.image_bytes(), self.image_path()) {
            (Some(bytes), _) => decode_reference(bytes),
            (None, Some(path)) => decode_reference(&std::fs::read(path)?),
            (None, None) => Err(ScriptError::InvalidArgument(
                "compile result has no image".to_string(),
            )),
        }
    }

    fn describe(&self) -> String {
        format!("compile result '{}'", self.module_name())
    }
}

impl ReferenceProvider for NativeLibrary {
    fn resolve(&self, _domain: &Domain) -> ScriptResult<Reference> {
        Ok(self.reference())
    }

    fn describe(&self) -> String {
        format!("native library '{}'", self.name())
    }
}

/// Resolve every provider; any failure fails the whole set
pub fn resolve_all(
    domain: &Domain,
    providers: &[&dyn ReferenceProvider],
) -> ScriptResult<Vec<Reference>> {
    let mut references = Vec::with_capacity(providers.len());
    let mut errors = Vec::new();
    for provider in providers {
        match provider.resolve(domain) {
            Ok(reference) => references.push(reference),
            Err(e) => errors.push(ReferenceError {
                provider: provider.describe(),
                message: e.to_string(),
            }),
        }
    }
    if errors.is_empty() {
        Ok(references)
    } else {
        Err(ScriptError::ReferenceResolutionFailure(errors))
    }
}
