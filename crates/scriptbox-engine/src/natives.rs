//! Host native functions
//!
//! Scripts reach host code through `import` declarations. A [`NativeLibrary`]
//! groups handlers under a library name; a [`NativeRegistry`] is the dispatch
//! table a domain links `call_extern` sites against.

use crate::compiler::{ExportedMember, ExportedType, Reference};
use crate::image::{ImportDef, TypeKind};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use scriptbox_sdk::{NativeResult, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Native handler
pub type NativeFn = Arc<dyn Fn(&[Value]) -> NativeResult<Value> + Send + Sync>;

#[derive(Clone)]
struct NativeEntry {
    param_count: Option<u8>,
    handler: NativeFn,
}

/// A named set of host functions
#[derive(Clone)]
pub struct NativeLibrary {
    name: String,
    // type path -> member -> entry
    types: BTreeMap<String, BTreeMap<String, NativeEntry>>,
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("functions", &self.len())
            .finish()
    }
}

impl NativeLibrary {
    /// Create an empty library
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: BTreeMap::new(),
        }
    }

    /// Library name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn insert(&mut self, path: &str, param_count: Option<u8>, handler: NativeFn) -> &mut Self {
        let (type_path, member) = path.rsplit_once('.').unwrap_or(("", path));
        self.types
            .entry(type_path.to_string())
            .or_default()
            .insert(member.to_string(), NativeEntry { param_count, handler });
        self
    }

    /// Register a handler taking exactly `param_count` arguments
    ///
    /// `path` is `Namespace.Type.member`.
    pub fn register<F>(&mut self, path: &str, param_count: u8, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> NativeResult<Value> + Send + Sync + 'static,
    {
        self.insert(path, Some(param_count), Arc::new(f))
    }

    /// Register a handler taking any number of arguments
    pub fn register_variadic<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> NativeResult<Value> + Send + Sync + 'static,
    {
        self.insert(path, None, Arc::new(f))
    }

    /// Handler for `Type.member`
    pub fn get(&self, type_path: &str, member: &str) -> Option<NativeFn> {
        self.types
            .get(type_path)?
            .get(member)
            .map(|e| e.handler.clone())
    }

    /// Whether `Namespace.Type.member` is registered
    pub fn contains(&self, path: &str) -> bool {
        let (type_path, member) = path.rsplit_once('.').unwrap_or(("", path));
        self.get(type_path, member).is_some()
    }

    /// Number of handlers
    pub fn len(&self) -> usize {
        self.types.values().map(BTreeMap::len).sum()
    }

    /// Whether the library has no handlers
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compile-time view of the library
    pub fn reference(&self) -> Reference {
        Reference {
            name: self.name.clone(),
            types: self
                .types
                .iter()
                .map(|(type_path, members)| ExportedType {
                    full_name: type_path.clone(),
                    kind: TypeKind::Plain,
                    members: members
                        .iter()
                        .map(|(name, entry)| ExportedMember {
                            name: name.clone(),
                            param_count: entry.param_count,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Dispatch table of native libraries
#[derive(Default)]
pub struct NativeRegistry {
    libraries: RwLock<FxHashMap<String, Arc<NativeLibrary>>>,
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("libraries", &self.names())
            .finish()
    }
}

static SHARED: Lazy<Arc<NativeRegistry>> = Lazy::new(|| Arc::new(NativeRegistry::new()));

impl NativeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the host's default context, shared by non-sandboxed domains
    pub fn shared() -> Arc<NativeRegistry> {
        SHARED.clone()
    }

    /// Add or replace a library
    pub fn register_library(&self, library: NativeLibrary) -> Option<Arc<NativeLibrary>> {
        self.libraries
            .write()
            .insert(library.name.clone(), Arc::new(library))
    }

    /// Library by name
    pub fn library(&self, name: &str) -> Option<Arc<NativeLibrary>> {
        self.libraries.read().get(name).cloned()
    }

    /// Handler for an import entry
    pub fn resolve(&self, import: &ImportDef) -> Option<NativeFn> {
        let library = self.library(&import.library)?;
        library.get(&import.full_type_name(), &import.member)
    }

    /// Registered library names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.libraries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every library
    pub fn clear(&self) {
        self.libraries.write().clear();
    }

    /// Number of libraries
    pub fn len(&self) -> usize {
        self.libraries.read().len()
    }

    /// Whether no library is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_sdk::NativeError;

    fn math() -> NativeLibrary {
        let mut lib = NativeLibrary::new("host");
        lib.register("Engine.Math.abs", 1, |args| {
            let v = args[0].as_int().ok_or_else(|| NativeError::from("expected int"))?;
            Ok(Value::Int(v.abs()))
        })
        .register_variadic("Engine.Debug.log", |_| Ok(Value::Null));
        lib
    }

    #[test]
    fn test_library_register_and_get() {
        let lib = math();
        assert_eq!(lib.len(), 2);
        assert!(lib.contains("Engine.Math.abs"));
        assert!(!lib.contains("Engine.Math.sqrt"));
        let abs = lib.get("Engine.Math", "abs").unwrap();
        assert_eq!(abs(&[Value::Int(-4)]).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_reference_lists_members() {
        let reference = math().reference();
        assert_eq!(reference.name, "host");
        let ty = reference.find_type("Engine.Math").unwrap();
        assert_eq!(ty.members[0].param_count, Some(1));
        let log = reference.find_type("Engine.Debug").unwrap();
        assert_eq!(log.members[0].param_count, None);
    }

    #[test]
    fn test_registry_resolves_imports() {
        let registry = NativeRegistry::new();
        registry.register_library(math());
        let import = ImportDef {
            library: "host".to_string(),
            namespace: "Engine".to_string(),
            type_name: "Math".to_string(),
            member: "abs".to_string(),
            param_count: 1,
            is_unsafe: false,
        };
        assert!(registry.resolve(&import).is_some());

        let missing = ImportDef {
            library: "other".to_string(),
            ..import
        };
        assert!(registry.resolve(&missing).is_none());

        registry.clear();
        assert!(registry.is_empty());
    }
}
