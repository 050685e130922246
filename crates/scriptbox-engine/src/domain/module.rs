//! Loaded modules
//!
//! A [`Module`] owns the raw image (and optional symbols), the decoded
//! image, its security outcome and a lazily built type map. The type map
//! is only built once the module has passed registration; until then
//! [`Module::types`] is empty and no [`ModuleType`] exists.

use super::{Domain, DomainInner};
use crate::compiler::Reference;
use crate::error::{ScriptError, ScriptResult};
use crate::image::{ModuleImage, SymbolImage};
use crate::pipeline::{image_reference, CompileResult};
use crate::reflect::ModuleType;
use crate::security::{SecurityPolicy, SecurityReport, Verifier};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::debug;

/// Raw outputs a module is created from
#[derive(Debug, Clone, Default)]
pub struct ModuleSource {
    /// Image bytes
    pub image: Vec<u8>,
    /// Symbol bytes
    pub symbols: Option<Vec<u8>>,
    /// File the image was read from
    pub image_path: Option<PathBuf>,
    /// File the symbols were read from
    pub symbol_path: Option<PathBuf>,
}

impl ModuleSource {
    /// In-memory image without symbols
    pub fn from_bytes(image: Vec<u8>) -> Self {
        Self {
            image,
            ..Self::default()
        }
    }

    /// Attach symbols
    pub fn with_symbols(mut self, symbols: Option<Vec<u8>>) -> Self {
        self.symbols = symbols;
        self
    }
}

#[derive(Debug, Default)]
struct SecurityState {
    validated: bool,
    policy_hash: Option<String>,
    report: Option<SecurityReport>,
}

struct TypeMap {
    ordered: Vec<Arc<ModuleType>>,
    by_name: FxHashMap<String, Arc<ModuleType>>,
}

/// A module loaded into a domain
pub struct Module {
    me: Weak<Module>,
    domain: Weak<DomainInner>,
    domain_name: String,
    source: ModuleSource,
    image: Arc<ModuleImage>,
    compile_result: Option<CompileResult>,
    compiled_at: Option<SystemTime>,
    registered: AtomicBool,
    security: Mutex<SecurityState>,
    types: OnceCell<TypeMap>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.image.name)
            .field("domain", &self.domain_name)
            .field("checksum", &self.checksum_hex())
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl Module {
    /// Decode an image for a domain; the module is not registered yet
    pub(crate) fn new(
        domain: &Domain,
        source: ModuleSource,
        compile_result: Option<CompileResult>,
    ) -> ScriptResult<Arc<Self>> {
        let image = Arc::new(ModuleImage::decode(&source.image)?);
        let runtime_compiled = image.has_flag(crate::image::flags::RUNTIME_COMPILED);
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            domain: domain.downgrade(),
            domain_name: domain.name().to_string(),
            source,
            image,
            compile_result,
            compiled_at: runtime_compiled.then(SystemTime::now),
            registered: AtomicBool::new(false),
            security: Mutex::new(SecurityState::default()),
            types: OnceCell::new(),
        }))
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.image.name
    }

    /// Owning domain
    pub fn domain(&self) -> ScriptResult<Domain> {
        match Domain::upgrade(&self.domain) {
            Some(domain) if !domain.is_disposed() => Ok(domain),
            _ => Err(ScriptError::DomainDisposed(self.domain_name.clone())),
        }
    }

    pub(crate) fn belongs_to(&self, domain: &Domain) -> bool {
        Weak::ptr_eq(&self.domain, &domain.downgrade())
    }

    /// Decoded image
    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    /// Raw image bytes
    pub fn image_bytes(&self) -> &[u8] {
        &self.source.image
    }

    /// File the image came from or was written to
    pub fn image_path(&self) -> Option<&Path> {
        self.source.image_path.as_deref()
    }

    /// Raw symbol bytes
    pub fn symbol_bytes(&self) -> Option<&[u8]> {
        self.source.symbols.as_deref()
    }

    /// File the symbols came from or were written to
    pub fn symbol_path(&self) -> Option<&Path> {
        self.source.symbol_path.as_deref()
    }

    /// Decoded debug symbols
    pub fn symbols(&self) -> ScriptResult<Option<SymbolImage>> {
        match self.symbol_bytes() {
            Some(bytes) => Ok(Some(SymbolImage::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// SHA-256 of the image payload
    pub fn checksum(&self) -> [u8; 32] {
        self.image.checksum
    }

    /// Checksum as lowercase hex
    pub fn checksum_hex(&self) -> String {
        self.image.checksum_hex()
    }

    /// Produced by a compiler at run time
    pub fn is_runtime_compiled(&self) -> bool {
        self.compiled_at.is_some()
    }

    /// When the module was loaded after a run-time compile
    pub fn compiled_at(&self) -> Option<SystemTime> {
        self.compiled_at
    }

    /// Compile result the module came from
    pub fn compile_result(&self) -> Option<&CompileResult> {
        self.compile_result.as_ref()
    }

    /// Whether registration completed
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Security
    // ------------------------------------------------------------------

    /// Whether the last verification passed
    pub fn is_security_verified(&self) -> bool {
        self.security.lock().validated
    }

    /// Last verification report
    pub fn security_report(&self) -> Option<SecurityReport> {
        self.security.lock().report.clone()
    }

    /// Run the verifier unless a passing report for this policy is cached
    ///
    /// Failed reports are kept for inspection but never reused.
    pub(crate) fn verify(&self, verifier: &dyn Verifier, policy: &SecurityPolicy) -> SecurityReport {
        let hash = policy.hash();
        let mut state = self.security.lock();
        if state.validated && state.policy_hash.as_deref() == Some(hash.as_str()) {
            if let Some(report) = &state.report {
                debug!(module = self.name(), "security report cached for policy");
                return report.clone();
            }
        }

        let report = verifier.verify(&self.source.image, self.symbol_bytes(), policy);
        state.validated = report.passed();
        state.policy_hash = state.validated.then_some(hash);
        state.report = Some(report.clone());
        report
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn type_map(&self) -> Option<&TypeMap> {
        if !self.is_registered() {
            return None;
        }
        Some(self.types.get_or_init(|| {
            let mut ordered = Vec::with_capacity(self.image.types.len());
            for (index, def) in self.image.types.iter().enumerate() {
                if def.parent.is_none() {
                    let ty = ModuleType::build(
                        self.me.clone(),
                        &self.domain_name,
                        &self.image,
                        index,
                        Weak::new(),
                    );
                    collect(&ty, &mut ordered);
                }
            }
            ordered.sort_by_key(|t| t.index());
            let by_name = ordered
                .iter()
                .map(|t| (t.full_name().to_string(), t.clone()))
                .collect();
            debug!(module = self.name(), types = ordered.len(), "built type map");
            TypeMap { ordered, by_name }
        }))
    }

    /// Every type, nested types included, in declaration order
    pub fn types(&self) -> &[Arc<ModuleType>] {
        self.type_map().map_or(&[], |m| m.ordered.as_slice())
    }

    /// Type by full name, then by simple name
    pub fn find_type(&self, name: &str) -> Option<Arc<ModuleType>> {
        let map = self.type_map()?;
        map.by_name
            .get(name)
            .or_else(|| map.ordered.iter().find(|t| t.name() == name))
            .cloned()
    }

    /// First type that is or derives from `base`
    pub fn find_sub_type_of(&self, base: &str) -> Option<Arc<ModuleType>> {
        self.types().iter().find(|t| t.is_sub_type_of(base)).cloned()
    }

    /// Every type that is or derives from `base`
    pub fn find_all_sub_types_of(&self, base: &str) -> Vec<Arc<ModuleType>> {
        self.types()
            .iter()
            .filter(|t| t.is_sub_type_of(base))
            .cloned()
            .collect()
    }

    /// First declared top-level non-interface type, else the first type
    pub fn main_type(&self) -> Option<Arc<ModuleType>> {
        let index = self.image.main_type_index()?;
        self.types().iter().find(|t| t.index() == index).cloned()
    }

    /// Compile-time view of the module's public types
    pub fn reference(&self) -> Reference {
        image_reference(&self.image)
    }
}

fn collect(ty: &Arc<ModuleType>, out: &mut Vec<Arc<ModuleType>>) {
    out.push(ty.clone());
    for nested in ty.nested_types() {
        collect(nested, out);
    }
}
