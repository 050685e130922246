//! Compile and load pipeline
//!
//! Every entry point takes the domain's pipeline lock for its whole run, so
//! overlapping compiles on one domain serialize. A compile:
//!
//! 1. resolves references (natives, loaded modules, settings, caller extras)
//! 2. hands sources to the compiler service
//! 3. emits the output to memory or disk and runs post-compile processors
//! 4. stores the result as the domain's last compile result
//!
//! Loading then sends the image through the security gate and registers it.

mod output;
mod references;
mod result;

pub use output::{random_name, OutputTarget, IMAGE_EXTENSION, SYMBOL_EXTENSION};
pub use references::{
    image_reference, resolve_all, FileReference, ImageReference, LoadedModuleReference,
    NamedReference, ReferenceProvider, StreamReference,
};
pub use result::{CompileResult, ModuleOutput};

use crate::compiler::{Reference, SourceText};
use crate::domain::{Domain, Module, ModuleSource};
use crate::error::{ScriptError, ScriptResult};
use crate::reflect::ModuleType;
use crate::security::SecurityMode;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

/// Error a processor reports
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// Rewrites compiler output before it is loaded
///
/// Failures and panics are logged and never abort the pipeline.
pub trait ModuleProcessor: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Inspect or patch the output
    fn process(&self, output: &mut ModuleOutput) -> Result<(), ProcessorError>;
}

fn main_type_of(module: &Module) -> ScriptResult<Arc<ModuleType>> {
    module.main_type().ok_or_else(|| {
        ScriptError::InvalidArgument(format!("module '{}' declares no types", module.name()))
    })
}

/// `*.sbs` files under `dir`, recursively, sorted
pub fn collect_sources(dir: &Path) -> ScriptResult<Vec<PathBuf>> {
    let pattern = dir.join("**").join("*.sbs");
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern)
        .map_err(|e| ScriptError::InvalidArgument(format!("bad source directory: {}", e)))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ScriptError::Io(e.into_error()))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_sources(paths: &[PathBuf]) -> ScriptResult<Vec<SourceText>> {
    paths
        .iter()
        .map(|p| {
            let text = std::fs::read_to_string(p)?;
            Ok(SourceText::new(p.display().to_string(), text))
        })
        .collect()
}

fn symbol_sidecar(path: &Path) -> Option<PathBuf> {
    let candidate = path.with_extension(SYMBOL_EXTENSION);
    candidate.is_file().then_some(candidate)
}

fn inline_sources(sources: &[&str]) -> Vec<SourceText> {
    sources
        .iter()
        .enumerate()
        .map(|(i, text)| SourceText::new(format!("<source{}>", i), *text))
        .collect()
}

impl Domain {
    // ------------------------------------------------------------------
    // Processors
    // ------------------------------------------------------------------

    /// Add a post-compile processor; adding the same one twice is a no-op
    pub fn add_processor(&self, processor: Arc<dyn ModuleProcessor>) -> ScriptResult<()> {
        self.ensure_alive()?;
        let mut state = self.state();
        if !state.processors.iter().any(|p| Arc::ptr_eq(p, &processor)) {
            state.processors.push(processor);
        }
        Ok(())
    }

    /// Remove a processor; returns whether it was installed
    pub fn remove_processor(&self, processor: &Arc<dyn ModuleProcessor>) -> bool {
        let mut state = self.state();
        let before = state.processors.len();
        state.processors.retain(|p| !Arc::ptr_eq(p, processor));
        state.processors.len() != before
    }

    fn run_processors(&self, output: &mut ModuleOutput) {
        let processors = self.state().processors.clone();
        for processor in processors {
            let outcome = catch_unwind(AssertUnwindSafe(|| processor.process(output)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(processor = processor.name(), error = %e, "module processor failed")
                }
                Err(_) => error!(processor = processor.name(), "module processor panicked"),
            }
        }
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// References every compile in this domain sees before caller extras:
    /// native libraries, loaded modules, then the settings' references
    fn resolve_references(&self, extra: &[&dyn ReferenceProvider]) -> ScriptResult<Vec<Reference>> {
        let mut references: Vec<Reference> = self
            .natives()
            .names()
            .iter()
            .filter_map(|name| self.natives().library(name))
            .map(|library| library.reference())
            .collect();
        references.extend(self.modules().iter().map(|m| m.reference()));

        let named: Vec<NamedReference> = self
            .settings()
            .references
            .into_iter()
            .map(NamedReference)
            .collect();
        let mut providers: Vec<&dyn ReferenceProvider> =
            named.iter().map(|n| n as &dyn ReferenceProvider).collect();
        providers.extend_from_slice(extra);
        references.extend(resolve_all(self, &providers)?);
        Ok(references)
    }

    // ------------------------------------------------------------------
    // Compile
    // ------------------------------------------------------------------

    pub(crate) fn compile_locked(
        &self,
        sources: &[SourceText],
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<CompileResult> {
        self.ensure_alive()?;
        let compiler = self.compiler()?;
        let settings = self.settings();
        let references = self.resolve_references(references)?;
        let target = OutputTarget::from_settings(&settings);
        let options = settings.compile_options(target.module_name.clone());

        debug!(
            domain = %self.name(),
            compiler = compiler.name(),
            sources = sources.len(),
            references = references.len(),
            module = %target.module_name,
            "compiling"
        );
        let raw = compiler.compile(sources, &references, &options);

        let output = match (raw.success, raw.image) {
            (true, Some(image)) => {
                let mut output = target.emit(settings.generate_in_memory, image, raw.symbols)?;
                self.run_processors(&mut output);
                output
            }
            _ => ModuleOutput::default(),
        };
        let result = CompileResult::new(raw.success, target.module_name, raw.diagnostics, output);
        self.set_last_compile_result(result.clone());
        self.log_compile_output(&result);
        Ok(result)
    }

    /// Compile one source text
    pub fn compile_from_source(
        &self,
        source: &str,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<CompileResult> {
        self.compile_from_sources(&inline_sources(&[source]), references)
    }

    /// Compile several source texts into one module
    pub fn compile_from_sources(
        &self,
        sources: &[SourceText],
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<CompileResult> {
        let _pipeline = self.pipeline_lock();
        self.compile_locked(sources, references)
    }

    /// Compile one file
    pub fn compile_from_file(
        &self,
        path: impl AsRef<Path>,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<CompileResult> {
        self.compile_from_files(&[path.as_ref().to_path_buf()], references)
    }

    /// Compile several files into one module
    pub fn compile_from_files(
        &self,
        paths: &[PathBuf],
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<CompileResult> {
        let sources = read_sources(paths)?;
        self.compile_from_sources(&sources, references)
    }

    // ------------------------------------------------------------------
    // Compile and load
    // ------------------------------------------------------------------

    pub(crate) fn compile_and_load_locked(
        &self,
        sources: &[SourceText],
        mode: SecurityMode,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<Arc<Module>> {
        let result = self.compile_locked(sources, references)?.into_success()?;
        let source = result.output().to_source()?;
        self.register(source, Some(result), mode)
    }

    /// Compile several source texts and register the module
    pub fn compile_and_load_sources(
        &self,
        sources: &[SourceText],
        mode: SecurityMode,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<Arc<Module>> {
        let _pipeline = self.pipeline_lock();
        self.compile_and_load_locked(sources, mode, references)
    }

    /// Compile one source text and register the module
    pub fn compile_and_load_source(
        &self,
        source: &str,
        mode: SecurityMode,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<Arc<Module>> {
        self.compile_and_load_sources(&inline_sources(&[source]), mode, references)
    }

    /// Compile one source text, register it and return its main type
    pub fn compile_and_load_main_source(
        &self,
        source: &str,
        mode: SecurityMode,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<Arc<ModuleType>> {
        main_type_of(&*self.compile_and_load_source(source, mode, references)?)
    }

    /// Compile files and register the module
    pub fn compile_and_load_files(
        &self,
        paths: &[PathBuf],
        mode: SecurityMode,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<Arc<Module>> {
        let sources = read_sources(paths)?;
        self.compile_and_load_sources(&sources, mode, references)
    }

    /// Compile one file and register the module
    pub fn compile_and_load_file(
        &self,
        path: impl AsRef<Path>,
        mode: SecurityMode,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<Arc<Module>> {
        self.compile_and_load_files(&[path.as_ref().to_path_buf()], mode, references)
    }

    /// Compile one file, register it and return its main type
    pub fn compile_and_load_main_file(
        &self,
        path: impl AsRef<Path>,
        mode: SecurityMode,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<Arc<ModuleType>> {
        main_type_of(&*self.compile_and_load_file(path, mode, references)?)
    }

    /// Compile every `*.sbs` under a directory into one module
    pub fn compile_and_load_directory(
        &self,
        dir: impl AsRef<Path>,
        mode: SecurityMode,
        references: &[&dyn ReferenceProvider],
    ) -> ScriptResult<Arc<Module>> {
        let files = collect_sources(dir.as_ref())?;
        if files.is_empty() {
            return Err(ScriptError::InvalidArgument(format!(
                "no .sbs files under '{}'",
                dir.as_ref().display()
            )));
        }
        self.compile_and_load_files(&files, mode, references)
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    /// Verify and register an image held in memory
    pub fn load_from_bytes(
        &self,
        image: Vec<u8>,
        symbols: Option<Vec<u8>>,
        mode: SecurityMode,
    ) -> ScriptResult<Arc<Module>> {
        self.register_module(ModuleSource::from_bytes(image).with_symbols(symbols), mode)
    }

    /// Verify and register an image file, with its `.sbsym` sidecar if present
    pub fn load_module_from_file(
        &self,
        path: impl AsRef<Path>,
        mode: SecurityMode,
    ) -> ScriptResult<Arc<Module>> {
        let path = path.as_ref();
        let image = std::fs::read(path)?;
        let symbol_path = symbol_sidecar(path);
        let symbols = match &symbol_path {
            Some(p) => Some(std::fs::read(p)?),
            None => None,
        };
        self.register_module(
            ModuleSource {
                image,
                symbols,
                image_path: Some(path.to_path_buf()),
                symbol_path,
            },
            mode,
        )
    }

    // ------------------------------------------------------------------
    // Non-throwing variants
    // ------------------------------------------------------------------

    fn attempt<T>(&self, what: &str, result: ScriptResult<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                error!(domain = %self.name(), operation = what, error = %e, "pipeline call failed");
                None
            }
        }
    }

    /// [`Domain::compile_and_load_source`], logging failures
    pub fn try_compile_and_load_source(&self, source: &str, mode: SecurityMode) -> Option<Arc<Module>> {
        self.attempt(
            "compile_and_load_source",
            self.compile_and_load_source(source, mode, &[]),
        )
    }

    /// [`Domain::compile_and_load_file`], logging failures
    pub fn try_compile_and_load_file(
        &self,
        path: impl AsRef<Path>,
        mode: SecurityMode,
    ) -> Option<Arc<Module>> {
        self.attempt(
            "compile_and_load_file",
            self.compile_and_load_file(path, mode, &[]),
        )
    }

    /// [`Domain::load_from_bytes`], logging failures
    pub fn try_load_from_bytes(
        &self,
        image: Vec<u8>,
        symbols: Option<Vec<u8>>,
        mode: SecurityMode,
    ) -> Option<Arc<Module>> {
        self.attempt("load_from_bytes", self.load_from_bytes(image, symbols, mode))
    }

    /// [`Domain::load_module_from_file`], logging failures
    pub fn try_load_module_from_file(
        &self,
        path: impl AsRef<Path>,
        mode: SecurityMode,
    ) -> Option<Arc<Module>> {
        self.attempt("load_module_from_file", self.load_module_from_file(path, mode))
    }
}
