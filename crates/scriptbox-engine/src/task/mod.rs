//! Background compile and load
//!
//! Async entry points return explicit poll objects rather than futures: a
//! host drives them from its own loop with [`Operation::poll`].

mod operation;
mod pool;

pub use operation::{
    block_on_poll, AsyncOperation, CompileOperation, LoadOperation, Operation, OperationState,
};
pub use pool::WorkerPool;

use crate::compiler::SourceText;
use crate::domain::Domain;
use crate::pipeline::{CompileResult, ReferenceProvider};
use crate::security::SecurityMode;
use std::path::PathBuf;
use std::sync::Arc;

/// Owned reference providers for work that outlives the caller's borrow
pub type SharedReferences = Vec<Arc<dyn ReferenceProvider>>;

fn borrowed(references: &SharedReferences) -> Vec<&dyn ReferenceProvider> {
    references.iter().map(|r| r.as_ref()).collect()
}

impl Domain {
    /// Compile source texts in the background
    pub fn compile_from_sources_async(
        &self,
        sources: Vec<SourceText>,
        references: SharedReferences,
    ) -> AsyncOperation<CompileResult> {
        let domain = self.clone();
        AsyncOperation::new(move || domain.compile_from_sources(&sources, &borrowed(&references)))
    }

    /// Compile one source text in the background
    pub fn compile_from_source_async(
        &self,
        source: impl Into<String>,
        references: SharedReferences,
    ) -> AsyncOperation<CompileResult> {
        let source = source.into();
        let domain = self.clone();
        AsyncOperation::new(move || domain.compile_from_source(&source, &borrowed(&references)))
    }

    /// Compile files in the background
    pub fn compile_from_files_async(
        &self,
        paths: Vec<PathBuf>,
        references: SharedReferences,
    ) -> AsyncOperation<CompileResult> {
        let domain = self.clone();
        AsyncOperation::new(move || domain.compile_from_files(&paths, &borrowed(&references)))
    }

    /// Compile and register one source text in the background
    pub fn compile_and_load_source_async(
        &self,
        source: impl Into<String>,
        mode: SecurityMode,
        references: SharedReferences,
    ) -> CompileOperation {
        let source = source.into();
        let domain = self.clone();
        CompileOperation::new(self.clone(), move || {
            domain.compile_and_load_source(&source, mode, &borrowed(&references))
        })
    }

    /// Compile and register source texts in the background
    pub fn compile_and_load_sources_async(
        &self,
        sources: Vec<SourceText>,
        mode: SecurityMode,
        references: SharedReferences,
    ) -> CompileOperation {
        let domain = self.clone();
        CompileOperation::new(self.clone(), move || {
            domain.compile_and_load_sources(&sources, mode, &borrowed(&references))
        })
    }

    /// Compile and register files in the background
    pub fn compile_and_load_files_async(
        &self,
        paths: Vec<PathBuf>,
        mode: SecurityMode,
        references: SharedReferences,
    ) -> CompileOperation {
        let domain = self.clone();
        CompileOperation::new(self.clone(), move || {
            domain.compile_and_load_files(&paths, mode, &borrowed(&references))
        })
    }

    /// Verify and register an image in the background
    pub fn load_from_bytes_async(
        &self,
        image: Vec<u8>,
        symbols: Option<Vec<u8>>,
        mode: SecurityMode,
    ) -> LoadOperation {
        let domain = self.clone();
        LoadOperation::new(self.clone(), move || {
            domain.load_from_bytes(image, symbols, mode)
        })
    }

    /// Verify and register an image file in the background
    pub fn load_module_from_file_async(&self, path: PathBuf, mode: SecurityMode) -> LoadOperation {
        let domain = self.clone();
        LoadOperation::new(self.clone(), move || {
            domain.load_module_from_file(&path, mode)
        })
    }
}
