//! Compile results

use crate::compiler::{Diagnostic, Severity};
use crate::domain::ModuleSource;
use crate::error::{ScriptError, ScriptResult};
use crate::settings::LogDetail;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Binding-version warnings that carry no information for callers
const BENIGN_CODES: [&str; 2] = ["SB1701", "SB1702"];

/// Raw outputs of a successful compile
///
/// Post-compile processors rewrite these in place through the `patch_*`
/// methods, which mark the output patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleOutput {
    image: Option<Vec<u8>>,
    image_path: Option<PathBuf>,
    symbols: Option<Vec<u8>>,
    symbol_path: Option<PathBuf>,
    is_patched: bool,
}

impl ModuleOutput {
    /// Output held in memory only
    pub fn in_memory(image: Vec<u8>, symbols: Option<Vec<u8>>) -> Self {
        Self {
            image: Some(image),
            symbols,
            ..Self::default()
        }
    }

    pub(crate) fn on_disk(
        image: Vec<u8>,
        image_path: PathBuf,
        symbols: Option<(Vec<u8>, PathBuf)>,
    ) -> Self {
        let (symbols, symbol_path) = match symbols {
            Some((bytes, path)) => (Some(bytes), Some(path)),
            None => (None, None),
        };
        Self {
            image: Some(image),
            image_path: Some(image_path),
            symbols,
            symbol_path,
            is_patched: false,
        }
    }

    /// Image bytes
    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    /// Image file
    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    /// Symbol bytes
    pub fn symbols(&self) -> Option<&[u8]> {
        self.symbols.as_deref()
    }

    /// Symbol file
    pub fn symbol_path(&self) -> Option<&Path> {
        self.symbol_path.as_deref()
    }

    /// Whether a processor rewrote the output
    pub fn is_patched(&self) -> bool {
        self.is_patched
    }

    /// Replace the image bytes
    pub fn patch_image(&mut self, image: Vec<u8>) {
        self.image = Some(image);
        self.is_patched = true;
    }

    /// Replace the image path
    pub fn patch_image_path(&mut self, path: impl Into<PathBuf>) {
        self.image_path = Some(path.into());
        self.is_patched = true;
    }

    /// Replace the symbol bytes
    pub fn patch_symbols(&mut self, symbols: Option<Vec<u8>>) {
        self.symbols = symbols;
        self.is_patched = true;
    }

    /// Replace the symbol path
    pub fn patch_symbol_path(&mut self, path: impl Into<PathBuf>) {
        self.symbol_path = Some(path.into());
        self.is_patched = true;
    }

    /// Bytes a module is built from; reads the image file if nothing is in memory
    pub(crate) fn to_source(&self) -> ScriptResult<ModuleSource> {
        let image = match (&self.image, &self.image_path) {
            (Some(bytes), _) => bytes.clone(),
            (None, Some(path)) => std::fs::read(path)?,
            (None, None) => {
                return Err(ScriptError::InvalidArgument(
                    "compile result has no image".to_string(),
                ))
            }
        };
        let symbols = match (&self.symbols, &self.symbol_path) {
            (Some(bytes), _) => Some(bytes.clone()),
            (None, Some(path)) if path.is_file() => Some(std::fs::read(path)?),
            _ => None,
        };
        Ok(ModuleSource {
            image,
            symbols,
            image_path: self.image_path.clone(),
            symbol_path: self.symbol_path.clone(),
        })
    }
}

/// Outcome of one compile
#[derive(Debug, Clone)]
pub struct CompileResult {
    success: bool,
    module_name: String,
    diagnostics: Vec<Diagnostic>,
    output: ModuleOutput,
}

impl CompileResult {
    /// Build a result, dropping hidden and benign diagnostics
    pub fn new(
        success: bool,
        module_name: impl Into<String>,
        diagnostics: impl IntoIterator<Item = Diagnostic>,
        output: ModuleOutput,
    ) -> Self {
        let diagnostics = diagnostics
            .into_iter()
            .filter(|d| d.severity != Severity::Hidden)
            .filter(|d| !BENIGN_CODES.contains(&d.code.as_str()))
            .collect();
        Self {
            success,
            module_name: module_name.into(),
            diagnostics,
            output,
        }
    }

    /// No errors were reported
    pub fn success(&self) -> bool {
        self.success
    }

    /// Name the module was compiled under
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Surviving diagnostics in compiler order
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn of(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.severity == severity)
    }

    /// Errors
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.of(Severity::Error)
    }

    /// Warnings
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.of(Severity::Warning)
    }

    /// Informational messages
    pub fn infos(&self) -> impl Iterator<Item = &Diagnostic> {
        self.of(Severity::Info)
    }

    /// Number of errors
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Number of warnings
    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Number of informational messages
    pub fn info_count(&self) -> usize {
        self.infos().count()
    }

    /// Raw outputs
    pub fn output(&self) -> &ModuleOutput {
        &self.output
    }

    /// Image bytes
    pub fn image_bytes(&self) -> Option<&[u8]> {
        self.output.image()
    }

    /// Image file
    pub fn image_path(&self) -> Option<&Path> {
        self.output.image_path()
    }

    /// Symbol bytes
    pub fn symbol_bytes(&self) -> Option<&[u8]> {
        self.output.symbols()
    }

    /// Symbol file
    pub fn symbol_path(&self) -> Option<&Path> {
        self.output.symbol_path()
    }

    /// Whether a processor rewrote the output
    pub fn is_patched(&self) -> bool {
        self.output.is_patched()
    }

    /// `Ok(self)` on success, else [`ScriptError::CompileFailure`]
    pub fn into_success(self) -> ScriptResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ScriptError::CompileFailure(self.diagnostics))
        }
    }

    /// Emit through `tracing` up to `detail`
    pub fn log(&self, detail: LogDetail) {
        if detail == LogDetail::None {
            return;
        }
        let status = if self.success { "succeeded" } else { "failed" };
        info!(
            module = %self.module_name,
            errors = self.error_count(),
            warnings = self.warning_count(),
            infos = self.info_count(),
            "compile {}",
            status
        );
        for d in self.errors() {
            error!("{}", d);
        }
        if detail >= LogDetail::Warnings {
            for d in self.warnings() {
                warn!("{}", d);
            }
        }
        if detail >= LogDetail::All {
            for d in self.infos() {
                info!("{}", d);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_hidden_and_benign() {
        let result = CompileResult::new(
            true,
            "m",
            vec![
                Diagnostic::warning("SB1701", 1, "binding"),
                Diagnostic::warning("SB1702", 1, "binding"),
                Diagnostic::hidden("SB0001H", "unnecessary import"),
                Diagnostic::warning("SB0168", 3, "unused local"),
                Diagnostic::info("SB9000", "note"),
            ],
            ModuleOutput::default(),
        );
        assert_eq!(result.diagnostics().len(), 2);
        assert_eq!(result.warning_count(), 1);
        assert_eq!(result.info_count(), 1);
        assert_eq!(result.error_count(), 0);
    }

    #[test]
    fn test_failure_converts_to_error() {
        let result = CompileResult::new(
            false,
            "m",
            vec![Diagnostic::error("SB0002", "expected '}'")],
            ModuleOutput::default(),
        );
        match result.into_success() {
            Err(ScriptError::CompileFailure(diags)) => assert_eq!(diags[0].code, "SB0002"),
            other => panic!("unexpected {:?}", other.map(|r| r.success())),
        }
    }

    #[test]
    fn test_patch_marks_output() {
        let mut output = ModuleOutput::in_memory(vec![1, 2, 3], None);
        assert!(!output.is_patched());
        output.patch_image(vec![4]);
        assert!(output.is_patched());
        assert_eq!(output.image(), Some(&[4u8][..]));
    }

    #[test]
    fn test_source_without_image_is_rejected() {
        assert!(matches!(
            ModuleOutput::default().to_source(),
            Err(ScriptError::InvalidArgument(_))
        ));
    }
}
