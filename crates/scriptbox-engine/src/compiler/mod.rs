//! Compiler services
//!
//! The engine talks to compilers through [`CompilerService`]. The built-in
//! [`AssemblerCompiler`] turns `.sbs` assembler sources into module images.

pub mod assembler;
pub mod lexer;
pub mod parser;

pub use assembler::AssemblerCompiler;

use crate::image::TypeKind;
use std::fmt;

/// Diagnostic severity, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Trivia; never surfaced
    Hidden,
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error; compilation fails
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Hidden => "hidden",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// A compiler message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Stable code (`SB0002`)
    pub code: String,
    /// Message text
    pub message: String,
    /// Source file
    pub file: Option<String>,
    /// Line (1-indexed, 0 when unknown)
    pub line: u32,
    /// Column (1-indexed, 0 when unknown)
    pub column: u32,
    /// Warning level (1-4); warnings above the configured level are dropped
    pub warning_level: u8,
}

impl Diagnostic {
    fn with_severity(severity: Severity, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message: message.into(),
            file: None,
            line: 0,
            column: 0,
            warning_level: 0,
        }
    }

    /// Error diagnostic
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Error, code, message)
    }

    /// Warning diagnostic at a warning level
    pub fn warning(code: &str, level: u8, message: impl Into<String>) -> Self {
        Self {
            warning_level: level,
            ..Self::with_severity(Severity::Warning, code, message)
        }
    }

    /// Informational diagnostic
    pub fn info(code: &str, message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Info, code, message)
    }

    /// Hidden diagnostic
    pub fn hidden(code: &str, message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Hidden, code, message)
    }

    /// Attach a source position
    pub fn at(mut self, file: &str, line: u32, column: u32) -> Self {
        self.file = Some(file.to_string());
        self.line = line;
        self.column = column;
        self
    }

    /// Whether this is an error
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}({},{}): ", file, self.line, self.column)?;
        }
        write!(f, "{} {}: {}", self.severity, self.code, self.message)
    }
}

/// One source unit handed to a compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    /// File path or a synthetic name
    pub path: String,
    /// Source text
    pub text: String,
}

impl SourceText {
    /// Create a source unit
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// Member a reference exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedMember {
    /// Member name
    pub name: String,
    /// Parameter count, when fixed
    pub param_count: Option<u8>,
}

/// Type a reference exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedType {
    /// Fully qualified name
    pub full_name: String,
    /// Category
    pub kind: TypeKind,
    /// Exposed members
    pub members: Vec<ExportedMember>,
}

/// A resolved reference: a named set of types code may use
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reference {
    /// Library name imports use
    pub name: String,
    /// Exported types
    pub types: Vec<ExportedType>,
}

impl Reference {
    /// Create an empty reference
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    /// Exported type by full name
    pub fn find_type(&self, full_name: &str) -> Option<&ExportedType> {
        self.types.iter().find(|t| t.full_name == full_name)
    }
}

/// Options for one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Name recorded in the image
    pub module_name: String,
    /// Permit `unsafe` imports
    pub allow_unsafe: bool,
    /// Symbols for `#if`
    pub define_symbols: Vec<String>,
    /// Produce a symbol image
    pub generate_symbols: bool,
    /// Highest warning level reported (0 disables warnings)
    pub warning_level: u8,
    /// Mark the image as compiled at run time
    pub runtime_compiled: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_name: "module".to_string(),
            allow_unsafe: false,
            define_symbols: Vec::new(),
            generate_symbols: false,
            warning_level: 4,
            runtime_compiled: false,
        }
    }
}

/// Raw result of a compiler run
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// No errors were reported
    pub success: bool,
    /// Every diagnostic the compiler produced
    pub diagnostics: Vec<Diagnostic>,
    /// Encoded module image on success
    pub image: Option<Vec<u8>>,
    /// Encoded symbol image when requested
    pub symbols: Option<Vec<u8>>,
}

/// A compiler front end
pub trait CompilerService: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Compile sources against resolved references
    fn compile(
        &self,
        sources: &[SourceText],
        references: &[Reference],
        options: &CompileOptions,
    ) -> CompileOutput;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::error("SB0002", "expected '}'").at("a.sbs", 3, 7);
        assert_eq!(d.to_string(), "a.sbs(3,7): error SB0002: expected '}'");
        assert!(d.is_error());
        assert!(Severity::Hidden < Severity::Warning);
    }
}
