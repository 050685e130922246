//! Engine error taxonomy

use crate::compiler::Diagnostic;
use crate::image::ImageError;
use crate::security::SecurityReport;
use scriptbox_sdk::HostError;
use std::fmt;

/// Kind of member a lookup was looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Field
    Field,
    /// Property
    Property,
    /// Method
    Method,
    /// Event
    Event,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemberKind::Field => "field",
            MemberKind::Property => "property",
            MemberKind::Method => "method",
            MemberKind::Event => "event",
        })
    }
}

/// One reference provider that failed to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceError {
    /// Description of the provider (`describe()`)
    pub provider: String,
    /// Why it failed
    pub message: String,
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.message)
    }
}

fn join_reference_errors(errors: &[ReferenceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn count_errors(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

/// Errors raised by domains, the pipeline, proxies and hot-swap
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The compiler service reported errors
    #[error("Compilation failed with {} error(s)", count_errors(.0))]
    CompileFailure(Vec<Diagnostic>),

    /// The security gate rejected a module
    #[error("Module '{}' failed security verification with {} violation(s)", .0.module, .0.violations.len())]
    SecurityViolation(Box<SecurityReport>),

    /// The domain was disposed
    #[error("Domain '{0}' has been disposed")]
    DomainDisposed(String),

    /// Name lookup failed
    #[error("Type '{type_name}' has no {kind} named '{name}'")]
    MemberNotFound {
        /// Type that was searched
        type_name: String,
        /// Kind of member
        kind: MemberKind,
        /// Requested name
        name: String,
    },

    /// The member was found but calling or accessing it failed
    #[error("Invocation of '{type_name}.{member}' failed: {message}")]
    InvocationFailure {
        /// Declaring type
        type_name: String,
        /// Member name
        member: String,
        /// Failure description
        message: String,
    },

    /// One or more reference providers failed
    #[error("Failed to resolve {} reference(s): {}", .0.len(), join_reference_errors(.0))]
    ReferenceResolutionFailure(Vec<ReferenceError>),

    /// The instance proxy was disposed
    #[error("Instance of '{0}' has been disposed")]
    Disposed(String),

    /// The domain has no compiler service
    #[error("Domain '{0}' has no compiler service")]
    NoCompiler(String),

    /// Bad argument from the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A background operation panicked
    #[error("Background operation panicked: {0}")]
    Panicked(String),

    /// Configuration could not be read
    #[error("Configuration error: {0}")]
    Config(String),

    /// Image decode or validation error
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Host lifecycle call failed
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScriptError {
    /// Shorthand for an invocation failure
    pub fn invocation(
        type_name: impl Into<String>,
        member: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ScriptError::InvocationFailure {
            type_name: type_name.into(),
            member: member.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a failed lookup
    pub fn not_found(type_name: impl Into<String>, kind: MemberKind, name: impl Into<String>) -> Self {
        ScriptError::MemberNotFound {
            type_name: type_name.into(),
            kind,
            name: name.into(),
        }
    }

    /// Whether this is a lookup failure
    pub fn is_member_not_found(&self) -> bool {
        matches!(self, ScriptError::MemberNotFound { .. })
    }
}

/// Engine result alias
pub type ScriptResult<T> = Result<T, ScriptError>;
