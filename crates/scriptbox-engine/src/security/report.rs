//! Verification reports

use std::fmt;

/// What a violation is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// Library an import comes from
    Library,
    /// Namespace of a referenced type
    Namespace,
    /// Referenced type
    Type,
    /// Referenced member
    Member,
    /// Unsafe interop while the policy forbids it
    UnsafeInterop,
    /// Call site that does not match the import table
    InvalidImport,
    /// Image or symbols could not be decoded
    Malformed,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViolationKind::Library => "library",
            ViolationKind::Namespace => "namespace",
            ViolationKind::Type => "type",
            ViolationKind::Member => "member",
            ViolationKind::UnsafeInterop => "unsafe interop",
            ViolationKind::InvalidImport => "invalid import",
            ViolationKind::Malformed => "malformed image",
        })
    }
}

/// One offending reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Category
    pub kind: ViolationKind,
    /// The offending name
    pub target: String,
    /// Rule that rejected it
    pub rule: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' rejected by {}", self.kind, self.target, self.rule)
    }
}

/// Result of running the security gate over one module
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecurityReport {
    /// Module name (or a placeholder when the image could not be decoded)
    pub module: String,
    /// Hash of the policy the module was checked against
    pub policy_hash: String,
    /// Number of import entries inspected
    pub checked_imports: usize,
    /// Every violation found
    pub violations: Vec<Violation>,
}

impl SecurityReport {
    /// Create an empty (passing) report
    pub fn new(module: impl Into<String>, policy_hash: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            policy_hash: policy_hash.into(),
            ..Self::default()
        }
    }

    /// Whether verification passed
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Record a violation
    pub fn push(&mut self, kind: ViolationKind, target: impl Into<String>, rule: impl Into<String>) {
        self.violations.push(Violation {
            kind,
            target: target.into(),
            rule: rule.into(),
        });
    }

    /// Violations of one kind
    pub fn violations_of(&self, kind: ViolationKind) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.kind == kind)
    }
}

impl fmt::Display for SecurityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return write!(f, "Module '{}' passed verification", self.module);
        }
        writeln!(
            f,
            "Module '{}' failed verification ({} violation(s)):",
            self.module,
            self.violations.len()
        )?;
        for v in &self.violations {
            writeln!(f, "  - {}", v)?;
        }
        Ok(())
    }
}
