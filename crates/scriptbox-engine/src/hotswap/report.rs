//! Replacement reports

use crate::reflect::InstanceProxy;
use std::fmt;
use tracing::{info, warn};

/// What happened to one field during a state transplant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    /// The value was stored in the replacement
    Copied,
    /// The replacement declares no instance field of that name
    NoMatchingField,
    /// The replacement's field cannot hold the value
    IncompatibleType,
}

impl fmt::Display for FieldOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldOutcome::Copied => "copied",
            FieldOutcome::NoMatchingField => "no matching field",
            FieldOutcome::IncompatibleType => "incompatible type",
        })
    }
}

/// One completed replacement
#[derive(Debug, Clone)]
pub struct Replacement {
    /// Type of the replaced instance
    pub original_type: String,
    /// The new instance
    pub replacement: InstanceProxy,
    /// Per-field outcomes in declaration order
    pub fields: Vec<(String, FieldOutcome)>,
}

impl Replacement {
    /// Outcome for a field
    pub fn field(&self, name: &str) -> Option<FieldOutcome> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| *outcome)
    }
}

/// Everything a replacement run did and failed to do
#[derive(Debug, Clone, Default)]
pub struct ReplaceReport {
    errors: Vec<String>,
    warnings: Vec<String>,
    messages: Vec<String>,
    replacements: Vec<Replacement>,
}

impl ReplaceReport {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// No errors were recorded
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Warnings
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Informational messages
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Completed replacements
    pub fn replacements(&self) -> &[Replacement] {
        &self.replacements
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub(crate) fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub(crate) fn message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub(crate) fn push(&mut self, replacement: Replacement) {
        self.replacements.push(replacement);
    }

    /// Append another report
    pub fn merge(&mut self, other: ReplaceReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.messages.extend(other.messages);
        self.replacements.extend(other.replacements);
    }

    /// Emit through `tracing`
    pub fn log(&self) {
        for m in &self.messages {
            info!("{}", m);
        }
        for w in &self.warnings {
            warn!("{}", w);
        }
        for e in &self.errors {
            warn!("replacement error: {}", e);
        }
        info!(
            replaced = self.replacements.len(),
            errors = self.errors.len(),
            warnings = self.warnings.len(),
            "replacement finished"
        );
    }
}
