//! Security gate
//!
//! Every module passes through a [`Verifier`] before it is registered with a
//! domain. Reports are cached on the module keyed by the policy hash.

pub mod policy;
pub mod report;
pub mod verifier;

pub use policy::{
    CompiledList, CompiledPolicy, RestrictionList, RuleBehaviour, RuleDecision, SecurityPolicy,
};
pub use report::{SecurityReport, Violation, ViolationKind};
pub use verifier::{PolicyVerifier, Verifier};

/// How registration treats the security gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    /// Skip verification
    EnsureLoad,
    /// Always verify
    EnsureSecurity,
    /// Verify when `EngineSettings::security_check_code` is set
    #[default]
    UseSettings,
}

impl SecurityMode {
    /// Whether the gate runs under this mode
    pub fn should_verify(self, security_check_code: bool) -> bool {
        match self {
            SecurityMode::EnsureLoad => false,
            SecurityMode::EnsureSecurity => true,
            SecurityMode::UseSettings => security_check_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_resolution() {
        assert!(!SecurityMode::EnsureLoad.should_verify(true));
        assert!(SecurityMode::EnsureSecurity.should_verify(false));
        assert!(SecurityMode::UseSettings.should_verify(true));
        assert!(!SecurityMode::UseSettings.should_verify(false));
    }
}
