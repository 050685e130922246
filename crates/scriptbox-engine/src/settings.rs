//! Engine settings
//!
//! Loaded from TOML. Every field has a default, so a partial file is valid:
//!
//! ```toml
//! security_check_code = true
//! generate_symbols = true
//! define_symbols = ["DEBUG"]
//!
//! [security_policy.namespaces]
//! default_behaviour = "deny"
//! allow = ["Engine", "Engine.*"]
//! ```

use crate::compiler::CompileOptions;
use crate::error::ScriptError;
use crate::security::SecurityPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How much of a compile result is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDetail {
    /// Nothing
    None,
    /// Errors only
    Errors,
    /// Errors and warnings
    #[default]
    Warnings,
    /// Everything
    All,
}

/// Default step budget per top-level invocation
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// Settings shared by a domain's pipeline, gate and interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Run the security gate under `SecurityMode::UseSettings`
    pub security_check_code: bool,
    /// Allow `unsafe` imports in compiled code
    pub allow_unsafe_code: bool,
    /// Keep compiler output in memory instead of writing files
    pub generate_in_memory: bool,
    /// Produce debug symbols
    pub generate_symbols: bool,
    /// Where on-disk output goes
    pub output_directory: PathBuf,
    /// Output file name; random when unset
    pub output_name: Option<String>,
    /// Highest warning level reported (0-4)
    pub warning_level: u8,
    /// Symbols for `#if`
    pub define_symbols: Vec<String>,
    /// References added to every compilation (names or paths)
    pub references: Vec<String>,
    /// Instruction budget per top-level invocation
    pub max_steps: u64,
    /// Worker pool size (0 = one per CPU)
    pub worker_threads: usize,
    /// What `log_compile_output` prints
    pub log_level: LogDetail,
    /// Policy the gate checks against
    pub security_policy: SecurityPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            security_check_code: true,
            allow_unsafe_code: false,
            generate_in_memory: true,
            generate_symbols: false,
            output_directory: std::env::temp_dir().join("scriptbox"),
            output_name: None,
            warning_level: 4,
            define_symbols: Vec::new(),
            references: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            worker_threads: 0,
            log_level: LogDetail::default(),
            security_policy: SecurityPolicy::default(),
        }
    }
}

impl EngineSettings {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ScriptError> {
        let settings: Self = toml::from_str(text).map_err(|e| ScriptError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, ScriptError> {
        toml::to_string_pretty(self).map_err(|e| ScriptError::Config(e.to_string()))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.warning_level > 4 {
            return Err(ScriptError::Config(format!(
                "warning_level must be between 0 and 4, got {}",
                self.warning_level
            )));
        }
        if self.max_steps == 0 {
            return Err(ScriptError::Config("max_steps must be positive".to_string()));
        }
        Ok(())
    }

    /// Worker threads to spawn
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_threads
        }
    }

    /// Compiler options for a module compiled under these settings
    pub fn compile_options(&self, module_name: impl Into<String>) -> CompileOptions {
        CompileOptions {
            module_name: module_name.into(),
            allow_unsafe: self.allow_unsafe_code,
            define_symbols: self.define_symbols.clone(),
            generate_symbols: self.generate_symbols,
            warning_level: self.warning_level,
            runtime_compiled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::RuleBehaviour;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings = EngineSettings::from_toml_str(
            r#"
            generate_symbols = true
            define_symbols = ["DEBUG"]
            log_level = "all"

            [security_policy.libraries]
            default_behaviour = "deny"
            allow = ["host"]
            "#,
        )
        .unwrap();

        assert!(settings.security_check_code);
        assert!(settings.generate_in_memory);
        assert!(settings.generate_symbols);
        assert_eq!(settings.log_level, LogDetail::All);
        assert_eq!(settings.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(
            settings.security_policy.libraries.default_behaviour,
            RuleBehaviour::Deny
        );

        let options = settings.compile_options("m");
        assert_eq!(options.define_symbols, vec!["DEBUG"]);
        assert!(options.runtime_compiled);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(matches!(
            EngineSettings::from_toml_str("warning_level = 9"),
            Err(ScriptError::Config(_))
        ));
        assert!(matches!(
            EngineSettings::from_toml_str("max_steps = \"lots\""),
            Err(ScriptError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scriptbox.toml");
        let mut settings = EngineSettings::default();
        settings.output_name = Some("game".to_string());
        settings.references.push("host".to_string());
        std::fs::write(&path, settings.to_toml_string().unwrap()).unwrap();

        assert_eq!(EngineSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_worker_threads() {
        let settings = EngineSettings {
            worker_threads: 3,
            ..EngineSettings::default()
        };
        assert_eq!(settings.effective_worker_threads(), 3);
        assert!(EngineSettings::default().effective_worker_threads() >= 1);
    }
}
