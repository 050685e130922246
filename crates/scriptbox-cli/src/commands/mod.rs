//! Subcommands and the helpers they share.

pub mod build;
pub mod check;
pub mod inspect;
pub mod run;

use crate::output::StyledOutput;
use anyhow::Context;
use scriptbox_engine::pipeline::collect_sources;
use scriptbox_engine::{
    Domain, EngineSettings, Module, NativeLibrary, NativeRegistry, SceneHost, ScriptError,
    ScriptResult, SecurityMode,
};
use scriptbox_sdk::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG: &str = "scriptbox.toml";

/// Extension of compiled module images
const IMAGE_EXTENSION: &str = "sbx";

/// Load settings from `path`, else `./scriptbox.toml`, else defaults.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<EngineSettings> {
    match path {
        Some(path) => EngineSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).is_file() => EngineSettings::load(DEFAULT_CONFIG)
            .with_context(|| format!("failed to load settings from {}", DEFAULT_CONFIG)),
        None => Ok(EngineSettings::default()),
    }
}

/// Expand files and directories into the `.sbs` sources they contain.
pub fn collect_source_files(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(collect_sources(path)?);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("No such file or directory: {}", path.display());
        }
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        anyhow::bail!("No .sbs sources found");
    }
    Ok(files)
}

/// Gate mode for a command run with or without `--no-verify`.
pub fn security_mode(no_verify: bool) -> SecurityMode {
    if no_verify {
        SecurityMode::EnsureLoad
    } else {
        SecurityMode::EnsureSecurity
    }
}

/// Host functions scripts run by the CLI may import from the `console` library.
fn console_library() -> NativeLibrary {
    let mut console = NativeLibrary::new("console");
    console.register("Console.print", 1, |args| {
        println!("{}", args.first().cloned().unwrap_or_default());
        Ok(Value::Null)
    });
    console.register("Console.error", 1, |args| {
        eprintln!("{}", args.first().cloned().unwrap_or_default());
        Ok(Value::Null)
    });
    console
}

/// A sandboxed domain with the built-in compiler, the console natives and its
/// own scene host.
pub fn open_domain(name: &str, settings: EngineSettings) -> anyhow::Result<(Domain, Arc<SceneHost>)> {
    let natives = NativeRegistry::new();
    natives.register_library(console_library());
    let host = Arc::new(SceneHost::new());
    let domain = Domain::builder(name)
        .with_default_compiler()
        .settings(settings)
        .sandboxed(Arc::new(natives))
        .host(host.clone())
        .build()?;
    Ok((domain, host))
}

/// Load a compiled image, or compile and load sources, depending on `path`.
pub fn load_target(domain: &Domain, path: &Path, mode: SecurityMode) -> ScriptResult<Arc<Module>> {
    let is_image = path
        .extension()
        .map_or(false, |ext| ext == IMAGE_EXTENSION);
    if is_image {
        domain.load_module_from_file(path, mode)
    } else if path.is_dir() {
        domain.compile_and_load_directory(path, mode, &[])
    } else {
        domain.compile_and_load_file(path, mode, &[])
    }
}

/// Print compiler warnings and any failure; `None` when the step failed.
///
/// A compile failure already carries every diagnostic, so warnings are only
/// printed separately when compilation itself succeeded.
pub fn report<T>(domain: &Domain, out: &mut StyledOutput, outcome: ScriptResult<T>) -> Option<T> {
    if let Err(e @ ScriptError::CompileFailure(_)) = &outcome {
        out.script_error(e);
        return None;
    }
    if let Some(result) = domain.last_compile_result() {
        for diagnostic in result.diagnostics().iter().filter(|d| !d.is_error()) {
            out.diagnostic(diagnostic);
        }
    }
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            out.script_error(&e);
            None
        }
    }
}
