//! `scriptbox run`: load a module and call a static entry point.
//!
//! The entry point defaults to `main` on the module's main type. A returned
//! sequence is driven to completion, and sequences started on the scene host
//! are ticked until idle or until `--max-ticks` runs out.

use super::{load_target, open_domain, report, security_mode};
use crate::output::StyledOutput;
use scriptbox_engine::{EngineSettings, Module, ModuleType};
use scriptbox_sdk::{SequenceHandle, SequenceStep, Value};
use std::path::PathBuf;
use std::sync::Arc;
use termcolor::ColorChoice;

const DEFAULT_ENTRY: &str = "main";

pub struct RunArgs {
    pub path: PathBuf,
    pub entry: Option<String>,
    pub args: Vec<String>,
    pub max_ticks: usize,
    pub no_verify: bool,
}

/// Command-line text to a script value: null, bool, int, float, else string.
fn parse_arg(text: &str) -> Value {
    match text {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => text
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| text.parse::<f64>().map(Value::Float))
            .unwrap_or_else(|_| Value::str(text)),
    }
}

/// Split `Type.method` at the last dot; a bare name is a method on the main type.
fn split_entry(entry: &str) -> (Option<&str>, &str) {
    match entry.rsplit_once('.') {
        Some((ty, method)) => (Some(ty), method),
        None => (None, entry),
    }
}

fn entry_type(module: &Module, type_name: Option<&str>) -> anyhow::Result<Arc<ModuleType>> {
    match type_name {
        Some(name) => module
            .find_type(name)
            .ok_or_else(|| anyhow::anyhow!("module '{}' has no type '{}'", module.name(), name)),
        None => module
            .main_type()
            .ok_or_else(|| anyhow::anyhow!("module '{}' declares no types", module.name())),
    }
}

fn drive(sequence: &SequenceHandle, max_ticks: usize) -> anyhow::Result<Option<Value>> {
    for _ in 0..max_ticks {
        match sequence.resume()? {
            SequenceStep::Complete(value) => return Ok(Some(value)),
            SequenceStep::Yielded(_) => {}
        }
    }
    Ok(None)
}

pub fn execute(settings: EngineSettings, args: RunArgs, color: ColorChoice) -> anyhow::Result<()> {
    let (domain, host) = open_domain("run", settings)?;
    let mut out = StyledOutput::new(color);

    let outcome = load_target(&domain, &args.path, security_mode(args.no_verify));
    let Some(module) = report(&domain, &mut out, outcome) else {
        domain.dispose();
        anyhow::bail!("could not load {}", args.path.display());
    };

    let entry = args.entry.as_deref().unwrap_or(DEFAULT_ENTRY);
    let (type_name, method) = split_entry(entry);
    let ty = entry_type(&module, type_name)?;
    let call_args: Vec<Value> = args.args.iter().map(|a| parse_arg(a)).collect();
    tracing::info!(entry = %format!("{}.{}", ty.full_name(), method), args = call_args.len(), "running");

    let mut result = match ty.call_static(method, call_args) {
        Ok(value) => value,
        Err(e) => {
            out.script_error(&e);
            domain.dispose();
            anyhow::bail!("{}.{} failed", ty.full_name(), method);
        }
    };
    if let Value::Sequence(sequence) = result.clone() {
        result = match drive(&sequence, args.max_ticks)? {
            Some(value) => value,
            None => anyhow::bail!("sequence did not finish within {} ticks", args.max_ticks),
        };
    }

    let ticks = host.run_until_idle(args.max_ticks);
    let pending = host.running_sequences();
    if pending > 0 {
        out.warning("warning");
        out.plain(&format!(": {} sequence(s) still running after {} ticks", pending, ticks));
        out.newline();
    }

    if !result.is_null() {
        out.plain(&result.to_string());
        out.newline();
    }
    out.flush();
    domain.dispose();
    Ok(())
}
