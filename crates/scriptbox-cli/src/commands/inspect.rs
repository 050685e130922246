//! `scriptbox inspect`: print the types and members of a module.

use super::{load_target, open_domain, report};
use crate::output::StyledOutput;
use scriptbox_engine::image::{decode_code, MethodDef, TypeKind};
use scriptbox_engine::{EngineSettings, ModuleType, SecurityMode};
use std::path::Path;
use termcolor::ColorChoice;

fn signature(method: &MethodDef) -> String {
    let params: Vec<String> = method
        .params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.ty.name()))
        .collect();
    let mut text = format!("{}({})", method.name, params.join(", "));
    if let Some(ret) = method.returns {
        text.push_str(&format!(": {}", ret.name()));
    }
    text
}

fn print_type(out: &mut StyledOutput, ty: &ModuleType, code: bool) {
    let def = ty.def();
    let kind = match def.kind {
        TypeKind::Plain => "type",
        TypeKind::Attached => "attached type",
        TypeKind::Interface => "interface",
    };
    if def.is_public {
        out.info("pub ");
    }
    out.info(kind);
    out.plain(" ");
    out.bold(ty.full_name());
    let supers: Vec<&str> = def
        .base
        .iter()
        .chain(def.interfaces.iter())
        .map(String::as_str)
        .collect();
    if !supers.is_empty() {
        out.plain(&format!(" : {}", supers.join(", ")));
    }
    if let Some(info) = ty.replace_info() {
        let name = info.replace_name.as_deref().unwrap_or(ty.name());
        out.warning(&format!("  [replaceable as {}]", name));
    }
    out.newline();

    for field in &def.fields {
        let mut modifiers = Vec::new();
        if field.is_static() {
            modifiers.push("static");
        }
        if field.is_serializable() {
            modifiers.push("serialized");
        }
        out.plain(&format!(
            "    field {}: {} = {}",
            field.name,
            field.ty.name(),
            field.default
        ));
        if !modifiers.is_empty() {
            out.dim(&format!("  ({})", modifiers.join(", ")));
        }
        out.newline();
    }
    for property in &def.properties {
        let prefix = if property.is_static { "static " } else { "" };
        out.plain(&format!(
            "    {}property {}: {}",
            prefix,
            property.name,
            property.ty.name()
        ));
        if let Some(getter) = &property.getter {
            out.dim(&format!(" get {}", getter));
        }
        if let Some(setter) = &property.setter {
            out.dim(&format!(" set {}", setter));
        }
        out.newline();
    }
    for event in &def.events {
        let prefix = if event.is_static { "static " } else { "" };
        out.plain(&format!("    {}event {}", prefix, event.name));
        out.newline();
    }
    for method in &def.methods {
        let mut prefix = String::new();
        if method.is_static {
            prefix.push_str("static ");
        }
        if method.is_sequence {
            prefix.push_str("sequence ");
        }
        out.plain(&format!("    {}method {}", prefix, signature(method)));
        out.newline();
        if code {
            match decode_code(&method.code) {
                Ok(instrs) => {
                    for (i, instr) in instrs.iter().enumerate() {
                        out.dim(&format!("        {:>4}  {:?}", i, instr));
                        out.newline();
                    }
                }
                Err(e) => {
                    out.error(&format!("        <undecodable: {}>", e));
                    out.newline();
                }
            }
        }
    }
}

pub fn execute(
    settings: EngineSettings,
    path: &Path,
    code: bool,
    color: ColorChoice,
) -> anyhow::Result<()> {
    let (domain, _host) = open_domain("inspect", settings)?;
    let mut out = StyledOutput::new(color);

    let outcome = load_target(&domain, path, SecurityMode::EnsureLoad);
    let Some(module) = report(&domain, &mut out, outcome) else {
        domain.dispose();
        anyhow::bail!("could not load {}", path.display());
    };

    out.bold("module ");
    out.success(module.name());
    out.dim(&format!("  sha256 {}", module.checksum_hex()));
    out.newline();

    let image = module.image();
    for import in &image.imports {
        let marker = if import.is_unsafe { "unsafe " } else { "" };
        out.plain(&format!(
            "  import {}{} {}({})",
            marker,
            import.library,
            import.full_member_name(),
            import.param_count
        ));
        out.newline();
    }
    if !image.imports.is_empty() {
        out.newline();
    }

    for ty in module.types() {
        print_type(&mut out, ty, code);
        out.newline();
    }
    out.flush();
    domain.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_engine::image::{FieldType, ParamDef};

    #[test]
    fn test_signature_lists_params_and_return() {
        let method = MethodDef {
            name: "damage".to_string(),
            is_static: false,
            is_sequence: false,
            params: vec![
                ParamDef {
                    name: "amount".to_string(),
                    ty: FieldType::Int,
                },
                ParamDef {
                    name: "source".to_string(),
                    ty: FieldType::Any,
                },
            ],
            returns: Some(FieldType::Bool),
            local_count: 0,
            code: Vec::new(),
        };
        assert_eq!(signature(&method), "damage(amount: int, source: any): bool");
    }
}
