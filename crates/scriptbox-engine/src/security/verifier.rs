//! Verification engines

use super::policy::{CompiledPolicy, SecurityPolicy};
use super::report::{SecurityReport, ViolationKind};
use crate::image::{decode_code, flags, Instr, ModuleImage, SymbolImage};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Checks a module binary against a policy
pub trait Verifier: Send + Sync {
    /// Verify an image (and optional symbols) against `policy`
    fn verify(&self, image: &[u8], symbols: Option<&[u8]>, policy: &SecurityPolicy) -> SecurityReport;
}

/// Built-in verifier over the module's import table and method bodies
///
/// Keeps the last policy it compiled; patterns are rebuilt only when the
/// policy hash changes.
#[derive(Debug, Default)]
pub struct PolicyVerifier {
    compiled: Mutex<Option<Arc<CompiledPolicy>>>,
}

impl PolicyVerifier {
    /// Create the verifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled form of `policy`, reused while its hash is unchanged
    pub fn compiled(&self, policy: &SecurityPolicy) -> Arc<CompiledPolicy> {
        let hash = policy.hash();
        let mut slot = self.compiled.lock();
        match slot.as_ref() {
            Some(compiled) if compiled.hash == hash => compiled.clone(),
            _ => {
                let compiled = Arc::new(policy.compile());
                for pattern in compiled.invalid_patterns() {
                    tracing::warn!(pattern = %pattern, "ignoring invalid policy pattern");
                }
                *slot = Some(compiled.clone());
                compiled
            }
        }
    }

    fn check_imports(image: &ModuleImage, policy: &CompiledPolicy, report: &mut SecurityReport) {
        for import in &image.imports {
            report.checked_imports += 1;

            let library = policy.libraries.evaluate(&import.library);
            if !library.is_allowed() {
                report.push(ViolationKind::Library, &import.library, library.rule());
            }

            let namespace = policy.namespaces.evaluate(&import.namespace);
            if !namespace.is_allowed() {
                report.push(ViolationKind::Namespace, &import.namespace, namespace.rule());
            }

            let type_name = import.full_type_name();
            let ty = policy.types.evaluate(&type_name);
            if !ty.is_allowed() {
                report.push(ViolationKind::Type, type_name, ty.rule());
            }

            let member_name = import.full_member_name();
            let member = policy.members.evaluate(&member_name);
            if !member.is_allowed() {
                report.push(ViolationKind::Member, &member_name, member.rule());
            }

            if import.is_unsafe && !policy.allow_unsafe_interop {
                report.push(
                    ViolationKind::UnsafeInterop,
                    member_name,
                    "allow_unsafe_interop = false",
                );
            }
        }
    }

    // Base types and interfaces declared outside the module are references too
    fn check_external_types(image: &ModuleImage, policy: &CompiledPolicy, report: &mut SecurityReport) {
        let local: FxHashSet<String> = image.types.iter().map(|t| t.full_name()).collect();
        let mut seen = FxHashSet::default();

        for ty in &image.types {
            for name in ty.base.iter().chain(ty.interfaces.iter()) {
                if local.contains(name) || !seen.insert(name.clone()) {
                    continue;
                }
                let decision = policy.types.evaluate(name);
                if !decision.is_allowed() {
                    report.push(ViolationKind::Type, name, decision.rule());
                }
                let namespace = name.rsplit_once('.').map(|(ns, _)| ns).unwrap_or("");
                let decision = policy.namespaces.evaluate(namespace);
                if !decision.is_allowed() {
                    report.push(ViolationKind::Namespace, namespace, decision.rule());
                }
            }
        }
    }

    fn check_bodies(image: &ModuleImage, report: &mut SecurityReport) {
        for ty in &image.types {
            for method in &ty.methods {
                let location = format!("{}.{}", ty.full_name(), method.name);
                let code = match decode_code(&method.code) {
                    Ok(code) => code,
                    Err(e) => {
                        report.push(ViolationKind::Malformed, location, e.to_string());
                        continue;
                    }
                };
                for instr in code {
                    if let Instr::CallExtern { import, argc } = instr {
                        match image.imports.get(import as usize) {
                            None => report.push(
                                ViolationKind::InvalidImport,
                                &location,
                                format!("import index {} out of range", import),
                            ),
                            Some(def) if def.param_count != argc => report.push(
                                ViolationKind::InvalidImport,
                                &location,
                                format!(
                                    "'{}' takes {} argument(s), call passes {}",
                                    def.full_member_name(),
                                    def.param_count,
                                    argc
                                ),
                            ),
                            Some(_) => {}
                        }
                    }
                }
            }
        }
    }
}

impl Verifier for PolicyVerifier {
    fn verify(&self, image: &[u8], symbols: Option<&[u8]>, policy: &SecurityPolicy) -> SecurityReport {
        let policy = self.compiled(policy);
        let hash = policy.hash.clone();
        let image = match ModuleImage::decode(image) {
            Ok(image) => image,
            Err(e) => {
                let mut report = SecurityReport::new("<undecodable>", hash);
                report.push(ViolationKind::Malformed, "image", e.to_string());
                return report;
            }
        };

        let mut report = SecurityReport::new(image.name.clone(), hash);

        if image.has_flag(flags::ALLOW_UNSAFE) && !policy.allow_unsafe_interop {
            report.push(
                ViolationKind::UnsafeInterop,
                image.name.clone(),
                "module compiled with unsafe code",
            );
        }

        Self::check_imports(&image, &policy, &mut report);
        Self::check_external_types(&image, &policy, &mut report);
        Self::check_bodies(&image, &mut report);

        if let Some(bytes) = symbols {
            if let Err(e) = SymbolImage::decode(bytes) {
                report.push(ViolationKind::Malformed, "symbols", e.to_string());
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{encode_code, ImportDef, MethodDef, TypeDef};
    use crate::security::RestrictionList;

    fn image_with_import(is_unsafe: bool, argc: u8) -> Vec<u8> {
        let mut image = ModuleImage::new("scanner");
        image.imports.push(ImportDef {
            library: "native".to_string(),
            namespace: "Sys.Mem".to_string(),
            type_name: "Raw".to_string(),
            member: "peek".to_string(),
            param_count: 1,
            is_unsafe,
        });
        image.types.push(TypeDef {
            namespace: "Game".to_string(),
            name: "Scanner".to_string(),
            base: Some("Engine.Behaviour".to_string()),
            methods: vec![MethodDef {
                name: "run".to_string(),
                is_static: true,
                is_sequence: false,
                params: vec![],
                returns: None,
                local_count: 0,
                code: encode_code(&[
                    Instr::PushInt(0),
                    Instr::CallExtern { import: 0, argc },
                    Instr::RetVoid,
                ]),
            }],
            ..Default::default()
        });
        image.encode()
    }

    #[test]
    fn test_permissive_policy_passes() {
        let report = PolicyVerifier::new().verify(
            &image_with_import(true, 1),
            None,
            &SecurityPolicy::permissive(),
        );
        assert!(report.passed(), "{}", report);
        assert_eq!(report.checked_imports, 1);
        assert_eq!(report.module, "scanner");
    }

    #[test]
    fn test_each_offending_reference_is_reported() {
        let policy = SecurityPolicy {
            libraries: RestrictionList::deny_by_default().with_allow("host"),
            namespaces: RestrictionList::allow_by_default().with_deny("Sys.*"),
            types: RestrictionList::allow_by_default().with_deny("Engine.Behaviour"),
            ..SecurityPolicy::default()
        };
        let report = PolicyVerifier::new().verify(&image_with_import(true, 1), None, &policy);

        assert!(!report.passed());
        assert_eq!(report.violations_of(ViolationKind::Library).count(), 1);
        assert_eq!(report.violations_of(ViolationKind::Namespace).count(), 1);
        assert_eq!(report.violations_of(ViolationKind::UnsafeInterop).count(), 1);
        let ty = report.violations_of(ViolationKind::Type).next().unwrap();
        assert_eq!(ty.target, "Engine.Behaviour");
        assert_eq!(ty.rule, "deny 'Engine.Behaviour'");
    }

    #[test]
    fn test_argument_count_mismatch() {
        let report = PolicyVerifier::new().verify(
            &image_with_import(false, 3),
            None,
            &SecurityPolicy::default(),
        );
        assert_eq!(report.violations_of(ViolationKind::InvalidImport).count(), 1);
    }

    #[test]
    fn test_compiled_policy_is_reused_until_it_changes() {
        let verifier = PolicyVerifier::new();
        let mut policy = SecurityPolicy {
            libraries: RestrictionList::deny_by_default().with_allow("host"),
            ..SecurityPolicy::default()
        };
        let first = verifier.compiled(&policy);
        assert!(Arc::ptr_eq(&first, &verifier.compiled(&policy)));
        assert!(!verifier.verify(&image_with_import(false, 1), None, &policy).passed());
        assert!(Arc::ptr_eq(&first, &verifier.compiled(&policy)));

        policy.libraries = policy.libraries.with_allow("native");
        let second = verifier.compiled(&policy);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(verifier.verify(&image_with_import(false, 1), None, &policy).passed());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let report = PolicyVerifier::new().verify(b"not an image", None, &SecurityPolicy::default());
        assert!(!report.passed());
        assert_eq!(report.violations[0].kind, ViolationKind::Malformed);
    }

    #[test]
    fn test_corrupt_symbols_fail() {
        let report = PolicyVerifier::new().verify(
            &image_with_import(false, 1),
            Some(b"SBSY"),
            &SecurityPolicy::default(),
        );
        assert_eq!(report.violations_of(ViolationKind::Malformed).count(), 1);
    }
}
