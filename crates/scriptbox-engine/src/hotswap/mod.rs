//! In-place replacement of live instances
//!
//! A live instance is swapped for an instance of a newly loaded type with the
//! same name (or the override its `[replaceable]` metadata names). The new
//! instance is created on the same host entity, serializable state is copied
//! field by field, the old instance is told through `on_will_replace` and is
//! then destroyed or disabled.

mod report;

pub use report::{FieldOutcome, ReplaceReport, Replacement};

use crate::domain::{BroadcastFilter, Domain, Module};
use crate::error::ScriptResult;
use crate::image::{qualify, TypeKind};
use crate::reflect::{InstanceProxy, ModuleType};
use scriptbox_sdk::{EntityId, SceneId};
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use tracing::debug;

/// Method the old instance may declare to see its replacement
pub const ON_WILL_REPLACE: &str = "on_will_replace";

/// Replacement option bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplaceOptions(u32);

impl ReplaceOptions {
    /// No options
    pub const NONE: Self = Self(0);
    /// Consider types without `[replaceable]` metadata
    pub const DONT_REQUIRE_ATTRIBUTE: Self = Self(1);
    /// Copy public and `serialized` fields
    pub const COPY_SERIALIZE_FIELDS: Self = Self(2);
    /// Copy every instance field, `nonserialized` included
    pub const COPY_NON_SERIALIZE_FIELDS: Self = Self(4);
    /// Destroy the old instance
    pub const DESTROY_ORIGINAL: Self = Self(8);
    /// Disable the old instance (when not destroying it)
    pub const DISABLE_ORIGINAL: Self = Self(16);
    /// Batch calls also replace disabled instances
    pub const REPLACE_DISABLED: Self = Self(32);
    /// Match candidates by full name instead of simple name
    pub const REQUIRE_EXPLICIT_TYPE_MATCHES: Self = Self(64);

    /// Raw bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self::COPY_SERIALIZE_FIELDS | Self::DESTROY_ORIGINAL
    }
}

impl BitOr for ReplaceOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ReplaceOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Where replacement types come from
#[derive(Debug, Clone, Copy)]
pub enum ReplaceSource<'a> {
    /// Every type of a module
    Module(&'a Module),
    /// One type
    Type(&'a Arc<ModuleType>),
}

impl<'a> From<&'a Arc<Module>> for ReplaceSource<'a> {
    fn from(module: &'a Arc<Module>) -> Self {
        ReplaceSource::Module(module)
    }
}

impl<'a> From<&'a Module> for ReplaceSource<'a> {
    fn from(module: &'a Module) -> Self {
        ReplaceSource::Module(module)
    }
}

impl<'a> From<&'a Arc<ModuleType>> for ReplaceSource<'a> {
    fn from(ty: &'a Arc<ModuleType>) -> Self {
        ReplaceSource::Type(ty)
    }
}

impl ReplaceSource<'_> {
    fn candidates(&self) -> Vec<Arc<ModuleType>> {
        match self {
            ReplaceSource::Module(module) => module.types().to_vec(),
            ReplaceSource::Type(ty) => vec![Arc::clone(ty)],
        }
    }
}

/// Name and constraints a replacement must satisfy
struct Requirements {
    name: String,
    full_name: String,
    base: Option<String>,
    interfaces: Vec<String>,
}

impl Requirements {
    /// `None` when the live type is not replaceable under `options`
    fn of(live: &ModuleType, options: ReplaceOptions) -> Option<Self> {
        let own = Self {
            name: live.name().to_string(),
            full_name: live.full_name().to_string(),
            base: None,
            interfaces: Vec::new(),
        };
        if options.contains(ReplaceOptions::DONT_REQUIRE_ATTRIBUTE) {
            return Some(own);
        }
        let info = live.replace_info()?;
        let name = info
            .replace_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or(own.name);
        Some(Self {
            full_name: qualify(live.namespace(), &name),
            name,
            base: info.require_base.clone(),
            interfaces: info.require_interfaces.clone(),
        })
    }

    fn names(&self, candidate: &ModuleType, options: ReplaceOptions) -> bool {
        if options.contains(ReplaceOptions::REQUIRE_EXPLICIT_TYPE_MATCHES) {
            candidate.full_name() == self.full_name
        } else {
            candidate.name() == self.name
        }
    }

    /// Record an error per unmet constraint; true when all are met
    fn check(&self, candidate: &ModuleType, report: &mut ReplaceReport) -> bool {
        let mut ok = true;
        if let Some(base) = &self.base {
            if candidate.base() != Some(base.as_str()) {
                report.error(format!(
                    "type '{}' cannot replace '{}': it does not derive from required base type '{}'",
                    candidate.full_name(),
                    self.name,
                    base
                ));
                ok = false;
            }
        }
        for interface in &self.interfaces {
            if !candidate.interfaces().iter().any(|i| i == interface) {
                report.error(format!(
                    "type '{}' cannot replace '{}': it does not implement required interface '{}'",
                    candidate.full_name(),
                    self.name,
                    interface
                ));
                ok = false;
            }
        }
        ok
    }
}

fn kind_matches(live: &InstanceProxy, candidate: &ModuleType) -> bool {
    match candidate.kind() {
        TypeKind::Attached => live.is_attached(),
        TypeKind::Plain => !live.is_attached(),
        TypeKind::Interface => false,
    }
}

fn create_like(live: &InstanceProxy, ty: &Arc<ModuleType>) -> ScriptResult<InstanceProxy> {
    match live.entity()? {
        Some(entity) => ty.create_instance_on(entity, Vec::new()),
        None => ty.create_instance(Vec::new()),
    }
}

fn copy_fields(
    live: &InstanceProxy,
    new: &InstanceProxy,
    options: ReplaceOptions,
    report: &mut ReplaceReport,
) -> Vec<(String, FieldOutcome)> {
    let everything = options.contains(ReplaceOptions::COPY_NON_SERIALIZE_FIELDS);
    let serialized = options.contains(ReplaceOptions::COPY_SERIALIZE_FIELDS);
    let target = new.script_type();
    let mut outcomes = Vec::new();

    for field in live.script_type().fields(false) {
        if !(everything || (serialized && field.is_serializable())) {
            continue;
        }
        let outcome = match target.field(&field.name, false) {
            None => {
                report.warning(format!(
                    "type '{}' declares no serialized field '{}' of type '{}'",
                    target.full_name(),
                    field.name,
                    field.ty.name()
                ));
                FieldOutcome::NoMatchingField
            }
            Some(declared) if !declared.ty.is_assignable_from(field.ty) => {
                report.warning(format!(
                    "type '{}' declares field '{}' as '{}', which cannot hold '{}'",
                    target.full_name(),
                    field.name,
                    declared.ty.name(),
                    field.ty.name()
                ));
                FieldOutcome::IncompatibleType
            }
            Some(_) => {
                let copied = live
                    .field(&field.name)
                    .get()
                    .and_then(|value| new.field(&field.name).set(value.clone()).map(|_| value));
                match copied {
                    Ok(value) => {
                        report.message(format!(
                            "copied field '{}' with value '{}' of type '{}'",
                            field.name,
                            value,
                            field.ty.name()
                        ));
                        FieldOutcome::Copied
                    }
                    Err(e) => {
                        report.warning(format!("field '{}' was not copied: {}", field.name, e));
                        FieldOutcome::IncompatibleType
                    }
                }
            }
        };
        outcomes.push((field.name.clone(), outcome));
    }
    outcomes
}

fn replace_with(
    live: &InstanceProxy,
    ty: &Arc<ModuleType>,
    options: ReplaceOptions,
    report: &mut ReplaceReport,
) {
    let new = match create_like(live, ty) {
        Ok(new) => new,
        Err(e) => {
            report.error(format!(
                "could not create '{}' to replace '{}': {}",
                ty.full_name(),
                live.type_name(),
                e
            ));
            return;
        }
    };
    report.message(format!(
        "created instance of '{}' to replace '{}'",
        ty.full_name(),
        live.type_name()
    ));

    let fields = copy_fields(live, &new, options, report);

    if live.script_type().method(ON_WILL_REPLACE, false).is_some() {
        let notified = new.to_value().and_then(|v| live.call(ON_WILL_REPLACE, vec![v]));
        if let Err(e) = notified {
            report.warning(format!("{} on '{}' failed: {}", ON_WILL_REPLACE, live.type_name(), e));
        }
    }

    if options.contains(ReplaceOptions::DESTROY_ORIGINAL) {
        if let Err(e) = live.destroy() {
            report.warning(format!("could not destroy '{}': {}", live.type_name(), e));
        }
    } else if options.contains(ReplaceOptions::DISABLE_ORIGINAL) {
        if let Err(e) = live.set_enabled(false) {
            report.warning(format!("could not disable '{}': {}", live.type_name(), e));
        }
    }

    report.push(Replacement {
        original_type: live.type_name().to_string(),
        replacement: new,
        fields,
    });
}

fn replace_into(
    live: &InstanceProxy,
    source: ReplaceSource<'_>,
    options: ReplaceOptions,
    report: &mut ReplaceReport,
) {
    if !live.is_alive() {
        report.error(format!(
            "instance of '{}' has been destroyed and will be skipped",
            live.type_name()
        ));
        return;
    }
    let live_type = live.script_type();
    let Some(required) = Requirements::of(live_type, options) else {
        debug!(type_name = live.type_name(), "type is not replaceable; skipped");
        return;
    };

    for candidate in source.candidates() {
        if Arc::ptr_eq(&candidate, live_type)
            || !kind_matches(live, &candidate)
            || !required.names(&candidate, options)
        {
            continue;
        }
        if !required.check(&candidate, report) {
            continue;
        }
        replace_with(live, &candidate, options, report);
        if live.is_disposed() {
            break;
        }
    }
}

/// Replace one live instance with matching types from `source`
pub fn replace_instance<'a>(
    live: &InstanceProxy,
    source: impl Into<ReplaceSource<'a>>,
    options: ReplaceOptions,
) -> ReplaceReport {
    let mut report = ReplaceReport::new();
    replace_into(live, source.into(), options, &mut report);
    report
}

fn replace_all(
    targets: Vec<InstanceProxy>,
    source: ReplaceSource<'_>,
    options: ReplaceOptions,
) -> ScriptResult<ReplaceReport> {
    let mut report = ReplaceReport::new();
    for live in targets {
        // Earlier replacements may dispose later targets
        if !options.contains(ReplaceOptions::REPLACE_DISABLED) {
            match live.is_enabled() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    report.error(format!(
                        "instance of '{}' could not be replaced: {}",
                        live.type_name(),
                        e
                    ));
                    continue;
                }
            }
        }
        replace_into(&live, source, options, &mut report);
    }
    Ok(report)
}

/// Replace every attached instance in a scene
///
/// `domain` defaults to the active domain.
pub fn replace_in_scene<'a>(
    domain: Option<&Domain>,
    scene: SceneId,
    source: impl Into<ReplaceSource<'a>>,
    options: ReplaceOptions,
) -> ScriptResult<ReplaceReport> {
    let domain = Domain::resolve(domain)?;
    domain.ensure_alive()?;
    let targets = domain.find_instances(&BroadcastFilter::attached().scene(scene));
    replace_all(targets, source.into(), options)
}

/// Replace every attached instance on one entity
///
/// `domain` defaults to the active domain.
pub fn replace_on_entity<'a>(
    domain: Option<&Domain>,
    entity: EntityId,
    source: impl Into<ReplaceSource<'a>>,
    options: ReplaceOptions,
) -> ScriptResult<ReplaceReport> {
    let domain = Domain::resolve(domain)?;
    domain.ensure_alive()?;
    let host = domain.host();
    let targets = domain
        .find_instances(&BroadcastFilter::attached())
        .into_iter()
        .filter(|p| p.component().and_then(|c| host.entity_of(c)) == Some(entity))
        .collect();
    replace_all(targets, source.into(), options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ReplaceOptions::default();
        assert!(options.contains(ReplaceOptions::COPY_SERIALIZE_FIELDS));
        assert!(options.contains(ReplaceOptions::DESTROY_ORIGINAL));
        assert!(!options.contains(ReplaceOptions::DISABLE_ORIGINAL));
        assert_eq!(options.bits(), 10);

        let mut options = ReplaceOptions::NONE;
        options |= ReplaceOptions::REPLACE_DISABLED;
        assert!(options.contains(ReplaceOptions::REPLACE_DISABLED));
        assert!(options.contains(ReplaceOptions::NONE));
    }
}
