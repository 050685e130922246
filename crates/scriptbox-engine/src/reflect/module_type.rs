//! Reflective view of one declared type

use super::descriptor::{EventDescriptor, FieldDescriptor, MethodDescriptor, PropertyDescriptor};
use super::instance::InstanceProxy;
use super::member_cache::MemberCache;
use super::proxy::{
    dispatch, CallConvention, EventProxy, FieldProxy, PropertyProxy, SafeEventProxy,
    SafeFieldProxy, SafePropertyProxy, Target,
};
use crate::domain::{Domain, Module};
use crate::error::{MemberKind, ScriptError, ScriptResult};
use crate::image::{decode_code, Attribute, Instr, ModuleImage, ReplaceInfo, TypeDef, TypeKind};
use crate::vm::interpreter::invoke;
use crate::vm::{EventTable, ExecContext, Instance};
use parking_lot::Mutex;
use scriptbox_sdk::{EntityId, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// A type declared by a loaded module
pub struct ModuleType {
    module: Weak<Module>,
    domain_name: String,
    image: Arc<ModuleImage>,
    index: usize,
    full_name: String,
    parent: Weak<ModuleType>,
    nested: Vec<Arc<ModuleType>>,
    bodies: Vec<Result<Arc<[Instr]>, String>>,
    // def field index per instance slot / static slot
    instance_slots: Vec<usize>,
    static_slots: Vec<usize>,
    statics: Mutex<Vec<Value>>,
    static_events: EventTable,
    fields: MemberCache<FieldDescriptor>,
    properties: MemberCache<PropertyDescriptor>,
    methods: MemberCache<MethodDescriptor>,
    events: MemberCache<EventDescriptor>,
}

impl std::fmt::Debug for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleType")
            .field("full_name", &self.full_name)
            .field("kind", &self.def().kind)
            .finish()
    }
}

impl ModuleType {
    /// Build a type and, eagerly, all of its nested types
    pub(crate) fn build(
        module: Weak<Module>,
        domain_name: &str,
        image: &Arc<ModuleImage>,
        index: usize,
        parent: Weak<ModuleType>,
    ) -> Arc<ModuleType> {
        Arc::new_cyclic(|me| {
            let def = &image.types[index];
            let nested = image
                .types
                .iter()
                .enumerate()
                .filter(|(_, t)| t.parent == Some(index as u32))
                .map(|(i, _)| Self::build(module.clone(), domain_name, image, i, me.clone()))
                .collect();

            let bodies = def
                .methods
                .iter()
                .map(|m| {
                    decode_code(&m.code)
                        .map(Arc::from)
                        .map_err(|e| format!("undecodable body: {}", e))
                })
                .collect();

            let (static_slots, instance_slots): (Vec<usize>, Vec<usize>) =
                (0..def.fields.len()).partition(|&i| def.fields[i].is_static());
            let statics = static_slots
                .iter()
                .map(|&i| def.fields[i].default.clone())
                .collect();

            debug!(type_name = %def.full_name(), "built module type");
            ModuleType {
                module,
                domain_name: domain_name.to_string(),
                image: image.clone(),
                index,
                full_name: def.full_name(),
                parent,
                nested,
                bodies,
                instance_slots,
                static_slots,
                statics: Mutex::new(statics),
                static_events: EventTable::new(),
                fields: MemberCache::new(),
                properties: MemberCache::new(),
                methods: MemberCache::new(),
                events: MemberCache::new(),
            }
        })
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Declaration in the image
    pub fn def(&self) -> &TypeDef {
        &self.image.types[self.index]
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Fully qualified name
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Simple name
    pub fn name(&self) -> &str {
        &self.def().name
    }

    /// Namespace
    pub fn namespace(&self) -> &str {
        &self.def().namespace
    }

    /// Type category
    pub fn kind(&self) -> TypeKind {
        self.def().kind
    }

    /// Whether instances live on a host entity
    pub fn is_attached(&self) -> bool {
        self.kind() == TypeKind::Attached
    }

    /// Publicly visible
    pub fn is_public(&self) -> bool {
        self.def().is_public
    }

    /// Direct base type
    pub fn base(&self) -> Option<&str> {
        self.def().base.as_deref()
    }

    /// Implemented interfaces
    pub fn interfaces(&self) -> &[String] {
        &self.def().interfaces
    }

    /// Hot-swap metadata
    pub fn replace_info(&self) -> Option<&ReplaceInfo> {
        self.def().replace.as_ref()
    }

    /// Image this type was decoded from
    pub fn image(&self) -> &Arc<ModuleImage> {
        &self.image
    }

    /// Owning module
    pub fn module(&self) -> ScriptResult<Arc<Module>> {
        self.module
            .upgrade()
            .ok_or_else(|| ScriptError::DomainDisposed(self.domain_name.clone()))
    }

    /// Owning domain
    pub fn domain(&self) -> ScriptResult<Domain> {
        self.module()?.domain()
    }

    pub(crate) fn exec_context(&self) -> ScriptResult<ExecContext> {
        self.domain()?.exec_context()
    }

    /// Enclosing type for nested types
    pub fn parent(&self) -> Option<Arc<ModuleType>> {
        self.parent.upgrade()
    }

    /// Directly nested types
    pub fn nested_types(&self) -> &[Arc<ModuleType>] {
        &self.nested
    }

    /// Nested type by simple name (`Inner`) or full name
    pub fn find_nested_type(&self, name: &str) -> Option<Arc<ModuleType>> {
        self.nested
            .iter()
            .find(|t| {
                t.full_name == name || t.name().rsplit('.').next() == Some(name) || t.name() == name
            })
            .cloned()
    }

    /// Declared attributes
    pub fn attributes(&self) -> &[Attribute] {
        &self.def().attributes
    }

    /// Whether an attribute with this name is declared
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// First attribute with this name
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes().iter().find(|a| a.name == name)
    }

    /// Whether this type is `base`, derives from it or implements it
    ///
    /// Bases outside this type's module are followed through the domain.
    pub fn is_sub_type_of(&self, base: &str) -> bool {
        if self.full_name == base || self.interfaces().iter().any(|i| i == base) {
            return true;
        }
        let mut visited = vec![self.full_name.clone()];
        let mut next = self.base().map(str::to_string);
        let domain = self.domain().ok();
        while let Some(name) = next.take() {
            if name == base {
                return true;
            }
            if visited.contains(&name) {
                break;
            }
            let ty = self
                .module
                .upgrade()
                .and_then(|m| m.find_type(&name))
                .or_else(|| domain.as_ref().and_then(|d| d.find_type(&name)));
            match ty {
                Some(ty) => {
                    if ty.interfaces().iter().any(|i| i == base) {
                        return true;
                    }
                    next = ty.base().map(str::to_string);
                }
                None => break,
            }
            visited.push(name);
        }
        false
    }

    // ------------------------------------------------------------------
    // Member caches
    // ------------------------------------------------------------------

    /// Cached field lookup
    pub fn field(&self, name: &str, is_static: bool) -> Option<Arc<FieldDescriptor>> {
        self.fields.find_or_insert_with(name, is_static, || {
            let def = self.def();
            let slots = if is_static { &self.static_slots } else { &self.instance_slots };
            slots.iter().enumerate().find_map(|(slot, &i)| {
                let field = &def.fields[i];
                (field.name == name).then(|| {
                    Arc::new(FieldDescriptor {
                        name: field.name.clone(),
                        ty: field.ty,
                        is_static,
                        flags: field.flags,
                        slot,
                    })
                })
            })
        })
    }

    /// Cached property lookup
    pub fn property(&self, name: &str, is_static: bool) -> Option<Arc<PropertyDescriptor>> {
        self.properties.find_or_insert_with(name, is_static, || {
            self.def()
                .properties
                .iter()
                .find(|p| p.name == name && p.is_static == is_static)
                .map(|p| {
                    Arc::new(PropertyDescriptor {
                        name: p.name.clone(),
                        ty: p.ty,
                        is_static,
                        getter: p.getter.clone(),
                        setter: p.setter.clone(),
                    })
                })
        })
    }

    /// Cached method lookup
    pub fn method(&self, name: &str, is_static: bool) -> Option<Arc<MethodDescriptor>> {
        self.methods.find_or_insert_with(name, is_static, || {
            self.def()
                .methods
                .iter()
                .enumerate()
                .find(|(_, m)| m.name == name && m.is_static == is_static)
                .map(|(index, m)| {
                    Arc::new(MethodDescriptor {
                        name: m.name.clone(),
                        index,
                        is_static,
                        is_sequence: m.is_sequence,
                        params: m.params.clone(),
                        returns: m.returns,
                        slot_count: m.slot_count(),
                    })
                })
        })
    }

    /// Cached event lookup
    pub fn event(&self, name: &str, is_static: bool) -> Option<Arc<EventDescriptor>> {
        self.events.find_or_insert_with(name, is_static, || {
            self.def()
                .events
                .iter()
                .find(|e| e.name == name && e.is_static == is_static)
                .map(|e| {
                    Arc::new(EventDescriptor {
                        name: e.name.clone(),
                        is_static,
                    })
                })
        })
    }

    /// Like [`field`](Self::field) but failing with `MemberNotFound`
    pub fn find_field(&self, name: &str, is_static: bool) -> ScriptResult<Arc<FieldDescriptor>> {
        self.field(name, is_static)
            .ok_or_else(|| ScriptError::not_found(&self.full_name, MemberKind::Field, name))
    }

    /// Like [`property`](Self::property) but failing with `MemberNotFound`
    pub fn find_property(&self, name: &str, is_static: bool) -> ScriptResult<Arc<PropertyDescriptor>> {
        self.property(name, is_static)
            .ok_or_else(|| ScriptError::not_found(&self.full_name, MemberKind::Property, name))
    }

    /// Like [`method`](Self::method) but failing with `MemberNotFound`
    pub fn find_method(&self, name: &str, is_static: bool) -> ScriptResult<Arc<MethodDescriptor>> {
        self.method(name, is_static)
            .ok_or_else(|| ScriptError::not_found(&self.full_name, MemberKind::Method, name))
    }

    /// Like [`event`](Self::event) but failing with `MemberNotFound`
    pub fn find_event(&self, name: &str, is_static: bool) -> ScriptResult<Arc<EventDescriptor>> {
        self.event(name, is_static)
            .ok_or_else(|| ScriptError::not_found(&self.full_name, MemberKind::Event, name))
    }

    /// Every instance or static field, in declaration order
    pub fn fields(&self, is_static: bool) -> Vec<Arc<FieldDescriptor>> {
        let def = self.def();
        let slots = if is_static { &self.static_slots } else { &self.instance_slots };
        slots
            .iter()
            .filter_map(|&i| self.field(&def.fields[i].name, is_static))
            .collect()
    }

    /// Whether a member name is cached, and with which static-ness
    pub fn cached_member(&self, kind: MemberKind, name: &str) -> Option<bool> {
        match kind {
            MemberKind::Field => self.fields.cached(name),
            MemberKind::Property => self.properties.cached(name),
            MemberKind::Method => self.methods.cached(name),
            MemberKind::Event => self.events.cached(name),
        }
    }

    // ------------------------------------------------------------------
    // Storage used by the interpreter
    // ------------------------------------------------------------------

    pub(crate) fn body(&self, method: usize) -> ScriptResult<Arc<[Instr]>> {
        match self.bodies.get(method) {
            Some(Ok(code)) => Ok(code.clone()),
            Some(Err(message)) => Err(ScriptError::invocation(
                &self.full_name,
                &self.def().methods[method].name,
                message.clone(),
            )),
            None => Err(ScriptError::invocation(
                &self.full_name,
                format!("#{}", method),
                "no such method body",
            )),
        }
    }

    pub(crate) fn instance_field_defaults(&self) -> Vec<Value> {
        let def = self.def();
        self.instance_slots
            .iter()
            .map(|&i| def.fields[i].default.clone())
            .collect()
    }

    pub(crate) fn load_static(&self, slot: usize) -> Value {
        self.statics.lock().get(slot).cloned().unwrap_or_default()
    }

    pub(crate) fn store_static(&self, slot: usize, value: Value) {
        if let Some(cell) = self.statics.lock().get_mut(slot) {
            *cell = value;
        }
    }

    pub(crate) fn static_events(&self) -> &EventTable {
        &self.static_events
    }

    // ------------------------------------------------------------------
    // Instantiation and static access
    // ------------------------------------------------------------------

    /// Create a free-standing instance and run its `init` method
    pub fn create_instance(self: &Arc<Self>, args: Vec<Value>) -> ScriptResult<InstanceProxy> {
        match self.kind() {
            TypeKind::Plain => {}
            TypeKind::Attached => {
                return Err(ScriptError::InvalidArgument(format!(
                    "type '{}' is attached; create it on an entity",
                    self.full_name
                )))
            }
            TypeKind::Interface => {
                return Err(ScriptError::InvalidArgument(format!(
                    "interface '{}' cannot be instantiated",
                    self.full_name
                )))
            }
        }
        let domain = self.domain()?;
        let instance = Instance::new(self.clone(), None);
        self.initialize(&instance, args)?;
        domain.track(instance)
    }

    /// Attach a new instance to a host entity and run its `init` method
    pub fn create_instance_on(
        self: &Arc<Self>,
        entity: EntityId,
        args: Vec<Value>,
    ) -> ScriptResult<InstanceProxy> {
        if self.kind() != TypeKind::Attached {
            return Err(ScriptError::InvalidArgument(format!(
                "type '{}' is not an attached type",
                self.full_name
            )));
        }
        let domain = self.domain()?;
        let host = domain.host();
        let component = host.attach(entity, &self.full_name)?;
        let instance = Instance::new(self.clone(), Some(component));
        if let Err(e) = self.initialize(&instance, args) {
            host.destroy(component);
            return Err(e);
        }
        domain.track(instance)
    }

    fn initialize(self: &Arc<Self>, instance: &Arc<Instance>, args: Vec<Value>) -> ScriptResult<()> {
        match self.method("init", false) {
            Some(init) => invoke(self, Some(instance), &init, args).map(|_| ()),
            None if args.is_empty() => Ok(()),
            None => Err(ScriptError::invocation(
                &self.full_name,
                "init",
                format!("no init method taking {} argument(s)", args.len()),
            )),
        }
    }

    /// Call a static method
    pub fn call_static(self: &Arc<Self>, name: &str, args: Vec<Value>) -> ScriptResult<Value> {
        dispatch(Target::Static(self), name, args, CallConvention::Any)
    }

    /// Call a static method, mapping any failure to `None`
    pub fn safe_call_static(self: &Arc<Self>, name: &str, args: Vec<Value>) -> Option<Value> {
        match self.call_static(name, args) {
            Ok(v) => Some(v),
            Err(e) => {
                trace!(type_name = %self.full_name, method = name, error = %e, "safe static call failed");
                None
            }
        }
    }

    /// Static field accessor
    pub fn static_field<'a>(self: &'a Arc<Self>, name: &str) -> FieldProxy<'a> {
        FieldProxy::new(Target::Static(self), name)
    }

    /// Non-throwing static field accessor
    pub fn safe_static_field<'a>(self: &'a Arc<Self>, name: &str) -> SafeFieldProxy<'a> {
        SafeFieldProxy::new(self.static_field(name))
    }

    /// Static property accessor
    pub fn static_property<'a>(self: &'a Arc<Self>, name: &str) -> PropertyProxy<'a> {
        PropertyProxy::new(Target::Static(self), name)
    }

    /// Non-throwing static property accessor
    pub fn safe_static_property<'a>(self: &'a Arc<Self>, name: &str) -> SafePropertyProxy<'a> {
        SafePropertyProxy::new(self.static_property(name))
    }

    /// Static event accessor
    pub fn static_event<'a>(self: &'a Arc<Self>, name: &str) -> EventProxy<'a> {
        EventProxy::new(Target::Static(self), name)
    }

    /// Non-throwing static event accessor
    pub fn safe_static_event<'a>(self: &'a Arc<Self>, name: &str) -> SafeEventProxy<'a> {
        SafeEventProxy::new(self.static_event(name))
    }
}
