//! Handles to live script instances

use super::descriptor::{EventDescriptor, FieldDescriptor, PropertyDescriptor};
use super::member_cache::MemberCache;
use super::module_type::ModuleType;
use super::proxy::{
    dispatch, CallConvention, EventProxy, FieldProxy, PropertyProxy, SafeEventProxy,
    SafeFieldProxy, SafePropertyProxy, Target,
};
use crate::domain::{Domain, DomainInner};
use crate::error::{MemberKind, ScriptError, ScriptResult};
use crate::vm::Instance;
use once_cell::sync::OnceCell;
use scriptbox_sdk::{ComponentId, EntityId, SceneId, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Identity of an instance proxy within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(pub u64);

static NEXT_PROXY: AtomicU64 = AtomicU64::new(1);

struct ProxyInner {
    id: ProxyId,
    instance: Arc<Instance>,
    domain: Weak<DomainInner>,
    disposed: AtomicBool,
    accessors: OnceCell<Accessors>,
}

/// Instance members this proxy has already resolved
#[derive(Debug, Default)]
struct Accessors {
    fields: MemberCache<FieldDescriptor>,
    properties: MemberCache<PropertyDescriptor>,
    events: MemberCache<EventDescriptor>,
}

/// Handle to one live script instance
///
/// Cloning shares the handle. Once disposed, every accessor fails with
/// [`ScriptError::Disposed`] without touching the instance.
#[derive(Clone)]
pub struct InstanceProxy(Arc<ProxyInner>);

impl std::fmt::Debug for InstanceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceProxy")
            .field("id", &self.0.id)
            .field("type", &self.0.instance.ty().full_name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl PartialEq for InstanceProxy {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for InstanceProxy {}

impl InstanceProxy {
    pub(crate) fn new(instance: Arc<Instance>, domain: Weak<DomainInner>) -> Self {
        Self(Arc::new(ProxyInner {
            id: ProxyId(NEXT_PROXY.fetch_add(1, Ordering::Relaxed)),
            instance,
            domain,
            disposed: AtomicBool::new(false),
            accessors: OnceCell::new(),
        }))
    }

    /// Proxy identity
    pub fn id(&self) -> ProxyId {
        self.0.id
    }

    /// Type of the instance
    pub fn script_type(&self) -> &Arc<ModuleType> {
        self.0.instance.ty()
    }

    /// Full name of the instance's type
    pub fn type_name(&self) -> &str {
        self.script_type().full_name()
    }

    /// Host component, for attached instances
    pub fn component(&self) -> Option<ComponentId> {
        self.0.instance.component()
    }

    /// Whether the instance lives on a host entity
    pub fn is_attached(&self) -> bool {
        self.component().is_some()
    }

    /// Whether the proxy has been disposed
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn live(&self) -> ScriptResult<&Arc<Instance>> {
        if self.is_disposed() {
            return Err(ScriptError::Disposed(self.type_name().to_string()));
        }
        Ok(&self.0.instance)
    }

    fn accessors(&self) -> ScriptResult<&Accessors> {
        self.live()?;
        Ok(self.0.accessors.get_or_init(Accessors::default))
    }

    pub(crate) fn resolve_field(&self, name: &str) -> ScriptResult<Arc<FieldDescriptor>> {
        let ty = self.script_type();
        self.accessors()?
            .fields
            .find_or_insert_with(name, false, || ty.field(name, false))
            .ok_or_else(|| ScriptError::not_found(ty.full_name(), MemberKind::Field, name))
    }

    pub(crate) fn resolve_property(&self, name: &str) -> ScriptResult<Arc<PropertyDescriptor>> {
        let ty = self.script_type();
        self.accessors()?
            .properties
            .find_or_insert_with(name, false, || ty.property(name, false))
            .ok_or_else(|| ScriptError::not_found(ty.full_name(), MemberKind::Property, name))
    }

    pub(crate) fn resolve_event(&self, name: &str) -> ScriptResult<Arc<EventDescriptor>> {
        let ty = self.script_type();
        self.accessors()?
            .events
            .find_or_insert_with(name, false, || ty.event(name, false))
            .ok_or_else(|| ScriptError::not_found(ty.full_name(), MemberKind::Event, name))
    }

    /// Whether this proxy has already resolved an instance member
    ///
    /// Methods resolve through the type's cache and always report `false`.
    pub fn accessor_cached(&self, kind: MemberKind, name: &str) -> bool {
        let Some(accessors) = self.0.accessors.get() else {
            return false;
        };
        let cached = match kind {
            MemberKind::Field => accessors.fields.cached(name),
            MemberKind::Property => accessors.properties.cached(name),
            MemberKind::Event => accessors.events.cached(name),
            MemberKind::Method => None,
        };
        cached.is_some()
    }

    fn domain(&self) -> ScriptResult<Domain> {
        Domain::upgrade(&self.0.domain)
            .ok_or_else(|| ScriptError::Disposed(self.type_name().to_string()))
    }

    /// Not disposed, and for attached instances not destroyed by the host
    pub fn is_alive(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        match (self.component(), self.domain()) {
            (Some(component), Ok(domain)) => !domain.host().is_destroyed(component),
            (Some(_), Err(_)) => false,
            (None, _) => true,
        }
    }

    /// Host entity of an attached instance
    pub fn entity(&self) -> ScriptResult<Option<EntityId>> {
        self.live()?;
        match self.component() {
            Some(component) => Ok(self.domain()?.host().entity_of(component)),
            None => Ok(None),
        }
    }

    /// Host scene of an attached instance
    pub fn scene(&self) -> ScriptResult<Option<SceneId>> {
        let host = self.domain()?.host();
        Ok(self.entity()?.and_then(|entity| host.scene_of(entity)))
    }

    /// Whether the host reports the component enabled; plain instances always are
    pub fn is_enabled(&self) -> ScriptResult<bool> {
        self.live()?;
        match self.component() {
            Some(component) => Ok(self.domain()?.host().is_enabled(component)),
            None => Ok(true),
        }
    }

    /// Enable or disable the host component
    pub fn set_enabled(&self, enabled: bool) -> ScriptResult<()> {
        self.live()?;
        if let Some(component) = self.component() {
            self.domain()?.host().set_enabled(component, enabled);
        }
        Ok(())
    }

    /// The instance as a script value
    pub fn to_value(&self) -> ScriptResult<Value> {
        Ok(self.live()?.to_value())
    }

    /// Remove from the domain's execution registry and mark disposed
    ///
    /// Disposing twice is a no-op.
    pub fn dispose(&self) {
        if self.0.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(domain) = Domain::upgrade(&self.0.domain) {
            domain.untrack(self.0.id);
        }
        trace!(id = self.0.id.0, type_name = self.type_name(), "disposed instance proxy");
    }

    /// Mark disposed without touching the registry
    pub(crate) fn mark_disposed(&self) {
        self.0.disposed.store(true, Ordering::Release);
    }

    /// Destroy the host component (if any) and dispose
    pub fn destroy(&self) -> ScriptResult<()> {
        self.live()?;
        if let Some(component) = self.component() {
            self.domain()?.host().destroy(component);
        }
        self.dispose();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Call an instance method with [`CallConvention::Any`]
    pub fn call(&self, name: &str, args: Vec<Value>) -> ScriptResult<Value> {
        self.call_with(name, args, CallConvention::Any)
    }

    /// Call an instance method with an explicit convention
    pub fn call_with(
        &self,
        name: &str,
        args: Vec<Value>,
        convention: CallConvention,
    ) -> ScriptResult<Value> {
        dispatch(Target::Instance(self), name, args, convention)
    }

    /// Call an instance method, mapping any failure to `None`
    pub fn safe_call(&self, name: &str, args: Vec<Value>) -> Option<Value> {
        match self.call(name, args) {
            Ok(v) => Some(v),
            Err(e) => {
                trace!(type_name = self.type_name(), method = name, error = %e, "safe call failed");
                None
            }
        }
    }

    /// Field accessor
    pub fn field(&self, name: &str) -> FieldProxy<'_> {
        FieldProxy::new(Target::Instance(self), name)
    }

    /// Non-throwing field accessor
    pub fn safe_field(&self, name: &str) -> SafeFieldProxy<'_> {
        SafeFieldProxy::new(self.field(name))
    }

    /// Property accessor
    pub fn property(&self, name: &str) -> PropertyProxy<'_> {
        PropertyProxy::new(Target::Instance(self), name)
    }

    /// Non-throwing property accessor
    pub fn safe_property(&self, name: &str) -> SafePropertyProxy<'_> {
        SafePropertyProxy::new(self.property(name))
    }

    /// Event accessor
    pub fn event(&self, name: &str) -> EventProxy<'_> {
        EventProxy::new(Target::Instance(self), name)
    }

    /// Non-throwing event accessor
    pub fn safe_event(&self, name: &str) -> SafeEventProxy<'_> {
        SafeEventProxy::new(self.event(name))
    }
}
