//! Field, property, event and call proxies
//!
//! Every accessor comes in two flavors. The throwing flavor returns
//! `ScriptResult`; the safe flavor wraps it and turns any error into `None`
//! (or `false` for writes). Accessors are borrowed views created on demand.
//! Instance members resolve once per proxy and stay cached on it; static
//! members go through the type's caches.

use super::descriptor::{FieldDescriptor, PropertyDescriptor};
use super::instance::InstanceProxy;
use super::module_type::ModuleType;
use crate::error::{ScriptError, ScriptResult};
use crate::vm::interpreter::invoke;
use crate::vm::{Instance, SubscriptionId};
use scriptbox_sdk::Value;
use std::sync::Arc;
use tracing::trace;

/// How a method result is treated when it is a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallConvention {
    /// Return whatever the method returns
    StandardMethod,
    /// Start a returned sequence on the host
    Coroutine,
    /// Start a returned sequence on the host when there is one
    #[default]
    Any,
}

/// What an accessor reads from or writes to
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// Static members of a type
    Static(&'a Arc<ModuleType>),
    /// Members of a live instance
    Instance(&'a InstanceProxy),
}

impl<'a> Target<'a> {
    /// Type whose members are accessed
    pub fn ty(&self) -> &'a Arc<ModuleType> {
        match *self {
            Target::Static(ty) => ty,
            Target::Instance(proxy) => proxy.script_type(),
        }
    }

    fn is_static(&self) -> bool {
        matches!(self, Target::Static(_))
    }

    /// Live instance; fails on a disposed proxy before anything else
    fn instance(&self) -> ScriptResult<Option<&'a Arc<Instance>>> {
        match *self {
            Target::Static(_) => Ok(None),
            Target::Instance(proxy) => proxy.live().map(Some),
        }
    }
}

fn safe<T>(target: &Target<'_>, member: &str, result: ScriptResult<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            trace!(type_name = %target.ty().full_name(), member, error = %e, "safe accessor failed");
            None
        }
    }
}

/// Resolve and invoke a method on a target
pub(crate) fn dispatch(
    target: Target<'_>,
    name: &str,
    args: Vec<Value>,
    convention: CallConvention,
) -> ScriptResult<Value> {
    let this = target.instance()?;
    let ty = target.ty();
    let method = ty.find_method(name, target.is_static())?;
    let result = invoke(ty, this, &method, args)?;

    if convention != CallConvention::StandardMethod {
        if let (Value::Sequence(sequence), Some(component)) =
            (&result, this.and_then(|i| i.component()))
        {
            ty.exec_context()?
                .host
                .start_sequence(component, sequence.clone())?;
        }
    }
    Ok(result)
}

// ============================================================================
// Fields
// ============================================================================

/// Throwing field accessor
#[derive(Debug, Clone)]
pub struct FieldProxy<'a> {
    target: Target<'a>,
    name: String,
}

impl<'a> FieldProxy<'a> {
    pub(crate) fn new(target: Target<'a>, name: &str) -> Self {
        Self {
            target,
            name: name.to_string(),
        }
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved field
    pub fn descriptor(&self) -> ScriptResult<Arc<FieldDescriptor>> {
        match self.target {
            Target::Static(ty) => ty.find_field(&self.name, true),
            Target::Instance(proxy) => proxy.resolve_field(&self.name),
        }
    }

    /// Current value
    pub fn get(&self) -> ScriptResult<Value> {
        let instance = self.target.instance()?;
        let field = self.descriptor()?;
        Ok(match instance {
            Some(instance) => instance.get_slot(field.slot).unwrap_or_default(),
            None => self.target.ty().load_static(field.slot),
        })
    }

    /// Store a value, coerced to the declared type
    pub fn set(&self, value: Value) -> ScriptResult<()> {
        let instance = self.target.instance()?;
        let field = self.descriptor()?;
        let got = value.value_type();
        let value = field.ty.coerce(value).ok_or_else(|| {
            ScriptError::invocation(
                self.target.ty().full_name(),
                &self.name,
                format!("cannot store {} in {} field", got, field.ty.name()),
            )
        })?;
        match instance {
            Some(instance) => {
                instance.set_slot(field.slot, value);
            }
            None => self.target.ty().store_static(field.slot, value),
        }
        Ok(())
    }
}

/// Non-throwing field accessor
#[derive(Debug, Clone)]
pub struct SafeFieldProxy<'a>(FieldProxy<'a>);

impl<'a> SafeFieldProxy<'a> {
    pub(crate) fn new(inner: FieldProxy<'a>) -> Self {
        Self(inner)
    }

    /// Current value, if the field exists and the instance is live
    pub fn get(&self) -> Option<Value> {
        safe(&self.0.target, &self.0.name, self.0.get())
    }

    /// Store a value; returns whether it was stored
    pub fn set(&self, value: Value) -> bool {
        safe(&self.0.target, &self.0.name, self.0.set(value)).is_some()
    }

    /// Resolved field
    pub fn descriptor(&self) -> Option<Arc<FieldDescriptor>> {
        safe(&self.0.target, &self.0.name, self.0.descriptor())
    }
}

// ============================================================================
// Properties
// ============================================================================

/// Throwing property accessor; routes through the declared accessor methods
#[derive(Debug, Clone)]
pub struct PropertyProxy<'a> {
    target: Target<'a>,
    name: String,
}

impl<'a> PropertyProxy<'a> {
    pub(crate) fn new(target: Target<'a>, name: &str) -> Self {
        Self {
            target,
            name: name.to_string(),
        }
    }

    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved property
    pub fn descriptor(&self) -> ScriptResult<Arc<PropertyDescriptor>> {
        match self.target {
            Target::Static(ty) => ty.find_property(&self.name, true),
            Target::Instance(proxy) => proxy.resolve_property(&self.name),
        }
    }

    fn accessor(&self, which: Option<&String>, missing: &str) -> ScriptResult<String> {
        which.cloned().ok_or_else(|| {
            ScriptError::invocation(self.target.ty().full_name(), &self.name, missing)
        })
    }

    /// Whether the property has a getter
    pub fn can_read(&self) -> ScriptResult<bool> {
        Ok(self.descriptor()?.getter.is_some())
    }

    /// Whether the property has a setter
    pub fn can_write(&self) -> ScriptResult<bool> {
        Ok(self.descriptor()?.setter.is_some())
    }

    /// Call the getter
    pub fn get(&self) -> ScriptResult<Value> {
        let property = self.descriptor()?;
        let getter = self.accessor(property.getter.as_ref(), "property has no getter")?;
        let value = dispatch(self.target, &getter, Vec::new(), CallConvention::StandardMethod)?;
        let got = value.value_type();
        property.ty.coerce(value).ok_or_else(|| {
            ScriptError::invocation(
                self.target.ty().full_name(),
                &self.name,
                format!("getter returned {}, expected {}", got, property.ty.name()),
            )
        })
    }

    /// Call the setter
    pub fn set(&self, value: Value) -> ScriptResult<()> {
        let property = self.descriptor()?;
        let setter = self.accessor(property.setter.as_ref(), "property has no setter")?;
        dispatch(self.target, &setter, vec![value], CallConvention::StandardMethod).map(|_| ())
    }
}

/// Non-throwing property accessor
#[derive(Debug, Clone)]
pub struct SafePropertyProxy<'a>(PropertyProxy<'a>);

impl<'a> SafePropertyProxy<'a> {
    pub(crate) fn new(inner: PropertyProxy<'a>) -> Self {
        Self(inner)
    }

    /// Getter result
    pub fn get(&self) -> Option<Value> {
        safe(&self.0.target, &self.0.name, self.0.get())
    }

    /// Call the setter; returns whether it succeeded
    pub fn set(&self, value: Value) -> bool {
        safe(&self.0.target, &self.0.name, self.0.set(value)).is_some()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Throwing event accessor
#[derive(Debug, Clone)]
pub struct EventProxy<'a> {
    target: Target<'a>,
    name: String,
}

impl<'a> EventProxy<'a> {
    pub(crate) fn new(target: Target<'a>, name: &str) -> Self {
        Self {
            target,
            name: name.to_string(),
        }
    }

    /// Event name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self) -> ScriptResult<Option<&'a Arc<Instance>>> {
        match self.target {
            Target::Static(ty) => {
                ty.find_event(&self.name, true)?;
            }
            Target::Instance(proxy) => {
                proxy.resolve_event(&self.name)?;
            }
        }
        self.target.instance()
    }

    /// Add a handler
    pub fn subscribe<F>(&self, handler: F) -> ScriptResult<SubscriptionId>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Ok(match self.resolve()? {
            Some(instance) => instance.events().subscribe(&self.name, handler),
            None => self.target.ty().static_events().subscribe(&self.name, handler),
        })
    }

    /// Remove a handler; returns whether it was subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> ScriptResult<bool> {
        Ok(match self.resolve()? {
            Some(instance) => instance.events().unsubscribe(&self.name, id),
            None => self.target.ty().static_events().unsubscribe(&self.name, id),
        })
    }

    /// Invoke every handler; returns how many ran
    pub fn raise(&self, args: &[Value]) -> ScriptResult<usize> {
        Ok(match self.resolve()? {
            Some(instance) => instance.events().raise(&self.name, args),
            None => self.target.ty().static_events().raise(&self.name, args),
        })
    }
}

/// Non-throwing event accessor
#[derive(Debug, Clone)]
pub struct SafeEventProxy<'a>(EventProxy<'a>);

impl<'a> SafeEventProxy<'a> {
    pub(crate) fn new(inner: EventProxy<'a>) -> Self {
        Self(inner)
    }

    /// Add a handler
    pub fn subscribe<F>(&self, handler: F) -> Option<SubscriptionId>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        safe(&self.0.target, &self.0.name, self.0.subscribe(handler))
    }

    /// Remove a handler; a no-op on failure
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        safe(&self.0.target, &self.0.name, self.0.unsubscribe(id)).unwrap_or(false)
    }

    /// Invoke every handler; a no-op on failure
    pub fn raise(&self, args: &[Value]) -> usize {
        safe(&self.0.target, &self.0.name, self.0.raise(args)).unwrap_or(0)
    }
}
