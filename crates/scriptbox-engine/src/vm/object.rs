//! Live script objects
//!
//! An [`Instance`] is the storage behind one script object: its field slots,
//! its event subscriptions and, for attached types, the host component it
//! lives on. Statics live on the [`ModuleType`] instead.

use crate::reflect::ModuleType;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use scriptbox_sdk::{ComponentId, ObjectRef, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event handler registered by the host
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle returned by a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Subscribers per event name
#[derive(Default)]
pub struct EventTable {
    handlers: Mutex<FxHashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
}

impl std::fmt::Debug for EventTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.lock();
        f.debug_map()
            .entries(handlers.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

impl EventTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler; returns whether it was present
    pub fn unsubscribe(&self, event: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        match handlers.get_mut(event) {
            Some(list) => {
                let before = list.len();
                list.retain(|(sid, _)| *sid != id);
                before != list.len()
            }
            None => false,
        }
    }

    /// Invoke every handler; returns how many ran
    ///
    /// Handlers run outside the lock so they may subscribe or unsubscribe.
    pub fn raise(&self, event: &str, args: &[Value]) -> usize {
        let snapshot: Vec<EventHandler> = match self.handlers.lock().get(event) {
            Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };
        for handler in &snapshot {
            handler(args);
        }
        snapshot.len()
    }

    /// Number of handlers for an event
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.handlers.lock().get(event).map_or(0, Vec::len)
    }
}

/// Storage of one live script object
pub struct Instance {
    ty: Arc<ModuleType>,
    fields: Mutex<Vec<Value>>,
    events: EventTable,
    component: Option<ComponentId>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.ty.full_name())
            .field("component", &self.component)
            .finish()
    }
}

impl Instance {
    /// Allocate an instance with every field at its declared default
    pub fn new(ty: Arc<ModuleType>, component: Option<ComponentId>) -> Arc<Self> {
        let fields = ty.instance_field_defaults();
        Arc::new(Self {
            ty,
            fields: Mutex::new(fields),
            events: EventTable::new(),
            component,
        })
    }

    /// Declaring type
    pub fn ty(&self) -> &Arc<ModuleType> {
        &self.ty
    }

    /// Host component, for attached instances
    pub fn component(&self) -> Option<ComponentId> {
        self.component
    }

    /// Read a field slot
    pub fn get_slot(&self, slot: usize) -> Option<Value> {
        self.fields.lock().get(slot).cloned()
    }

    /// Write a field slot; returns false when the slot does not exist
    pub fn set_slot(&self, slot: usize, value: Value) -> bool {
        match self.fields.lock().get_mut(slot) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Instance event subscriptions
    pub fn events(&self) -> &EventTable {
        &self.events
    }

    /// Wrap as a script value
    pub fn to_value(self: &Arc<Self>) -> Value {
        Value::Object(ObjectRef::new(self.ty.full_name(), self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_event_table_subscribe_raise_unsubscribe() {
        let table = EventTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = table.subscribe(
            "died",
            Arc::new(move |args: &[Value]| {
                h.fetch_add(args.len(), Ordering::SeqCst);
            }),
        );

        assert_eq!(table.raise("died", &[Value::Int(1), Value::Int(2)]), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(table.raise("spawned", &[]), 0);

        assert!(table.unsubscribe("died", id));
        assert!(!table.unsubscribe("died", id));
        assert_eq!(table.subscriber_count("died"), 0);
    }

    #[test]
    fn test_handler_may_subscribe_while_raising() {
        let table = Arc::new(EventTable::new());
        let inner = table.clone();
        table.subscribe(
            "tick",
            Arc::new(move |_: &[Value]| {
                inner.subscribe("tick", Arc::new(|_: &[Value]| {}));
            }),
        );
        assert_eq!(table.raise("tick", &[]), 1);
        assert_eq!(table.subscriber_count("tick"), 2);
    }
}
