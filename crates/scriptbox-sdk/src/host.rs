//! Host entity lifecycle contract
//!
//! Some script types ("attached" types) only live on a host-managed entity,
//! the way a component lives on a game object. The engine never owns those
//! entities; it asks the host through this trait.

use std::fmt;

use crate::error::HostError;
use crate::sequence::SequenceHandle;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Host entity identifier
    EntityId,
    "entity"
);
id_type!(
    /// Host scene identifier
    SceneId,
    "scene"
);
id_type!(
    /// Identifier of one script component attached to an entity
    ComponentId,
    "component"
);

/// Services the host provides to attached script instances
pub trait Host: Send + Sync {
    /// Attach a new component of the given script type to an entity
    fn attach(&self, entity: EntityId, type_name: &str) -> Result<ComponentId, HostError>;

    /// Entity that owns a component
    fn entity_of(&self, component: ComponentId) -> Option<EntityId>;

    /// Scene that contains an entity
    fn scene_of(&self, entity: EntityId) -> Option<SceneId>;

    /// Whether the component (or its entity) has been destroyed
    fn is_destroyed(&self, component: ComponentId) -> bool;

    /// Whether the component is enabled
    fn is_enabled(&self, component: ComponentId) -> bool;

    /// Enable or disable a component
    fn set_enabled(&self, component: ComponentId, enabled: bool);

    /// Destroy a component
    fn destroy(&self, component: ComponentId);

    /// Drive a sequence to completion on the host's schedule
    fn start_sequence(
        &self,
        component: ComponentId,
        sequence: SequenceHandle,
    ) -> Result<(), HostError>;
}
