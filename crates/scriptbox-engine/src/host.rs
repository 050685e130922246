//! In-memory host
//!
//! [`SceneHost`] keeps entities, their scenes and attached components in a
//! table. It is the default host for domains built without one, and the CLI
//! and tests drive it with [`SceneHost::tick`] in place of a frame loop.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use scriptbox_sdk::{
    ComponentId, EntityId, Host, HostError, SceneId, SequenceHandle, SequenceStep,
};
use tracing::{trace, warn};

#[derive(Debug)]
struct Entity {
    scene: SceneId,
    alive: bool,
}

#[derive(Debug)]
struct Component {
    entity: EntityId,
    type_name: String,
    enabled: bool,
    destroyed: bool,
}

#[derive(Debug)]
struct Running {
    component: ComponentId,
    handle: SequenceHandle,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    entities: FxHashMap<EntityId, Entity>,
    components: FxHashMap<ComponentId, Component>,
    sequences: Vec<Running>,
}

impl Tables {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn component_live(&self, component: ComponentId) -> bool {
        self.components.get(&component).map_or(false, |c| {
            !c.destroyed && self.entities.get(&c.entity).map_or(false, |e| e.alive)
        })
    }
}

/// Entity table with scenes and components
#[derive(Debug, Default)]
pub struct SceneHost {
    tables: Mutex<Tables>,
}

impl SceneHost {
    /// Empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity in `scene`
    pub fn spawn_entity(&self, scene: SceneId) -> EntityId {
        let mut tables = self.tables.lock();
        let id = EntityId(tables.next());
        tables.entities.insert(id, Entity { scene, alive: true });
        trace!(entity = %id, scene = %scene, "spawned entity");
        id
    }

    /// Destroy an entity and every component on it
    pub fn destroy_entity(&self, entity: EntityId) {
        let mut tables = self.tables.lock();
        if let Some(e) = tables.entities.get_mut(&entity) {
            e.alive = false;
        }
        for component in tables.components.values_mut() {
            if component.entity == entity {
                component.destroyed = true;
            }
        }
    }

    /// Move an entity to another scene
    pub fn move_entity(&self, entity: EntityId, scene: SceneId) -> Result<(), HostError> {
        let mut tables = self.tables.lock();
        match tables.entities.get_mut(&entity) {
            Some(e) if e.alive => {
                e.scene = scene;
                Ok(())
            }
            _ => Err(HostError::EntityNotFound(entity)),
        }
    }

    /// Live components on an entity with their type names
    pub fn components_on(&self, entity: EntityId) -> Vec<(ComponentId, String)> {
        let tables = self.tables.lock();
        let mut found: Vec<_> = tables
            .components
            .iter()
            .filter(|(id, c)| c.entity == entity && tables.component_live(**id))
            .map(|(id, c)| (*id, c.type_name.clone()))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found
    }

    /// Number of sequences still running
    pub fn running_sequences(&self) -> usize {
        self.tables.lock().sequences.len()
    }

    /// Resume every running sequence once
    ///
    /// Sequences whose component was destroyed or disabled are dropped or
    /// skipped respectively; finished and faulted ones are dropped. Returns
    /// the number of sequences resumed.
    pub fn tick(&self) -> usize {
        let batch = {
            let mut tables = self.tables.lock();
            let running = std::mem::take(&mut tables.sequences);
            let (live, dead): (Vec<_>, Vec<_>) = running
                .into_iter()
                .partition(|r| tables.component_live(r.component));
            if !dead.is_empty() {
                trace!(dropped = dead.len(), "dropped sequences of destroyed components");
            }
            live.into_iter()
                .map(|r| {
                    let enabled = tables
                        .components
                        .get(&r.component)
                        .map_or(false, |c| c.enabled);
                    (r, enabled)
                })
                .collect::<Vec<_>>()
        };

        // Resume outside the lock; a sequence may call back into the host.
        let mut resumed = 0;
        let mut keep = Vec::with_capacity(batch.len());
        for (running, enabled) in batch {
            if !enabled {
                keep.push(running);
                continue;
            }
            resumed += 1;
            match running.handle.resume() {
                Ok(SequenceStep::Yielded(_)) if !running.handle.is_finished() => keep.push(running),
                Ok(_) => {}
                Err(e) => warn!(component = %running.component, error = %e, "sequence faulted"),
            }
        }

        let mut tables = self.tables.lock();
        keep.append(&mut tables.sequences);
        tables.sequences = keep;
        resumed
    }

    /// Tick until no sequence is running or `max_ticks` is reached
    pub fn run_until_idle(&self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && self.running_sequences() > 0 {
            self.tick();
            ticks += 1;
        }
        ticks
    }
}

impl Host for SceneHost {
    fn attach(&self, entity: EntityId, type_name: &str) -> Result<ComponentId, HostError> {
        let mut tables = self.tables.lock();
        if !tables.entities.get(&entity).map_or(false, |e| e.alive) {
            return Err(HostError::EntityNotFound(entity));
        }
        let id = ComponentId(tables.next());
        tables.components.insert(
            id,
            Component {
                entity,
                type_name: type_name.to_string(),
                enabled: true,
                destroyed: false,
            },
        );
        trace!(component = %id, entity = %entity, type_name, "attached component");
        Ok(id)
    }

    fn entity_of(&self, component: ComponentId) -> Option<EntityId> {
        self.tables.lock().components.get(&component).map(|c| c.entity)
    }

    fn scene_of(&self, entity: EntityId) -> Option<SceneId> {
        self.tables
            .lock()
            .entities
            .get(&entity)
            .filter(|e| e.alive)
            .map(|e| e.scene)
    }

    fn is_destroyed(&self, component: ComponentId) -> bool {
        !self.tables.lock().component_live(component)
    }

    fn is_enabled(&self, component: ComponentId) -> bool {
        let tables = self.tables.lock();
        tables.component_live(component)
            && tables.components.get(&component).map_or(false, |c| c.enabled)
    }

    fn set_enabled(&self, component: ComponentId, enabled: bool) {
        if let Some(c) = self.tables.lock().components.get_mut(&component) {
            c.enabled = enabled;
        }
    }

    fn destroy(&self, component: ComponentId) {
        if let Some(c) = self.tables.lock().components.get_mut(&component) {
            c.destroyed = true;
        }
    }

    fn start_sequence(
        &self,
        component: ComponentId,
        sequence: SequenceHandle,
    ) -> Result<(), HostError> {
        let mut tables = self.tables.lock();
        if !tables.component_live(component) {
            return Err(HostError::ComponentDestroyed(component));
        }
        tables.sequences.push(Running {
            component,
            handle: sequence,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_sdk::{NativeError, Sequence, Value};

    struct Steps(u32);

    impl Sequence for Steps {
        fn resume(&mut self) -> Result<SequenceStep, NativeError> {
            self.0 = self.0.saturating_sub(1);
            if self.0 == 0 {
                Ok(SequenceStep::Complete(Value::Null))
            } else {
                Ok(SequenceStep::Yielded(Value::Int(self.0 as i64)))
            }
        }

        fn is_finished(&self) -> bool {
            self.0 == 0
        }
    }

    #[test]
    fn test_entity_lifecycle() {
        let host = SceneHost::new();
        let entity = host.spawn_entity(SceneId(1));
        let component = host.attach(entity, "Player").unwrap();

        assert_eq!(host.entity_of(component), Some(entity));
        assert_eq!(host.scene_of(entity), Some(SceneId(1)));
        assert!(host.is_enabled(component));

        host.set_enabled(component, false);
        assert!(!host.is_enabled(component));
        assert!(!host.is_destroyed(component));

        host.destroy_entity(entity);
        assert!(host.is_destroyed(component));
        assert_eq!(host.scene_of(entity), None);
        assert!(host.attach(entity, "Player").is_err());
    }

    #[test]
    fn test_tick_drives_sequences() {
        let host = SceneHost::new();
        let entity = host.spawn_entity(SceneId(0));
        let component = host.attach(entity, "Mover").unwrap();
        host.start_sequence(component, SequenceHandle::new(Box::new(Steps(3))))
            .unwrap();

        assert_eq!(host.tick(), 1);
        assert_eq!(host.running_sequences(), 1);
        assert_eq!(host.run_until_idle(10), 2);
        assert_eq!(host.running_sequences(), 0);
    }

    #[test]
    fn test_disabled_component_pauses_sequence() {
        let host = SceneHost::new();
        let entity = host.spawn_entity(SceneId(0));
        let component = host.attach(entity, "Mover").unwrap();
        host.start_sequence(component, SequenceHandle::new(Box::new(Steps(2))))
            .unwrap();

        host.set_enabled(component, false);
        assert_eq!(host.tick(), 0);
        assert_eq!(host.running_sequences(), 1);

        host.destroy(component);
        host.tick();
        assert_eq!(host.running_sequences(), 0);
    }
}
