use scriptbox_engine::error::MemberKind;
use scriptbox_engine::{
    CallConvention, Domain, EntityId, SceneHost, SceneId, ScriptError, SecurityMode, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const ENEMY: &str = r#"
namespace Game

pub attached type Enemy {
    pub field health: int = 10
    field armor: int = 2
    property hp: int get get_hp set set_hp
    event died
    static event spawned
    static field count: int

    method get_hp(): int {
        load_field health
        ret
    }

    method set_hp(value: int) {
        load value
        store_field health
        ret_void
    }

    method damage(amount: int) {
        load_field health
        load amount
        sub
        store_field health
        load_field health
        push_int 0
        gt
        jmp_if alive
        raise died 0
    alive:
        ret_void
    }

    sequence method patrol(): int {
        push_int 1
        yield
        push_int 2
        yield
        push_int 3
        ret
    }
}

pub type Plain {
    method fail() {
        push_str "boom"
        throw
    }
}
"#;

fn setup(name: &str) -> (Domain, Arc<SceneHost>, EntityId) {
    let host = Arc::new(SceneHost::new());
    let domain = Domain::builder(name)
        .with_default_compiler()
        .host(host.clone())
        .build()
        .unwrap();
    domain
        .compile_and_load_source(ENEMY, SecurityMode::UseSettings, &[])
        .unwrap();
    let entity = host.spawn_entity(SceneId(1));
    (domain, host, entity)
}

// ============================================================================
// Attached instances
// ============================================================================

#[test]
fn test_attached_instance_lives_on_entity() {
    let (domain, host, entity) = setup("reflect-attached");
    let enemy = domain.find_type("Game.Enemy").unwrap();

    assert!(enemy.create_instance(vec![]).is_err());
    let instance = enemy.create_instance_on(entity, vec![]).unwrap();

    assert!(instance.is_attached());
    assert_eq!(instance.entity().unwrap(), Some(entity));
    assert_eq!(instance.scene().unwrap(), Some(SceneId(1)));
    assert_eq!(host.components_on(entity).len(), 1);

    host.destroy_entity(entity);
    assert!(!instance.is_alive());
    assert_eq!(domain.instance_count(), 0);
    assert!(instance.is_disposed());
}

#[test]
fn test_fields_properties_and_calls() {
    let (domain, _host, entity) = setup("reflect-members");
    let enemy = domain.find_type("Enemy").unwrap();
    let instance = enemy.create_instance_on(entity, vec![]).unwrap();

    assert_eq!(instance.property("hp").get().unwrap(), Value::Int(10));
    instance.property("hp").set(Value::Int(4)).unwrap();
    assert_eq!(instance.field("health").get().unwrap(), Value::Int(4));

    instance.call("damage", vec![Value::Int(1)]).unwrap();
    assert_eq!(instance.field("health").get().unwrap(), Value::Int(3));

    // Stores coerce or fail by declared type
    assert!(instance.field("health").set(Value::str("many")).is_err());
    assert!(!instance.safe_field("health").set(Value::str("many")));
    assert_eq!(instance.safe_field("armor").get(), Some(Value::Int(2)));
    assert_eq!(instance.safe_field("missing").get(), None);

    match instance.field("missing").get() {
        Err(ScriptError::MemberNotFound { kind, .. }) => assert_eq!(kind, MemberKind::Field),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(instance.safe_call("nothing", vec![]), None);
}

#[test]
fn test_member_lookups_are_cached_with_staticness() {
    let (domain, _host, _entity) = setup("reflect-cache");
    let enemy = domain.find_type("Enemy").unwrap();

    assert_eq!(enemy.cached_member(MemberKind::Field, "health"), None);
    assert!(enemy.field("health", false).is_some());
    assert!(enemy.field("nope", false).is_none());
    assert_eq!(enemy.cached_member(MemberKind::Field, "health"), Some(false));
    assert_eq!(enemy.cached_member(MemberKind::Field, "nope"), None);

    assert!(enemy.field("count", true).is_some());
    assert_eq!(enemy.cached_member(MemberKind::Field, "count"), Some(true));
    assert!(enemy.field("count", false).is_none());
}

#[test]
fn test_events_fire_handlers() {
    let (domain, _host, entity) = setup("reflect-events");
    let enemy = domain.find_type("Enemy").unwrap();
    let instance = enemy.create_instance_on(entity, vec![]).unwrap();

    let deaths = Arc::new(AtomicUsize::new(0));
    let counter = deaths.clone();
    let id = instance
        .event("died")
        .subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    instance.call("damage", vec![Value::Int(3)]).unwrap();
    assert_eq!(deaths.load(Ordering::SeqCst), 0);
    instance.call("damage", vec![Value::Int(30)]).unwrap();
    assert_eq!(deaths.load(Ordering::SeqCst), 1);

    assert!(instance.event("died").unsubscribe(id).unwrap());
    assert_eq!(instance.event("died").raise(&[]).unwrap(), 0);
    assert_eq!(enemy.static_event("spawned").raise(&[]).unwrap(), 0);
}

#[test]
fn test_sequences_run_on_the_host() {
    let (domain, host, entity) = setup("reflect-sequence");
    let enemy = domain.find_type("Enemy").unwrap();
    let instance = enemy.create_instance_on(entity, vec![]).unwrap();

    let handle = instance.call("patrol", vec![]).unwrap();
    assert!(matches!(handle, Value::Sequence(_)));
    assert_eq!(host.running_sequences(), 1);
    host.run_until_idle(10);
    assert_eq!(host.running_sequences(), 0);

    // The standard convention hands the sequence back without starting it
    let value = instance
        .call_with("patrol", vec![], CallConvention::StandardMethod)
        .unwrap();
    assert_eq!(host.running_sequences(), 0);
    match value {
        Value::Sequence(sequence) => assert_eq!(sequence.run_to_completion(), Ok(Value::Int(3))),
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================================
// Plain instances and disposal
// ============================================================================

#[test]
fn test_throw_becomes_invocation_failure() {
    let (domain, _host, _entity) = setup("reflect-throw");
    let plain = domain.find_type("Game.Plain").unwrap();
    let instance = plain.create_instance(vec![]).unwrap();

    match instance.call("fail", vec![]) {
        Err(ScriptError::InvocationFailure { member, message, .. }) => {
            assert_eq!(member, "fail");
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_disposed_proxy_rejects_access() {
    let (domain, _host, _entity) = setup("reflect-dispose");
    let plain = domain.find_type("Plain").unwrap();
    let instance = plain.create_instance(vec![]).unwrap();
    assert_eq!(domain.instance_count(), 1);

    instance.dispose();
    instance.dispose();
    assert_eq!(domain.instance_count(), 0);
    assert!(matches!(instance.to_value(), Err(ScriptError::Disposed(_))));
    assert!(matches!(instance.call("fail", vec![]), Err(ScriptError::Disposed(_))));
    assert_eq!(instance.safe_call("fail", vec![]), None);
}

const SHARED_NAMES: &str = r#"
namespace Game

pub type Counter {
    field tally: int = 5
    static field tally: int = 9

    method describe(): int {
        push_int 2
        ret
    }

    static method describe(): int {
        push_int 1
        ret
    }
}
"#;

#[test]
fn test_static_and_instance_members_share_a_name() {
    let (domain, _host, _entity) = setup("reflect-shared-names");
    domain
        .compile_and_load_source(SHARED_NAMES, SecurityMode::UseSettings, &[])
        .unwrap();
    let counter = domain.find_type("Game.Counter").unwrap();
    let instance = counter.create_instance(vec![]).unwrap();

    // Instance first, then static, then instance again
    let method = counter.find_method("describe", false).unwrap();
    assert!(!method.is_static);
    let method = counter.find_method("describe", true).unwrap();
    assert!(method.is_static);
    let method = counter.find_method("describe", false).unwrap();
    assert!(!method.is_static);
    assert_eq!(counter.cached_member(MemberKind::Method, "describe"), Some(false));

    assert_eq!(instance.call("describe", vec![]).unwrap(), Value::Int(2));
    assert_eq!(counter.call_static("describe", vec![]).unwrap(), Value::Int(1));
    assert_eq!(instance.call("describe", vec![]).unwrap(), Value::Int(2));

    let field = counter.find_field("tally", false).unwrap();
    assert!(!field.is_static);
    let field = counter.find_field("tally", true).unwrap();
    assert!(field.is_static);
    let field = counter.find_field("tally", false).unwrap();
    assert!(!field.is_static);

    assert_eq!(instance.field("tally").get().unwrap(), Value::Int(5));
    assert_eq!(counter.static_field("tally").get().unwrap(), Value::Int(9));
    assert_eq!(instance.field("tally").get().unwrap(), Value::Int(5));

    instance.field("tally").set(Value::Int(6)).unwrap();
    assert_eq!(counter.static_field("tally").get().unwrap(), Value::Int(9));
    assert_eq!(instance.field("tally").get().unwrap(), Value::Int(6));
}

#[test]
fn test_instance_accessors_resolve_once_per_proxy() {
    let (domain, _host, entity) = setup("reflect-accessors");
    let enemy = domain.find_type("Game.Enemy").unwrap();
    let instance = enemy.create_instance_on(entity, vec![]).unwrap();

    assert!(!instance.accessor_cached(MemberKind::Field, "health"));
    assert!(!instance.accessor_cached(MemberKind::Property, "hp"));
    assert!(!instance.accessor_cached(MemberKind::Event, "died"));

    assert_eq!(instance.field("health").get().unwrap(), Value::Int(10));
    assert_eq!(instance.property("hp").get().unwrap(), Value::Int(10));
    instance.event("died").subscribe(|_| {}).unwrap();
    assert!(instance.field("missing").get().is_err());

    // Clones share the handle and its resolved members
    let other = instance.clone();
    assert!(other.accessor_cached(MemberKind::Field, "health"));
    assert!(other.accessor_cached(MemberKind::Property, "hp"));
    assert!(other.accessor_cached(MemberKind::Event, "died"));
    assert!(!other.accessor_cached(MemberKind::Field, "missing"));
    assert!(!other.accessor_cached(MemberKind::Method, "damage"));

    // Static members never land in the proxy's table
    assert!(!instance.accessor_cached(MemberKind::Field, "count"));

    instance.dispose();
    assert!(matches!(instance.field("health").get(), Err(ScriptError::Disposed(_))));
    assert!(matches!(instance.property("hp").get(), Err(ScriptError::Disposed(_))));
    assert!(matches!(
        instance.event("died").subscribe(|_| {}),
        Err(ScriptError::Disposed(_))
    ));
}
