use scriptbox_engine::{
    replace_in_scene, replace_instance, replace_on_entity, Domain, FieldOutcome, Host,
    InstanceProxy, NativeLibrary, NativeRegistry, ReplaceOptions, SceneHost, SceneId,
    SecurityMode, Value,
};
use std::sync::{Arc, Mutex};

const ORIGINAL: &str = r#"
namespace Game

[replaceable]
pub attached type Enemy {
    pub field a: int = 1
    pub field b: string = "x"
    pub field c: float = 2.0
    nonserialized field d: int = 4
    static field notified: int = 0

    method on_will_replace(next: any) {
        load_static notified
        push_int 1
        add
        store_static notified
        ret_void
    }
}
"#;

const REPLACEMENT: &str = r#"
namespace Game

pub attached type Enemy {
    pub field a: int
    pub field c: double
    field d: int
}
"#;

fn setup(name: &str) -> (Domain, Arc<SceneHost>) {
    let host = Arc::new(SceneHost::new());
    let domain = Domain::builder(name)
        .with_default_compiler()
        .host(host.clone())
        .build()
        .unwrap();
    domain
        .compile_and_load_source(ORIGINAL, SecurityMode::UseSettings, &[])
        .unwrap();
    (domain, host)
}

#[test]
fn test_replace_copies_matching_serialized_state() {
    let (domain, host) = setup("hotswap-copy");
    let old_type = domain.find_type("Game.Enemy").unwrap();
    let entity = host.spawn_entity(SceneId(1));
    let live = old_type.create_instance_on(entity, vec![]).unwrap();
    live.field("a").set(Value::Int(7)).unwrap();

    let module = domain
        .compile_and_load_source(REPLACEMENT, SecurityMode::UseSettings, &[])
        .unwrap();
    let report = replace_instance(&live, &module, ReplaceOptions::default());

    assert!(report.is_success(), "{:?}", report.errors());
    assert_eq!(report.replacements().len(), 1);
    let replacement = &report.replacements()[0];
    assert_eq!(replacement.original_type, "Game.Enemy");
    assert_eq!(replacement.field("a"), Some(FieldOutcome::Copied));
    assert_eq!(replacement.field("b"), Some(FieldOutcome::NoMatchingField));
    assert_eq!(replacement.field("c"), Some(FieldOutcome::IncompatibleType));
    assert_eq!(replacement.field("d"), None);
    assert_eq!(report.warnings().len(), 2);

    let new = &replacement.replacement;
    assert_eq!(new.field("a").get().unwrap(), Value::Int(7));
    assert_eq!(new.entity().unwrap(), Some(entity));
    assert!(!Arc::ptr_eq(new.script_type(), &old_type));

    // The original was notified, then destroyed
    assert_eq!(old_type.static_field("notified").get().unwrap(), Value::Int(1));
    assert!(live.is_disposed());
    assert!(host.is_destroyed(live.component().unwrap()));
    assert_eq!(host.components_on(entity).len(), 1);
}

#[test]
fn test_non_serialized_fields_copy_on_request() {
    let (domain, host) = setup("hotswap-nonserialized");
    let entity = host.spawn_entity(SceneId(1));
    let live = domain
        .find_type("Enemy")
        .unwrap()
        .create_instance_on(entity, vec![])
        .unwrap();
    let module = domain
        .compile_and_load_source(REPLACEMENT, SecurityMode::UseSettings, &[])
        .unwrap();

    let options = ReplaceOptions::COPY_NON_SERIALIZE_FIELDS | ReplaceOptions::DISABLE_ORIGINAL;
    let report = replace_instance(&live, &module, options);

    let replacement = &report.replacements()[0];
    assert_eq!(replacement.field("d"), Some(FieldOutcome::Copied));
    assert_eq!(replacement.replacement.field("d").get().unwrap(), Value::Int(4));

    // Disabled, not destroyed
    assert!(!live.is_disposed());
    assert!(!live.is_enabled().unwrap());
}

#[test]
fn test_type_without_metadata_is_skipped() {
    let (domain, host) = setup("hotswap-metadata");
    let module = domain
        .compile_and_load_source(REPLACEMENT, SecurityMode::UseSettings, &[])
        .unwrap();
    let entity = host.spawn_entity(SceneId(1));
    // The replacement type itself carries no `[replaceable]`
    let live = module.find_type("Enemy").unwrap().create_instance_on(entity, vec![]).unwrap();
    let newer = domain
        .compile_and_load_source(REPLACEMENT, SecurityMode::UseSettings, &[])
        .unwrap();

    let report = replace_instance(&live, &newer, ReplaceOptions::default());
    assert!(report.is_success());
    assert!(report.replacements().is_empty());
    assert!(!live.is_disposed());

    let options = ReplaceOptions::default() | ReplaceOptions::DONT_REQUIRE_ATTRIBUTE;
    let report = replace_instance(&live, &newer, options);
    assert_eq!(report.replacements().len(), 1);
    assert!(live.is_disposed());
}

#[test]
fn test_required_base_and_interfaces_are_enforced() {
    let host = Arc::new(SceneHost::new());
    let domain = Domain::builder("hotswap-requirements")
        .with_default_compiler()
        .host(host.clone())
        .build()
        .unwrap();
    domain
        .compile_and_load_source(
            "namespace Game\npub type Behaviour { }\npub interface IHittable { }\npub interface ISaved { }\n[replaceable(base = \"Behaviour\", interfaces = \"IHittable, ISaved\")]\npub attached type Enemy : Behaviour, IHittable, ISaved { }",
            SecurityMode::UseSettings,
            &[],
        )
        .unwrap();
    let entity = host.spawn_entity(SceneId(3));
    let live = domain
        .find_type("Game.Enemy")
        .unwrap()
        .create_instance_on(entity, vec![])
        .unwrap();

    let bare = domain
        .compile_and_load_source(
            "namespace Game\npub attached type Enemy { }",
            SecurityMode::UseSettings,
            &[],
        )
        .unwrap();
    let report = replace_instance(&live, &bare, ReplaceOptions::default());
    assert_eq!(report.errors().len(), 3);
    assert!(report.replacements().is_empty());
    assert!(!live.is_disposed());

    let fitting = domain
        .compile_and_load_source(
            "namespace Game\npub attached type Enemy : Behaviour, IHittable, ISaved { }",
            SecurityMode::UseSettings,
            &[],
        )
        .unwrap();
    let report = replace_instance(&live, &fitting, ReplaceOptions::default());
    assert!(report.is_success(), "{:?}", report.errors());
    assert_eq!(report.replacements().len(), 1);
}

#[test]
fn test_batch_replacement_skips_disabled() {
    let (domain, host) = setup("hotswap-batch");
    let old_type = domain.find_type("Enemy").unwrap();
    let first = host.spawn_entity(SceneId(7));
    let second = host.spawn_entity(SceneId(7));
    let elsewhere = host.spawn_entity(SceneId(8));

    let a = old_type.create_instance_on(first, vec![]).unwrap();
    let b = old_type.create_instance_on(second, vec![]).unwrap();
    let c = old_type.create_instance_on(elsewhere, vec![]).unwrap();
    b.set_enabled(false).unwrap();

    let module = domain
        .compile_and_load_source(REPLACEMENT, SecurityMode::UseSettings, &[])
        .unwrap();

    let report = replace_in_scene(Some(&domain), SceneId(7), &module, ReplaceOptions::default()).unwrap();
    assert_eq!(report.replacements().len(), 1);
    assert!(a.is_disposed());
    assert!(!b.is_disposed());
    assert!(!c.is_disposed());

    let options = ReplaceOptions::default() | ReplaceOptions::REPLACE_DISABLED;
    let report = replace_on_entity(Some(&domain), second, &module, options).unwrap();
    assert_eq!(report.replacements().len(), 1);
    assert!(b.is_disposed());
    assert!(!c.is_disposed());
}

#[test]
fn test_explicit_matches_use_the_namespace() {
    let (domain, host) = setup("hotswap-explicit");
    let entity = host.spawn_entity(SceneId(1));
    let live = domain
        .find_type("Game.Enemy")
        .unwrap()
        .create_instance_on(entity, vec![])
        .unwrap();
    let elsewhere = domain
        .compile_and_load_source(
            "namespace Other\npub attached type Enemy { }",
            SecurityMode::UseSettings,
            &[],
        )
        .unwrap();

    let strict = ReplaceOptions::default() | ReplaceOptions::REQUIRE_EXPLICIT_TYPE_MATCHES;
    let report = replace_instance(&live, &elsewhere, strict);
    assert!(report.replacements().is_empty());

    let report = replace_instance(&live, &elsewhere, ReplaceOptions::default());
    assert_eq!(report.replacements().len(), 1);
    assert_eq!(
        report.replacements()[0].replacement.type_name(),
        "Other.Enemy"
    );
}

const GUARD: &str = r#"
namespace Game
import hooks Hooks.drop_pending(0)

[replaceable]
pub attached type Guard {
    method on_will_replace(next: any) {
        call_extern Hooks.drop_pending 0
        pop
        ret_void
    }
}
"#;

#[test]
fn test_batch_continues_past_instances_disposed_mid_batch() {
    // Proxies the native disposes the first time any guard is notified
    let pending: Arc<Mutex<Vec<InstanceProxy>>> = Arc::new(Mutex::new(Vec::new()));
    let natives = NativeRegistry::new();
    let mut hooks = NativeLibrary::new("hooks");
    let slot = pending.clone();
    hooks.register("Hooks.drop_pending", 0, move |_| {
        for proxy in slot.lock().unwrap().drain(..) {
            proxy.dispose();
        }
        Ok(Value::Null)
    });
    natives.register_library(hooks);

    let host = Arc::new(SceneHost::new());
    let domain = Domain::builder("hotswap-mid-batch")
        .with_default_compiler()
        .sandboxed(Arc::new(natives))
        .host(host.clone())
        .build()
        .unwrap();
    let guard = domain
        .compile_and_load_main_source(GUARD, SecurityMode::UseSettings, &[])
        .unwrap();

    let first = guard.create_instance_on(host.spawn_entity(SceneId(3)), vec![]).unwrap();
    let second = guard.create_instance_on(host.spawn_entity(SceneId(3)), vec![]).unwrap();
    let third = guard.create_instance_on(host.spawn_entity(SceneId(3)), vec![]).unwrap();
    pending.lock().unwrap().push(second.clone());

    let module = domain
        .compile_and_load_source(
            "namespace Game\npub attached type Guard { }",
            SecurityMode::UseSettings,
            &[],
        )
        .unwrap();
    let report = replace_in_scene(Some(&domain), SceneId(3), &module, ReplaceOptions::default()).unwrap();

    assert_eq!(report.replacements().len(), 2);
    assert_eq!(report.errors().len(), 1);
    assert!(report.errors()[0].contains("Game.Guard"));
    assert!(first.is_disposed());
    assert!(second.is_disposed());
    assert!(third.is_disposed());
    assert_eq!(
        report
            .replacements()
            .iter()
            .filter(|r| r.replacement.type_name() == "Game.Guard")
            .count(),
        2
    );
    // Two replacements are tracked; the disposed proxy is not
    assert_eq!(domain.instance_count(), 2);
}
