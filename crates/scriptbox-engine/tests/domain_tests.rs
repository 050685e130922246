use scriptbox_engine::{
    all_domains, find_domain, Domain, ScriptError, SecurityMode, Value,
};

fn domain(name: &str) -> Domain {
    Domain::builder(name).with_default_compiler().build().unwrap()
}

const COUNTER: &str = r#"
namespace Game

pub type Counter {
    pub field value: int = 3

    method bump(by: int): int {
        load_field value
        load by
        add
        store_field value
        load_field value
        ret
    }

    static method zero(): int {
        push_int 0
        ret
    }
}
"#;

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_created_domain_is_listed() {
    let domain = domain("lifecycle-listed");
    assert!(find_domain("lifecycle-listed").is_some());
    assert!(all_domains().iter().any(|d| *d == domain));
    assert!(domain.is_default_context());
    assert!(domain.has_compiler());

    domain.dispose();
    assert!(domain.is_disposed());
    assert!(find_domain("lifecycle-listed").is_none());
}

#[test]
fn test_compile_load_and_call() {
    let domain = domain("lifecycle-call");
    let module = domain
        .compile_and_load_source(COUNTER, SecurityMode::UseSettings, &[])
        .unwrap();

    assert!(module.is_registered());
    assert!(module.is_runtime_compiled());
    assert!(module.compiled_at().is_some());
    assert!(module.is_security_verified());

    let counter = domain.find_type("Game.Counter").unwrap();
    assert_eq!(counter.name(), "Counter");
    assert!(domain.find_type("Counter").is_some());
    assert_eq!(counter.call_static("zero", vec![]).unwrap(), Value::Int(0));

    let instance = counter.create_instance(vec![]).unwrap();
    assert_eq!(instance.call("bump", vec![Value::Int(2)]).unwrap(), Value::Int(5));
    assert_eq!(instance.field("value").get().unwrap(), Value::Int(5));
    assert_eq!(domain.instance_count(), 1);
}

#[test]
fn test_compile_failure_is_reported() {
    let domain = domain("lifecycle-failure");
    let err = domain
        .compile_and_load_source("type A {\n method m() {\n jmp nowhere\n }\n}", SecurityMode::EnsureLoad, &[])
        .unwrap_err();
    assert!(matches!(err, ScriptError::CompileFailure(_)));

    let last = domain.last_compile_result().unwrap();
    assert!(!last.success());
    assert!(last.error_count() > 0);
    assert!(domain.modules().is_empty());
}

#[test]
fn test_dispose_invalidates_everything() {
    let domain = domain("lifecycle-dispose");
    let module = domain
        .compile_and_load_source(COUNTER, SecurityMode::EnsureLoad, &[])
        .unwrap();
    let counter = module.find_type("Counter").unwrap();
    let instance = counter.create_instance(vec![]).unwrap();

    domain.dispose();
    domain.dispose();

    assert!(instance.is_disposed());
    assert!(matches!(
        instance.call("bump", vec![Value::Int(1)]),
        Err(ScriptError::Disposed(_))
    ));
    assert!(matches!(module.domain(), Err(ScriptError::DomainDisposed(_))));
    assert!(matches!(
        domain.compile_from_source(COUNTER, &[]),
        Err(ScriptError::DomainDisposed(_))
    ));
    assert!(domain.modules().is_empty());
}

#[test]
fn test_domain_without_compiler() {
    let domain = Domain::builder("lifecycle-no-compiler").build().unwrap();
    assert!(!domain.has_compiler());
    assert!(matches!(
        domain.compile_from_source(COUNTER, &[]),
        Err(ScriptError::NoCompiler(_))
    ));
    domain.dispose();
}

// ============================================================================
// Modules
// ============================================================================

#[test]
fn test_identical_bytes_dedupe() {
    let domain = domain("modules-dedupe");
    let first = domain
        .compile_and_load_source(COUNTER, SecurityMode::EnsureLoad, &[])
        .unwrap();
    let again = domain
        .load_from_bytes(first.image_bytes().to_vec(), None, SecurityMode::EnsureLoad)
        .unwrap();

    assert!(std::sync::Arc::ptr_eq(&first, &again));
    assert_eq!(domain.modules().len(), 1);
    assert!(domain.find_module_by_checksum(&first.checksum()).is_some());
}

#[test]
fn test_overlapping_compiles_yield_two_modules() {
    let domain = domain("modules-overlap");
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let domain = domain.clone();
            std::thread::spawn(move || {
                domain
                    .compile_and_load_source(COUNTER, SecurityMode::UseSettings, &[])
                    .unwrap()
            })
        })
        .collect();
    let modules: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_ne!(modules[0].name(), modules[1].name());
    assert_eq!(domain.modules().len(), 2);
    assert_eq!(domain.find_all_types().len(), 2);
}

#[test]
fn test_sub_type_queries() {
    let domain = domain("modules-subtypes");
    domain
        .compile_and_load_source(
            "namespace Game\npub type Behaviour { }\ninterface IUsable { }\npub type Door : Behaviour, IUsable { }\npub type Lever : Door { }",
            SecurityMode::EnsureLoad,
            &[],
        )
        .unwrap();

    let subs: Vec<_> = domain
        .find_all_sub_types_of("Game.Behaviour")
        .iter()
        .map(|t| t.full_name().to_string())
        .collect();
    assert_eq!(subs, ["Game.Behaviour", "Game.Door", "Game.Lever"]);
    assert!(domain.find_sub_type_of("Game.IUsable").is_some());
    assert!(domain.find_sub_type_of("Game.Missing").is_none());
}
