use scriptbox_engine::task::OperationState;
use scriptbox_engine::{block_on_poll, Domain, Operation, ScriptError, SecurityMode, Value};

const SOURCE: &str = "namespace Game\npub type Answer {\n static method get(): int {\n push_int 42\n ret\n }\n}";

fn domain(name: &str) -> Domain {
    Domain::builder(name).with_default_compiler().build().unwrap()
}

#[test]
fn test_async_compile_matches_sync() {
    let domain = domain("async-compile");
    let sync = domain.compile_from_source(SOURCE, &[]).unwrap();

    let mut op = domain.compile_from_source_async(SOURCE, Vec::new());
    assert_eq!(op.state(), OperationState::NotStarted);
    block_on_poll(&mut op);

    let result = op.take_result().unwrap().unwrap();
    assert_eq!(result.success(), sync.success());
    assert_eq!(result.diagnostics().len(), sync.diagnostics().len());
    assert!(domain.modules().is_empty());
}

#[test]
fn test_async_compile_and_load() {
    let domain = domain("async-load");
    let mut op = domain.compile_and_load_source_async(SOURCE, SecurityMode::UseSettings, Vec::new());
    while op.poll().is_pending() {
        std::thread::yield_now();
    }

    assert!(op.is_done());
    assert!(op.is_successful());
    assert!(op.is_security_verified());
    let main = op.main_type().unwrap();
    assert_eq!(main.full_name(), "Game.Answer");
    assert_eq!(main.call_static("get", vec![]).unwrap(), Value::Int(42));
    assert!(op.compile_result().unwrap().success());
    assert_eq!(domain.modules().len(), 1);
}

#[test]
fn test_async_failure_is_reported() {
    let domain = domain("async-failure");
    let mut op = domain.compile_and_load_source_async("type {", SecurityMode::UseSettings, Vec::new());
    block_on_poll(&mut op);

    assert!(op.is_done());
    assert!(!op.is_successful());
    assert!(matches!(op.error(), Some(ScriptError::CompileFailure(_))));
    assert!(op.module().is_none());
    assert!(!op.compile_result().unwrap().success());
}

#[test]
fn test_async_load_from_bytes() {
    let source = domain("async-bytes-source");
    let compiled = source.compile_from_source(SOURCE, &[]).unwrap();
    let image = compiled.image_bytes().unwrap().to_vec();

    let target = domain("async-bytes-target");
    let mut op = target.load_from_bytes_async(image, None, SecurityMode::EnsureSecurity);
    block_on_poll(&mut op);
    assert!(op.is_successful());
    assert_eq!(op.domain(), &target);
    assert!(target.find_type("Game.Answer").is_some());
}

#[test]
fn test_dispose_before_finish_fails_the_operation() {
    let domain = domain("async-disposed");
    domain.dispose();
    let mut op = domain.compile_and_load_source_async(SOURCE, SecurityMode::UseSettings, Vec::new());
    block_on_poll(&mut op);
    assert!(matches!(op.error(), Some(ScriptError::DomainDisposed(_))));
}
