use scriptbox_engine::security::{RestrictionList, ViolationKind};
use scriptbox_engine::{
    Domain, EngineSettings, NativeLibrary, NativeRegistry, ScriptError, SecurityMode,
    SecurityPolicy, SecurityReport, Value, Verifier,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingVerifier {
    calls: AtomicUsize,
    reject: AtomicBool,
}

impl CountingVerifier {
    fn new(reject: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reject: AtomicBool::new(reject),
        })
    }

    fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Verifier for CountingVerifier {
    fn verify(&self, _image: &[u8], _symbols: Option<&[u8]>, policy: &SecurityPolicy) -> SecurityReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut report = SecurityReport::new("counted", policy.hash());
        if self.reject.load(Ordering::SeqCst) {
            report.push(ViolationKind::Type, "Anything", "rejected by test");
        }
        report
    }
}

fn natives() -> Arc<NativeRegistry> {
    let registry = NativeRegistry::new();
    let mut host = NativeLibrary::new("host");
    host.register("Engine.Debug.log", 1, |_| Ok(Value::Null));
    host.register("Engine.IO.File.read", 1, |args| Ok(args[0].clone()));
    registry.register_library(host);
    Arc::new(registry)
}

const READS_FILES: &str = r#"
namespace Game
import host Engine.IO.File.read(1)

pub type Loader {
    static method load(path: string): any {
        load path
        call_extern Engine.IO.File.read 1
        ret
    }
}
"#;

const LOGS: &str = r#"
namespace Game
import host Engine.Debug.log(1)

pub type Greeter {
    static method greet() {
        push_str "hello"
        call_extern Engine.Debug.log 1
        pop
        ret_void
    }
}
"#;

fn deny_io() -> EngineSettings {
    EngineSettings {
        security_policy: SecurityPolicy {
            members: RestrictionList::allow_by_default().with_deny("Engine.IO.*"),
            ..SecurityPolicy::default()
        },
        ..EngineSettings::default()
    }
}

#[test]
fn test_policy_rejects_denied_member() {
    let domain = Domain::builder("security-deny")
        .with_default_compiler()
        .settings(deny_io())
        .sandboxed(natives())
        .build()
        .unwrap();

    match domain.compile_and_load_source(READS_FILES, SecurityMode::UseSettings, &[]) {
        Err(ScriptError::SecurityViolation(report)) => {
            assert_eq!(report.violations.len(), 1);
            assert_eq!(report.violations[0].kind, ViolationKind::Member);
            assert_eq!(report.violations[0].target, "Engine.IO.File.read");
        }
        other => panic!("unexpected {:?}", other.map(|m| m.name().to_string())),
    }
    assert!(domain.find_type("Game.Loader").is_none());
    assert!(!domain.last_security_report().unwrap().passed());

    let greeter = domain
        .compile_and_load_source(LOGS, SecurityMode::UseSettings, &[])
        .unwrap();
    assert!(greeter.is_security_verified());
    let ty = greeter.find_type("Greeter").unwrap();
    assert_eq!(ty.call_static("greet", vec![]).unwrap(), Value::Null);
}

#[test]
fn test_ensure_load_skips_the_gate() {
    let domain = Domain::builder("security-skip")
        .with_default_compiler()
        .settings(deny_io())
        .sandboxed(natives())
        .build()
        .unwrap();

    let module = domain
        .compile_and_load_source(READS_FILES, SecurityMode::EnsureLoad, &[])
        .unwrap();
    assert!(!module.is_security_verified());
    let loader = module.find_type("Loader").unwrap();
    assert_eq!(
        loader.call_static("load", vec![Value::str("a.txt")]).unwrap(),
        Value::str("a.txt")
    );
}

#[test]
fn test_use_settings_follows_security_check_code() {
    let verifier = CountingVerifier::new(false);
    let domain = Domain::builder("security-settings")
        .with_default_compiler()
        .verifier(verifier.clone())
        .settings(EngineSettings {
            security_check_code: false,
            ..EngineSettings::default()
        })
        .build()
        .unwrap();

    domain
        .compile_and_load_source("type A { }", SecurityMode::UseSettings, &[])
        .unwrap();
    assert_eq!(verifier.calls(), 0);

    domain
        .compile_and_load_source("type B { }", SecurityMode::EnsureSecurity, &[])
        .unwrap();
    assert_eq!(verifier.calls(), 1);
}

#[test]
fn test_report_is_cached_per_policy() {
    let verifier = CountingVerifier::new(false);
    let domain = Domain::builder("security-cache")
        .with_default_compiler()
        .verifier(verifier.clone())
        .build()
        .unwrap();

    let module = domain
        .compile_and_load_source("type A { }", SecurityMode::EnsureSecurity, &[])
        .unwrap();
    assert_eq!(verifier.calls(), 1);

    let bytes = module.image_bytes().to_vec();
    domain
        .load_from_bytes(bytes.clone(), None, SecurityMode::EnsureSecurity)
        .unwrap();
    assert_eq!(verifier.calls(), 1);

    domain
        .update_settings(|s| s.security_policy.allow_unsafe_interop = true)
        .unwrap();
    domain
        .load_from_bytes(bytes, None, SecurityMode::EnsureSecurity)
        .unwrap();
    assert_eq!(verifier.calls(), 2);
}

#[test]
fn test_rejecting_verifier_blocks_registration() {
    let verifier = CountingVerifier::new(true);
    let domain = Domain::builder("security-reject")
        .with_default_compiler()
        .verifier(verifier.clone())
        .build()
        .unwrap();

    let err = domain
        .compile_and_load_source("type A { }", SecurityMode::EnsureSecurity, &[])
        .unwrap_err();
    assert!(matches!(err, ScriptError::SecurityViolation(_)));
    assert!(domain.modules().is_empty());
    assert!(domain.find_type("A").is_none());
    assert_eq!(verifier.calls(), 1);
}

#[test]
fn test_failed_report_is_not_reused() {
    let verifier = CountingVerifier::new(false);
    let domain = Domain::builder("security-failed-cache")
        .with_default_compiler()
        .verifier(verifier.clone())
        .build()
        .unwrap();

    let module = domain
        .compile_and_load_source("type A { }", SecurityMode::EnsureSecurity, &[])
        .unwrap();
    let bytes = module.image_bytes().to_vec();
    assert_eq!(verifier.calls(), 1);

    // A new policy that the verifier rejects once
    domain
        .update_settings(|s| s.security_policy.allow_unsafe_interop = true)
        .unwrap();
    verifier.set_reject(true);
    let err = domain
        .load_from_bytes(bytes.clone(), None, SecurityMode::EnsureSecurity)
        .unwrap_err();
    assert!(matches!(err, ScriptError::SecurityViolation(_)));
    assert!(!module.is_security_verified());
    assert!(!module.security_report().unwrap().passed());
    assert_eq!(verifier.calls(), 2);

    // Same policy again: verified afresh rather than served from the failure
    verifier.set_reject(false);
    let again = domain
        .load_from_bytes(bytes.clone(), None, SecurityMode::EnsureSecurity)
        .unwrap();
    assert!(Arc::ptr_eq(&again, &module));
    assert!(module.is_security_verified());
    assert_eq!(verifier.calls(), 3);

    // The passing report is cached
    domain
        .load_from_bytes(bytes, None, SecurityMode::EnsureSecurity)
        .unwrap();
    assert_eq!(verifier.calls(), 3);
}
