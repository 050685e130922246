use scriptbox_engine::pipeline::{
    FileReference, LoadedModuleReference, ModuleOutput, ModuleProcessor, ProcessorError,
    ReferenceProvider,
};
use scriptbox_engine::{Domain, EngineSettings, NativeRegistry, ScriptError, SecurityMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn domain_with(name: &str, settings: EngineSettings) -> Domain {
    Domain::builder(name)
        .with_default_compiler()
        .settings(settings)
        .sandboxed(Arc::new(NativeRegistry::new()))
        .build()
        .unwrap()
}

fn domain(name: &str) -> Domain {
    domain_with(name, EngineSettings::default())
}

const BEHAVIOUR: &str = "namespace Game\npub type Behaviour {\n pub field id: int = 1\n}";

// ============================================================================
// Output
// ============================================================================

#[test]
fn test_on_disk_output_round_trips_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let settings = EngineSettings {
        generate_in_memory: false,
        generate_symbols: true,
        output_directory: dir.path().to_path_buf(),
        output_name: Some("game".to_string()),
        ..EngineSettings::default()
    };
    let compiling = domain_with("pipeline-disk", settings);
    let module = compiling
        .compile_and_load_source(BEHAVIOUR, SecurityMode::UseSettings, &[])
        .unwrap();

    let image_path = dir.path().join("game.sbx");
    assert_eq!(module.name(), "game");
    assert_eq!(module.image_path(), Some(image_path.as_path()));
    assert!(dir.path().join("game.sbsym").is_file());
    assert!(module.symbols().unwrap().is_some());

    let loading = domain("pipeline-disk-load");
    let loaded = loading
        .load_module_from_file(&image_path, SecurityMode::EnsureSecurity)
        .unwrap();
    assert_eq!(loaded.checksum(), module.checksum());
    assert!(loaded.symbol_bytes().is_some());
    assert!(loaded.compile_result().is_none());
    assert!(loading.find_type("Game.Behaviour").is_some());
}

#[test]
fn test_in_memory_output_has_no_paths() {
    let domain = domain("pipeline-memory");
    let result = domain.compile_from_source(BEHAVIOUR, &[]).unwrap();
    assert!(result.success());
    assert!(result.image_bytes().is_some());
    assert!(result.image_path().is_none());
    // Compiling alone registers nothing
    assert!(domain.modules().is_empty());
}

#[test]
fn test_directory_compiles_into_one_module() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.sbs"), BEHAVIOUR).unwrap();
    std::fs::create_dir(dir.path().join("more")).unwrap();
    std::fs::write(
        dir.path().join("more").join("b.sbs"),
        "namespace Game\npub type Door : Behaviour { }",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let domain = domain("pipeline-directory");
    let module = domain
        .compile_and_load_directory(dir.path(), SecurityMode::UseSettings, &[])
        .unwrap();
    let names: Vec<_> = module.types().iter().map(|t| t.full_name().to_string()).collect();
    assert_eq!(names, ["Game.Behaviour", "Game.Door"]);

    let empty = tempfile::tempdir().unwrap();
    assert!(matches!(
        domain.compile_and_load_directory(empty.path(), SecurityMode::UseSettings, &[]),
        Err(ScriptError::InvalidArgument(_))
    ));
}

// ============================================================================
// References
// ============================================================================

#[test]
fn test_loaded_module_reference_across_domains() {
    let library = domain("pipeline-ref-library");
    let base = library
        .compile_and_load_source(BEHAVIOUR, SecurityMode::EnsureLoad, &[])
        .unwrap();

    let client = domain("pipeline-ref-client");
    let source = "namespace Game\npub type Door : Behaviour { }";
    let without = client.compile_from_source(source, &[]).unwrap();
    assert!(!without.success());

    let reference = LoadedModuleReference(base);
    let with = client.compile_from_source(source, &[&reference]).unwrap();
    assert!(with.success(), "{:?}", with.diagnostics());
}

#[test]
fn test_unresolvable_reference_fails_compile() {
    let domain = domain("pipeline-ref-missing");
    let missing = FileReference("/definitely/not/here.sbx".into());
    let providers: [&dyn ReferenceProvider; 1] = [&missing];
    match domain.compile_from_source(BEHAVIOUR, &providers) {
        Err(ScriptError::ReferenceResolutionFailure(errors)) => assert_eq!(errors.len(), 1),
        other => panic!("unexpected {:?}", other.map(|r| r.success())),
    }
}

// ============================================================================
// Processors
// ============================================================================

struct Restamp(AtomicUsize);

impl ModuleProcessor for Restamp {
    fn name(&self) -> &str {
        "restamp"
    }

    fn process(&self, output: &mut ModuleOutput) -> Result<(), ProcessorError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        let image = output.image().map(<[u8]>::to_vec).ok_or("no image")?;
        output.patch_image(image);
        Ok(())
    }
}

struct Broken;

impl ModuleProcessor for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn process(&self, _output: &mut ModuleOutput) -> Result<(), ProcessorError> {
        Err("cannot process".into())
    }
}

#[test]
fn test_processors_run_on_success_only() {
    let domain = domain("pipeline-processors");
    let restamp = Arc::new(Restamp(AtomicUsize::new(0)));
    let as_processor: Arc<dyn ModuleProcessor> = restamp.clone();
    domain.add_processor(as_processor.clone()).unwrap();
    domain.add_processor(as_processor.clone()).unwrap();
    domain.add_processor(Arc::new(Broken)).unwrap();

    let result = domain.compile_from_source(BEHAVIOUR, &[]).unwrap();
    assert!(result.success());
    assert!(result.is_patched());
    assert_eq!(restamp.0.load(Ordering::SeqCst), 1);

    let failed = domain.compile_from_source("type {", &[]).unwrap();
    assert!(!failed.success());
    assert_eq!(restamp.0.load(Ordering::SeqCst), 1);

    assert!(domain.remove_processor(&as_processor));
    assert!(!domain.remove_processor(&as_processor));
}

struct Panicking;

impl ModuleProcessor for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn process(&self, _output: &mut ModuleOutput) -> Result<(), ProcessorError> {
        panic!("processor bug")
    }
}

#[test]
fn test_panicking_processor_does_not_abort_the_compile() {
    let domain = domain("pipeline-panicking-processor");
    let restamp = Arc::new(Restamp(AtomicUsize::new(0)));
    domain.add_processor(Arc::new(Panicking)).unwrap();
    domain.add_processor(restamp.clone()).unwrap();

    let module = domain
        .compile_and_load_source(BEHAVIOUR, SecurityMode::UseSettings, &[])
        .unwrap();
    assert!(module.find_type("Game.Behaviour").is_some());
    assert_eq!(restamp.0.load(Ordering::SeqCst), 1);
}

#[test]
fn test_release_profile_unwinds() {
    // Panic capture in processors and background jobs needs unwinding
    let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../Cargo.toml");
    let text = std::fs::read_to_string(manifest).unwrap();
    let workspace: toml::Value = toml::from_str(&text).unwrap();
    let panic = workspace
        .get("profile")
        .and_then(|p| p.get("release"))
        .and_then(|r| r.get("panic"))
        .and_then(|p| p.as_str())
        .unwrap_or("unwind");
    assert_eq!(panic, "unwind");
}
