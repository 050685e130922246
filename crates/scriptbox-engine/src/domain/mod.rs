//! Module domains
//!
//! A [`Domain`] is an isolated registry of loaded modules and the live
//! instances created from them. It owns an optional compiler service, the
//! natives scripts link against, the host, a settings snapshot and the
//! outcome of the last compile and security check.
//!
//! Domains live in a process-wide list. At most one is active; the active
//! domain is a default for APIs that take an optional explicit domain and
//! only changes through [`Domain::make_active`].
//!
//! # Locking
//!
//! Two locks guard a domain:
//! - the pipeline lock, held for a whole compile/load/register call so that
//!   overlapping pipeline calls serialize
//! - the state lock, held briefly for every read or write of the module
//!   list, the execution registry, the compiler and the last results
//!
//! Script code never runs while the state lock is held.

mod execution;
mod module;

pub use module::{Module, ModuleSource};

use crate::compiler::{AssemblerCompiler, CompilerService};
use crate::error::{ScriptError, ScriptResult};
use crate::host::SceneHost;
use crate::natives::NativeRegistry;
use crate::pipeline::{CompileResult, ModuleProcessor};
use crate::reflect::{InstanceProxy, ModuleType, ProxyId};
use crate::security::{PolicyVerifier, SecurityMode, SecurityReport, Verifier};
use crate::settings::EngineSettings;
use crate::vm::{ExecContext, Instance};
use execution::ExecutionRegistry;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard, RwLock};
use scriptbox_sdk::{Host, SceneId, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Receives every failure a broadcast swallows
pub type BroadcastErrorSink = Arc<dyn Fn(&str, &ScriptError) + Send + Sync>;

static NEXT_DOMAIN: AtomicU64 = AtomicU64::new(1);
static DOMAINS: Lazy<RwLock<Vec<Domain>>> = Lazy::new(|| RwLock::new(Vec::new()));
static ACTIVE: Lazy<RwLock<Option<Domain>>> = Lazy::new(|| RwLock::new(None));

#[derive(Default)]
pub(crate) struct DomainState {
    pub(crate) compiler: Option<Arc<dyn CompilerService>>,
    pub(crate) processors: Vec<Arc<dyn ModuleProcessor>>,
    modules: Vec<Arc<Module>>,
    execution: ExecutionRegistry,
    last_compile: Option<CompileResult>,
    last_security: Option<SecurityReport>,
}

pub(crate) struct DomainInner {
    id: u64,
    name: String,
    is_default_context: bool,
    host: Arc<dyn Host>,
    natives: Arc<NativeRegistry>,
    verifier: Arc<dyn Verifier>,
    disposed: AtomicBool,
    settings: RwLock<EngineSettings>,
    pipeline: Mutex<()>,
    state: Mutex<DomainState>,
    error_sink: RwLock<Option<BroadcastErrorSink>>,
}

/// Handle to a module domain; clones share the domain
#[derive(Clone)]
pub struct Domain(Arc<DomainInner>);

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Domain {}

/// Builder for [`Domain`]
pub struct DomainBuilder {
    name: String,
    host: Option<Arc<dyn Host>>,
    settings: EngineSettings,
    compiler: Option<Arc<dyn CompilerService>>,
    verifier: Arc<dyn Verifier>,
    natives: Option<Arc<NativeRegistry>>,
    make_active: bool,
}

impl DomainBuilder {
    /// Start a builder; no compiler, default settings, shared natives
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
            settings: EngineSettings::default(),
            compiler: None,
            verifier: Arc::new(PolicyVerifier::new()),
            natives: None,
            make_active: false,
        }
    }

    /// Host the domain's attached instances live in (default: a fresh [`SceneHost`])
    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    /// Settings snapshot
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Compiler service
    pub fn compiler(mut self, compiler: Arc<dyn CompilerService>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Use the built-in assembler
    pub fn with_default_compiler(self) -> Self {
        self.compiler(Arc::new(AssemblerCompiler::new()))
    }

    /// Verification engine for the security gate
    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Give the domain its own native registry, torn down on dispose
    pub fn sandboxed(mut self, natives: Arc<NativeRegistry>) -> Self {
        self.natives = Some(natives);
        self
    }

    /// Make the domain active once built
    pub fn make_active(mut self, yes: bool) -> Self {
        self.make_active = yes;
        self
    }

    /// Create the domain and add it to the process-wide list
    pub fn build(self) -> ScriptResult<Domain> {
        self.settings.validate()?;
        let is_default_context = self.natives.is_none();
        let inner = DomainInner {
            id: NEXT_DOMAIN.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            is_default_context,
            host: self.host.unwrap_or_else(|| Arc::new(SceneHost::new())),
            natives: self.natives.unwrap_or_else(NativeRegistry::shared),
            verifier: self.verifier,
            disposed: AtomicBool::new(false),
            settings: RwLock::new(self.settings),
            pipeline: Mutex::new(()),
            state: Mutex::new(DomainState {
                compiler: self.compiler,
                ..DomainState::default()
            }),
            error_sink: RwLock::new(None),
        };
        let domain = Domain(Arc::new(inner));
        DOMAINS.write().push(domain.clone());
        info!(
            domain = %domain.0.name,
            id = domain.0.id,
            compiler = domain.has_compiler(),
            sandboxed = !is_default_context,
            "created domain"
        );
        if self.make_active {
            domain.make_active();
        }
        Ok(domain)
    }
}

/// Active domain, if any
pub fn active_domain() -> Option<Domain> {
    ACTIVE.read().clone()
}

/// First live domain with the given name
pub fn find_domain(name: &str) -> Option<Domain> {
    DOMAINS.read().iter().find(|d| d.0.name == name).cloned()
}

/// Every live domain, in creation order
pub fn all_domains() -> Vec<Domain> {
    DOMAINS.read().clone()
}

/// Counts from one broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastSummary {
    /// Targets whose method ran to completion
    pub reached: usize,
    /// Targets whose method failed
    pub failed: usize,
    /// Targets that do not declare the method
    pub missing: usize,
}

impl BroadcastSummary {
    /// Targets considered
    pub fn total(&self) -> usize {
        self.reached + self.failed + self.missing
    }
}

/// Which live instances a broadcast visits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastFilter {
    base: Option<String>,
    scene: Option<SceneId>,
    attached: Option<bool>,
}

impl BroadcastFilter {
    /// Every live instance
    pub fn all() -> Self {
        Self::default()
    }

    /// Attached instances only
    pub fn attached() -> Self {
        Self {
            attached: Some(true),
            ..Self::default()
        }
    }

    /// Plain instances only
    pub fn plain() -> Self {
        Self {
            attached: Some(false),
            ..Self::default()
        }
    }

    /// Only instances whose type is or derives from `base`
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Only attached instances in `scene`
    pub fn scene(mut self, scene: SceneId) -> Self {
        self.scene = Some(scene);
        self.attached = Some(true);
        self
    }

    fn wants_attached(&self) -> bool {
        self.attached != Some(false)
    }

    fn wants_plain(&self) -> bool {
        self.attached != Some(true)
    }

    fn admits(&self, proxy: &InstanceProxy, host: &dyn Host) -> bool {
        if let Some(base) = &self.base {
            if !proxy.script_type().is_sub_type_of(base) {
                return false;
            }
        }
        match self.scene {
            Some(scene) => proxy
                .component()
                .and_then(|c| host.entity_of(c))
                .and_then(|e| host.scene_of(e))
                == Some(scene),
            None => true,
        }
    }
}

impl Domain {
    /// Create a domain
    ///
    /// With `init_compiler` the built-in assembler is installed. With
    /// `make_active` the domain becomes the active domain.
    pub fn create(
        name: impl Into<String>,
        init_compiler: bool,
        make_active: bool,
        host: Arc<dyn Host>,
    ) -> ScriptResult<Domain> {
        let builder = DomainBuilder::new(name).host(host).make_active(make_active);
        if init_compiler {
            builder.with_default_compiler().build()
        } else {
            builder.build()
        }
    }

    /// Start a [`DomainBuilder`]
    pub fn builder(name: impl Into<String>) -> DomainBuilder {
        DomainBuilder::new(name)
    }

    /// The explicit domain if given, else the active one
    pub fn resolve(explicit: Option<&Domain>) -> ScriptResult<Domain> {
        match explicit {
            Some(domain) => Ok(domain.clone()),
            None => active_domain()
                .ok_or_else(|| ScriptError::InvalidArgument("no active domain".to_string())),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<DomainInner>) -> Option<Domain> {
        weak.upgrade().map(Domain)
    }

    pub(crate) fn downgrade(&self) -> Weak<DomainInner> {
        Arc::downgrade(&self.0)
    }

    /// Domain name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Process-unique id
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether this domain uses the host's default execution context
    pub fn is_default_context(&self) -> bool {
        self.0.is_default_context
    }

    /// Whether [`Domain::dispose`] has run
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_alive(&self) -> ScriptResult<()> {
        if self.is_disposed() {
            Err(ScriptError::DomainDisposed(self.0.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Make this the active domain
    pub fn make_active(&self) {
        *ACTIVE.write() = Some(self.clone());
        debug!(domain = %self.0.name, "domain is now active");
    }

    /// Whether this is the active domain
    pub fn is_active(&self) -> bool {
        ACTIVE.read().as_ref() == Some(self)
    }

    /// Host services
    pub fn host(&self) -> Arc<dyn Host> {
        self.0.host.clone()
    }

    /// Natives available to `call_extern`
    pub fn natives(&self) -> &Arc<NativeRegistry> {
        &self.0.natives
    }

    /// Settings snapshot
    pub fn settings(&self) -> EngineSettings {
        self.0.settings.read().clone()
    }

    /// Replace the settings snapshot
    pub fn set_settings(&self, settings: EngineSettings) -> ScriptResult<()> {
        settings.validate()?;
        *self.0.settings.write() = settings;
        Ok(())
    }

    /// Edit the settings snapshot in place
    pub fn update_settings(&self, f: impl FnOnce(&mut EngineSettings)) -> ScriptResult<()> {
        let mut settings = self.settings();
        f(&mut settings);
        self.set_settings(settings)
    }

    pub(crate) fn verifier(&self) -> &Arc<dyn Verifier> {
        &self.0.verifier
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, DomainState> {
        self.0.state.lock()
    }

    pub(crate) fn pipeline_lock(&self) -> MutexGuard<'_, ()> {
        self.0.pipeline.lock()
    }

    pub(crate) fn exec_context(&self) -> ScriptResult<ExecContext> {
        self.ensure_alive()?;
        Ok(ExecContext {
            natives: self.0.natives.clone(),
            host: self.0.host.clone(),
            max_steps: self.0.settings.read().max_steps,
        })
    }

    // ------------------------------------------------------------------
    // Compiler
    // ------------------------------------------------------------------

    /// Whether a compiler service is installed
    pub fn has_compiler(&self) -> bool {
        self.state().compiler.is_some()
    }

    /// Installed compiler service
    pub fn compiler(&self) -> ScriptResult<Arc<dyn CompilerService>> {
        self.ensure_alive()?;
        self.state()
            .compiler
            .clone()
            .ok_or_else(|| ScriptError::NoCompiler(self.0.name.clone()))
    }

    /// Install or remove the compiler service
    pub fn set_compiler(&self, compiler: Option<Arc<dyn CompilerService>>) -> ScriptResult<()> {
        self.ensure_alive()?;
        self.state().compiler = compiler;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Last results
    // ------------------------------------------------------------------

    /// Result of the most recent compile
    pub fn last_compile_result(&self) -> Option<CompileResult> {
        self.state().last_compile.clone()
    }

    pub(crate) fn set_last_compile_result(&self, result: CompileResult) {
        self.state().last_compile = Some(result);
    }

    /// Report of the most recent security check
    pub fn last_security_report(&self) -> Option<SecurityReport> {
        self.state().last_security.clone()
    }

    /// Log a compile result at the level the settings ask for
    pub fn log_compile_output(&self, result: &CompileResult) {
        result.log(self.0.settings.read().log_level);
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Verify and register a module image
    ///
    /// An image whose checksum matches a registered module returns that
    /// module. A rejected image is never registered and contributes no types;
    /// its report stays available through [`Domain::last_security_report`].
    pub fn register_module(&self, source: ModuleSource, mode: SecurityMode) -> ScriptResult<Arc<Module>> {
        let _pipeline = self.pipeline_lock();
        self.register(source, None, mode)
    }

    /// Registration without taking the pipeline lock; callers hold it
    pub(crate) fn register(
        &self,
        source: ModuleSource,
        compile_result: Option<CompileResult>,
        mode: SecurityMode,
    ) -> ScriptResult<Arc<Module>> {
        self.ensure_alive()?;
        let candidate = Module::new(self, source, compile_result)?;
        let module = self
            .find_module_by_checksum(&candidate.checksum())
            .unwrap_or(candidate);

        let settings = self.settings();
        if mode.should_verify(settings.security_check_code) {
            let report = module.verify(self.0.verifier.as_ref(), &settings.security_policy);
            let passed = report.passed();
            self.state().last_security = Some(report.clone());
            if !passed {
                error!(
                    domain = %self.0.name,
                    module = module.name(),
                    violations = report.violations.len(),
                    "module failed security verification"
                );
                return Err(ScriptError::SecurityViolation(Box::new(report)));
            }
        }

        let mut state = self.state();
        self.ensure_alive()?;
        if module.is_registered() {
            debug!(domain = %self.0.name, module = module.name(), "module already registered");
            return Ok(module);
        }
        module.mark_registered();
        state.modules.push(module.clone());
        drop(state);

        info!(
            domain = %self.0.name,
            module = module.name(),
            checksum = %module.checksum_hex(),
            types = module.types().len(),
            "registered module"
        );
        Ok(module)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Registered modules, in registration order
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.state().modules.clone()
    }

    /// Registered module by name
    pub fn find_module(&self, name: &str) -> Option<Arc<Module>> {
        self.state().modules.iter().find(|m| m.name() == name).cloned()
    }

    /// Registered module with an identical image
    pub fn find_module_by_checksum(&self, checksum: &[u8; 32]) -> Option<Arc<Module>> {
        self.state()
            .modules
            .iter()
            .find(|m| &m.checksum() == checksum)
            .cloned()
    }

    /// Type by name in any registered module; later modules win
    pub fn find_type(&self, name: &str) -> Option<Arc<ModuleType>> {
        self.modules().iter().rev().find_map(|m| m.find_type(name))
    }

    /// First type, across modules, that is or derives from `base`
    pub fn find_sub_type_of(&self, base: &str) -> Option<Arc<ModuleType>> {
        self.modules().iter().find_map(|m| m.find_sub_type_of(base))
    }

    /// Every type, across modules, that is or derives from `base`
    pub fn find_all_sub_types_of(&self, base: &str) -> Vec<Arc<ModuleType>> {
        self.modules()
            .iter()
            .flat_map(|m| m.find_all_sub_types_of(base))
            .collect()
    }

    /// Every type of every registered module
    pub fn find_all_types(&self) -> Vec<Arc<ModuleType>> {
        self.modules()
            .iter()
            .flat_map(|m| m.types().to_vec())
            .collect()
    }

    // ------------------------------------------------------------------
    // Execution registry
    // ------------------------------------------------------------------

    pub(crate) fn track(&self, instance: Arc<Instance>) -> ScriptResult<InstanceProxy> {
        let proxy = InstanceProxy::new(instance, self.downgrade());
        let mut state = self.state();
        // A dispose that won the race must not leave a live proxy behind
        if self.is_disposed() {
            proxy.mark_disposed();
            return Err(ScriptError::DomainDisposed(self.0.name.clone()));
        }
        state.execution.insert(proxy.clone());
        trace!(domain = %self.0.name, id = proxy.id().0, type_name = proxy.type_name(), "tracking instance");
        Ok(proxy)
    }

    pub(crate) fn untrack(&self, id: ProxyId) {
        self.state().execution.remove(id);
    }

    fn prune(&self, state: &mut DomainState) {
        for proxy in state.execution.prune(self.0.host.as_ref()) {
            proxy.mark_disposed();
            trace!(id = proxy.id().0, "pruned destroyed instance");
        }
    }

    /// Live instances, attached first
    pub fn instances(&self) -> Vec<InstanceProxy> {
        self.collect_instances(&BroadcastFilter::all())
    }

    /// Live instances that pass `filter`
    pub fn find_instances(&self, filter: &BroadcastFilter) -> Vec<InstanceProxy> {
        self.collect_instances(filter)
    }

    /// Number of live instances
    pub fn instance_count(&self) -> usize {
        let mut state = self.state();
        self.prune(&mut state);
        state.execution.len()
    }

    fn collect_instances(&self, filter: &BroadcastFilter) -> Vec<InstanceProxy> {
        let host = self.0.host.as_ref();
        let mut state = self.state();
        self.prune(&mut state);
        let mut out = Vec::new();
        if filter.wants_attached() {
            out.extend(state.execution.attached().cloned());
        }
        if filter.wants_plain() {
            out.extend(state.execution.plain().cloned());
        }
        drop(state);
        out.retain(|p| filter.admits(p, host));
        out
    }

    // ------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------

    /// Receive every failure a broadcast swallows
    pub fn set_broadcast_error_sink(&self, sink: Option<BroadcastErrorSink>) {
        *self.0.error_sink.write() = sink;
    }

    fn record(&self, summary: &mut BroadcastSummary, target: &str, method: &str, result: ScriptResult<Value>) {
        match result {
            Ok(_) => summary.reached += 1,
            Err(e) if e.is_member_not_found() => {
                trace!(target, method, "broadcast target has no such method");
                summary.missing += 1;
            }
            Err(e) => {
                warn!(domain = %self.0.name, target, method, error = %e, "broadcast target failed");
                summary.failed += 1;
                let sink = self.0.error_sink.read().clone();
                if let Some(sink) = sink {
                    sink(target, &e);
                }
            }
        }
    }

    /// Call a static method on every type that declares it
    ///
    /// Never fails for a target; see [`BroadcastSummary`].
    pub fn broadcast_static(&self, method: &str, args: &[Value]) -> ScriptResult<BroadcastSummary> {
        self.ensure_alive()?;
        let mut summary = BroadcastSummary::default();
        for ty in self.find_all_types() {
            if ty.method(method, true).is_none() {
                summary.missing += 1;
                continue;
            }
            let result = ty.call_static(method, args.to_vec());
            self.record(&mut summary, ty.full_name(), method, result);
        }
        debug!(domain = %self.0.name, method, ?summary, "static broadcast");
        Ok(summary)
    }

    /// Call an instance method on every live instance that passes `filter`
    ///
    /// Targets are snapshotted before any call runs, so instances created
    /// or disposed by a target do not change who is visited.
    pub fn broadcast(
        &self,
        filter: &BroadcastFilter,
        method: &str,
        args: &[Value],
    ) -> ScriptResult<BroadcastSummary> {
        self.ensure_alive()?;
        let mut summary = BroadcastSummary::default();
        for proxy in self.collect_instances(filter) {
            if proxy.is_disposed() {
                continue;
            }
            let result = proxy.call(method, args.to_vec());
            self.record(&mut summary, proxy.type_name(), method, result);
        }
        debug!(domain = %self.0.name, method, ?summary, "instance broadcast");
        Ok(summary)
    }

    /// Broadcast to attached instances in a scene
    pub fn broadcast_scene(
        &self,
        scene: SceneId,
        method: &str,
        args: &[Value],
    ) -> ScriptResult<BroadcastSummary> {
        self.broadcast(&BroadcastFilter::attached().scene(scene), method, args)
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Tear the domain down
    ///
    /// Every live proxy is disposed, the registry cleared and the compiler
    /// dropped. A sandboxed domain also clears its natives; the host's
    /// default context is never unloaded. Later calls fail with
    /// [`ScriptError::DomainDisposed`]. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if self.0.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _pipeline = self.pipeline_lock();

        let (proxies, modules) = {
            let mut state = self.state();
            state.compiler = None;
            state.processors.clear();
            let modules = std::mem::take(&mut state.modules).len();
            (state.execution.drain(), modules)
        };
        for proxy in &proxies {
            proxy.mark_disposed();
        }
        if !self.0.is_default_context {
            self.0.natives.clear();
        }

        DOMAINS.write().retain(|d| d != self);
        {
            let mut active = ACTIVE.write();
            if active.as_ref() == Some(self) {
                *active = None;
            }
        }
        info!(
            domain = %self.0.name,
            instances = proxies.len(),
            modules,
            "disposed domain"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_scene_implies_attached() {
        let filter = BroadcastFilter::all().scene(SceneId(3));
        assert!(filter.wants_attached());
        assert!(!filter.wants_plain());

        let plain = BroadcastFilter::plain().base("Game.Enemy");
        assert!(!plain.wants_attached());
        assert!(plain.wants_plain());
    }

    #[test]
    fn test_create_and_dispose_updates_global_list() {
        let domain = Domain::builder("unit-lifecycle").build().unwrap();
        assert!(all_domains().contains(&domain));
        assert!(!domain.has_compiler());
        assert!(matches!(domain.compiler(), Err(ScriptError::NoCompiler(_))));

        domain.dispose();
        domain.dispose();
        assert!(domain.is_disposed());
        assert!(!all_domains().contains(&domain));
        assert!(matches!(
            domain.exec_context(),
            Err(ScriptError::DomainDisposed(_))
        ));
    }

    #[test]
    fn test_summary_total() {
        let summary = BroadcastSummary {
            reached: 2,
            failed: 1,
            missing: 3,
        };
        assert_eq!(summary.total(), 6);
    }
}
