//! Poll-driven background operations

use super::pool::WorkerPool;
use crate::domain::{Domain, Module};
use crate::error::{ScriptError, ScriptResult};
use crate::pipeline::CompileResult;
use crate::reflect::ModuleType;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use tracing::trace;

type Work<T> = Box<dyn FnOnce() -> ScriptResult<T> + Send + 'static>;
type Finalize<T> = Box<dyn FnOnce(ScriptResult<T>) -> ScriptResult<T> + Send + 'static>;

/// Lifecycle of an [`AsyncOperation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Not polled yet
    NotStarted,
    /// Work queued or running
    Running,
    /// Finalized; the result is available
    Finished,
}

/// Anything a host loop can poll
pub trait Operation {
    /// Advance; `Ready` once the result is available
    fn poll(&mut self) -> Poll<()>;
}

struct Slot<T> {
    finished: AtomicBool,
    outcome: Mutex<Option<ScriptResult<T>>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Work that runs on the shared pool and finishes on the polling thread
///
/// The first poll queues the work; later polls return `Pending` until the
/// worker sets the finished flag. The next poll after that runs the
/// finalize step on the polling thread and returns `Ready`. There is no
/// cancellation: dropping the operation discards the result.
pub struct AsyncOperation<T: Send + 'static> {
    state: OperationState,
    work: Option<Work<T>>,
    finalize: Option<Finalize<T>>,
    slot: Arc<Slot<T>>,
    result: Option<ScriptResult<T>>,
    pool: Option<&'static WorkerPool>,
}

impl<T: Send + 'static> std::fmt::Debug for AsyncOperation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("state", &self.state)
            .field("successful", &self.is_successful())
            .finish()
    }
}

impl<T: Send + 'static> AsyncOperation<T> {
    /// Operation running `work` on the global pool
    pub fn new(work: impl FnOnce() -> ScriptResult<T> + Send + 'static) -> Self {
        Self {
            state: OperationState::NotStarted,
            work: Some(Box::new(work)),
            finalize: None,
            slot: Arc::new(Slot {
                finished: AtomicBool::new(false),
                outcome: Mutex::new(None),
            }),
            result: None,
            pool: None,
        }
    }

    /// Step run on the polling thread once the work is done
    pub fn with_finalize(
        mut self,
        finalize: impl FnOnce(ScriptResult<T>) -> ScriptResult<T> + Send + 'static,
    ) -> Self {
        self.finalize = Some(Box::new(finalize));
        self
    }

    /// Run on `pool` instead of the global pool
    pub fn on_pool(mut self, pool: &'static WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Current state
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Whether the result is available
    pub fn is_done(&self) -> bool {
        self.state == OperationState::Finished
    }

    /// Finished with a value
    pub fn is_successful(&self) -> bool {
        matches!(self.result, Some(Ok(_)))
    }

    /// Result, once finished
    pub fn result(&self) -> Option<&ScriptResult<T>> {
        self.result.as_ref()
    }

    /// Error, if it finished with one
    pub fn error(&self) -> Option<&ScriptError> {
        self.result.as_ref().and_then(|r| r.as_ref().err())
    }

    /// Take the result out, leaving `None`
    pub fn take_result(&mut self) -> Option<ScriptResult<T>> {
        self.result.take()
    }

    fn start(&mut self) {
        let Some(work) = self.work.take() else {
            return;
        };
        let slot = self.slot.clone();
        let job = move || {
            let outcome = catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|payload| Err(ScriptError::Panicked(panic_message(payload))));
            *slot.outcome.lock() = Some(outcome);
            slot.finished.store(true, Ordering::Release);
        };
        self.pool.unwrap_or_else(WorkerPool::global).submit(job);
        trace!("queued async operation");
    }

    fn finish(&mut self) {
        let outcome = self
            .slot
            .outcome
            .lock()
            .take()
            .unwrap_or_else(|| Err(ScriptError::Panicked("worker left no result".to_string())));
        let outcome = match self.finalize.take() {
            Some(finalize) => finalize(outcome),
            None => outcome,
        };
        self.result = Some(outcome);
        self.state = OperationState::Finished;
    }
}

impl<T: Send + 'static> Operation for AsyncOperation<T> {
    fn poll(&mut self) -> Poll<()> {
        match self.state {
            OperationState::NotStarted => {
                self.state = OperationState::Running;
                self.start();
                Poll::Pending
            }
            OperationState::Running => {
                if self.slot.finished.load(Ordering::Acquire) {
                    self.finish();
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
            OperationState::Finished => Poll::Ready(()),
        }
    }
}

/// Poll until ready, yielding between polls
pub fn block_on_poll<O: Operation + ?Sized>(operation: &mut O) {
    while operation.poll().is_pending() {
        std::thread::yield_now();
    }
}

// ============================================================================
// Module operations
// ============================================================================

/// Confirm on the polling thread that the module is still registered
fn read_back(domain: &Domain, outcome: ScriptResult<Arc<Module>>) -> ScriptResult<Arc<Module>> {
    let module = outcome?;
    domain.ensure_alive()?;
    domain
        .find_module_by_checksum(&module.checksum())
        .ok_or_else(|| {
            ScriptError::InvalidArgument(format!(
                "module '{}' is no longer registered",
                module.name()
            ))
        })
}

macro_rules! module_operation {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            domain: Domain,
            inner: AsyncOperation<Arc<Module>>,
        }

        impl $name {
            pub(crate) fn new(
                domain: Domain,
                work: impl FnOnce() -> ScriptResult<Arc<Module>> + Send + 'static,
            ) -> Self {
                let finalize_domain = domain.clone();
                let inner = AsyncOperation::new(work)
                    .with_finalize(move |outcome| read_back(&finalize_domain, outcome));
                Self { domain, inner }
            }

            /// Domain the module is loaded into
            pub fn domain(&self) -> &Domain {
                &self.domain
            }

            /// Lifecycle state
            pub fn state(&self) -> OperationState {
                self.inner.state()
            }

            /// Whether the result is available
            pub fn is_done(&self) -> bool {
                self.inner.is_done()
            }

            /// Finished with a registered module
            pub fn is_successful(&self) -> bool {
                self.inner.is_successful()
            }

            /// Result, once finished
            pub fn result(&self) -> Option<&ScriptResult<Arc<Module>>> {
                self.inner.result()
            }

            /// Error, if it finished with one
            pub fn error(&self) -> Option<&ScriptError> {
                self.inner.error()
            }

            /// Take the result out
            pub fn take_result(&mut self) -> Option<ScriptResult<Arc<Module>>> {
                self.inner.take_result()
            }

            /// Loaded module, once finished successfully
            pub fn module(&self) -> Option<&Arc<Module>> {
                self.inner.result().and_then(|r| r.as_ref().ok())
            }

            /// Main type of the loaded module
            pub fn main_type(&self) -> Option<Arc<ModuleType>> {
                self.module().and_then(|m| m.main_type())
            }

            /// Whether the module passed the security gate
            pub fn is_security_verified(&self) -> bool {
                self.module().map_or(false, |m| m.is_security_verified())
            }
        }

        impl Operation for $name {
            fn poll(&mut self) -> Poll<()> {
                self.inner.poll()
            }
        }
    };
}

module_operation!(
    /// Background compile followed by registration
    CompileOperation
);

module_operation!(
    /// Background load of an existing image
    LoadOperation
);

impl CompileOperation {
    /// Compile result the module came from
    ///
    /// Falls back to the domain's last compile result when the compile
    /// itself failed.
    pub fn compile_result(&self) -> Option<CompileResult> {
        match self.module() {
            Some(module) => module.compile_result().cloned(),
            None if self.is_done() => self.domain.last_compile_result(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_and_finalize() {
        let mut op = AsyncOperation::new(|| Ok(20)).with_finalize(|r| r.map(|v| v + 1));
        assert_eq!(op.state(), OperationState::NotStarted);
        assert!(op.poll().is_pending());
        assert_eq!(op.state(), OperationState::Running);
        block_on_poll(&mut op);
        assert!(op.is_done());
        assert!(op.is_successful());
        assert_eq!(*op.result().unwrap().as_ref().unwrap(), 21);
        assert!(op.poll().is_ready());
        assert_eq!(op.take_result().unwrap().unwrap(), 21);
        assert!(op.result().is_none());
    }

    #[test]
    fn test_error_is_recorded() {
        let mut op: AsyncOperation<()> =
            AsyncOperation::new(|| Err(ScriptError::InvalidArgument("nope".to_string())));
        block_on_poll(&mut op);
        assert!(op.is_done());
        assert!(!op.is_successful());
        assert!(matches!(op.error(), Some(ScriptError::InvalidArgument(_))));
    }

    #[test]
    fn test_panic_becomes_failure() {
        let mut op: AsyncOperation<()> = AsyncOperation::new(|| panic!("boom"));
        block_on_poll(&mut op);
        match op.error() {
            Some(ScriptError::Panicked(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
