//! Script virtual machine
//!
//! Executes the decoded bodies of a module image. Everything a running
//! method needs from its domain is captured in an [`ExecContext`] when the
//! invocation starts.

pub mod coroutine;
pub mod interpreter;
pub mod object;

pub use coroutine::Coroutine;
pub use interpreter::MAX_CALL_DEPTH;
pub use object::{EventHandler, EventTable, Instance, SubscriptionId};

use crate::natives::NativeRegistry;
use scriptbox_sdk::Host;
use std::sync::Arc;

/// Domain services visible to running code
#[derive(Clone)]
pub struct ExecContext {
    /// Natives `call_extern` links against
    pub natives: Arc<NativeRegistry>,
    /// Host lifecycle services
    pub host: Arc<dyn Host>,
    /// Instruction budget per invocation or resume
    pub max_steps: u64,
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("natives", &self.natives)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}
