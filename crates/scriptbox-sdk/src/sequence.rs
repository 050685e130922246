//! Resumable sequences
//!
//! A sequence method does not return a value directly; it returns a
//! [`SequenceHandle`] that the host resumes on its own schedule (usually
//! once per frame) until it completes.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::NativeError;
use crate::value::Value;

/// Outcome of one resume step
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceStep {
    /// The sequence suspended with a value; resume it again later
    Yielded(Value),
    /// The sequence ran to completion
    Complete(Value),
}

/// A unit of work that can be resumed until complete
pub trait Sequence: Send {
    /// Run until the next suspension point
    fn resume(&mut self) -> Result<SequenceStep, NativeError>;

    /// Whether the sequence has completed or faulted
    fn is_finished(&self) -> bool;
}

/// Shared handle to a running sequence
#[derive(Clone)]
pub struct SequenceHandle(Arc<Mutex<Box<dyn Sequence>>>);

impl SequenceHandle {
    /// Wrap a sequence
    pub fn new(sequence: Box<dyn Sequence>) -> Self {
        Self(Arc::new(Mutex::new(sequence)))
    }

    /// Resume the wrapped sequence once
    pub fn resume(&self) -> Result<SequenceStep, NativeError> {
        let mut guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.resume()
    }

    /// Whether the wrapped sequence has completed
    pub fn is_finished(&self) -> bool {
        let guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.is_finished()
    }

    /// Resume until completion and return the final value
    ///
    /// Yielded values are discarded. Intended for hosts without a frame loop.
    pub fn run_to_completion(&self) -> Result<Value, NativeError> {
        loop {
            if let SequenceStep::Complete(value) = self.resume()? {
                return Ok(value);
            }
        }
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &SequenceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SequenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown(i64);

    impl Sequence for Countdown {
        fn resume(&mut self) -> Result<SequenceStep, NativeError> {
            if self.0 == 0 {
                return Ok(SequenceStep::Complete(Value::str("done")));
            }
            self.0 -= 1;
            Ok(SequenceStep::Yielded(Value::Int(self.0)))
        }

        fn is_finished(&self) -> bool {
            self.0 == 0
        }
    }

    #[test]
    fn test_resume_steps() {
        let handle = SequenceHandle::new(Box::new(Countdown(2)));
        assert_eq!(handle.resume(), Ok(SequenceStep::Yielded(Value::Int(1))));
        assert_eq!(handle.resume(), Ok(SequenceStep::Yielded(Value::Int(0))));
        assert!(handle.is_finished());
        assert_eq!(
            handle.resume(),
            Ok(SequenceStep::Complete(Value::str("done")))
        );
    }

    #[test]
    fn test_run_to_completion() {
        let handle = SequenceHandle::new(Box::new(Countdown(5)));
        assert_eq!(handle.run_to_completion(), Ok(Value::str("done")));
    }
}
