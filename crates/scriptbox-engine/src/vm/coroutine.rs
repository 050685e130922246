//! Sequence methods as resumable coroutines

use super::interpreter::{Frame, Machine, Step};
use super::ExecContext;
use scriptbox_sdk::{NativeError, Sequence, SequenceStep, Value};

/// A suspended sequence method
///
/// Each `resume` runs the frame with a fresh step budget until the next
/// `yield` or the end of the method.
pub struct Coroutine {
    ctx: ExecContext,
    frame: Frame,
    finished: bool,
}

impl Coroutine {
    pub(crate) fn new(ctx: ExecContext, frame: Frame) -> Self {
        Self {
            ctx,
            frame,
            finished: false,
        }
    }
}

impl Sequence for Coroutine {
    fn resume(&mut self) -> Result<SequenceStep, NativeError> {
        if self.finished {
            return Ok(SequenceStep::Complete(Value::Null));
        }
        let mut machine = Machine::new(&self.ctx);
        match machine.run(&mut self.frame) {
            Ok(Step::Yield(value)) => Ok(SequenceStep::Yielded(value)),
            Ok(Step::Return(value)) => {
                self.finished = true;
                tracing::trace!(method = %self.frame.method().name, "sequence complete");
                Ok(SequenceStep::Complete(value))
            }
            Err(e) => {
                self.finished = true;
                Err(NativeError::Failed(e.to_string()))
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}
