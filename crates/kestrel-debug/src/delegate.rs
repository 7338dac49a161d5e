use kestrel_runtime::{FrameId, ObjectId, Runtime, ScriptId, SourceLocation, Value};

use crate::BreakpointId;
use crate::stepping::StepAction;

/// How execution resumes after a pause reported through
/// [`DebugDelegate::break_program_requested`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakResume {
    /// Resume without stepping.
    Continue,
    /// Re-arm stepping before resuming.
    Step(StepAction),
    /// Terminate the paused evaluation once the debugger unwinds.
    Terminate,
}

/// Classification of a reported exception event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionKind {
    /// A plain thrown exception.
    Exception,
    /// A promise rejection.
    PromiseRejection,
}

/// Receiver of debug events.
///
/// Attaching a delegate activates the engine; detaching it unloads all
/// instrumentation. All methods default to no-ops (respectively to
/// "not blackboxed" and "not skipped").
pub trait DebugDelegate {
    /// A script finished compiling.
    ///
    /// Never fired for internally synthesized temporary scripts nor while a
    /// live-edit patch is recompiling.
    fn script_compiled(
        &mut self,
        runtime: &Runtime,
        script: ScriptId,
        is_live_edit: bool,
        has_compile_error: bool,
    ) {
        let _ = (runtime, script, is_live_edit, has_compile_error);
    }

    /// Execution paused on breakpoints or a completed step.
    ///
    /// `hit_breakpoints` is empty for pauses not caused by a breakpoint.
    /// The returned [`BreakResume`] is applied while the pause scope is
    /// still open, so requested stepping is armed against the paused frame.
    fn break_program_requested(
        &mut self,
        runtime: &Runtime,
        hit_breakpoints: &[BreakpointId],
    ) -> BreakResume {
        let _ = (runtime, hit_breakpoints);
        BreakResume::Continue
    }

    /// An exception was thrown or a promise rejected.
    fn exception_thrown(
        &mut self,
        runtime: &Runtime,
        exception: &Value,
        promise: Option<ObjectId>,
        is_uncaught: bool,
        kind: ExceptionKind,
    ) {
        let _ = (runtime, exception, promise, is_uncaught, kind);
    }

    /// Whether the function covering `start..end` of `script` is
    /// blackboxed. The verdict is cached per function until hints are
    /// cleared.
    fn is_function_blackboxed(
        &mut self,
        runtime: &Runtime,
        script: ScriptId,
        start: SourceLocation,
        end: SourceLocation,
    ) -> bool {
        let _ = (runtime, script, start, end);
        false
    }

    /// Whether a step-completion pause at `location` should be skipped and
    /// the step re-armed instead.
    fn should_be_skipped(
        &mut self,
        runtime: &Runtime,
        script: ScriptId,
        location: SourceLocation,
    ) -> bool {
        let _ = (runtime, script, location);
        false
    }
}

/// An uncaught exception raised while evaluating a breakpoint condition.
///
/// The engine swallows it and treats the condition as not met.
#[derive(Debug, thiserror::Error)]
#[error("uncaught exception during debug evaluation: {0}")]
pub struct EvalException(pub String);

/// Evaluator of breakpoint conditions against a paused frame.
///
/// Expression semantics live with the host; the engine only consumes the
/// truthiness of the result.
pub trait ConditionEvaluator {
    /// Evaluates `condition` against `frame`.
    ///
    /// `at_entry` marks evaluation for an entry breakpoint, against the
    /// topmost arguments rather than a bytecode position.
    fn evaluate(
        &mut self,
        runtime: &mut Runtime,
        frame: Option<FrameId>,
        condition: &str,
        at_entry: bool,
    ) -> core::result::Result<Value, EvalException>;
}
