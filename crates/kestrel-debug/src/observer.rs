use kestrel_runtime::{CatchPrediction, FunctionId, ObjectId, Runtime, ScriptId, Value};

use crate::delegate::ExceptionKind;
use crate::engine::Debugger;
use crate::info::ExecutionMode;

impl Debugger {
    /// Entry point for a thrown exception about to unwind.
    ///
    /// Reports the exception event when the exception filters allow it,
    /// then re-arms any pending step against the catching frame. A
    /// termination request made by the delegate is left pending on the
    /// runtime.
    #[tracing::instrument(name = "OnThrow", skip_all)]
    pub fn on_throw(&mut self, runtime: &mut Runtime, exception: &Value) {
        if self.in_debug_scope() || self.ignore_events() {
            return;
        }
        let promise = runtime.promise_on_stack();
        let kind = if promise.is_some() {
            ExceptionKind::PromiseRejection
        } else {
            ExceptionKind::Exception
        };
        self.on_exception(runtime, exception, promise, kind);
        self.prepare_step_on_throw(runtime);
    }

    /// Entry point for a promise rejection without an unwinding throw.
    ///
    /// Re-rejection of an already reported promise stays quiet.
    #[tracing::instrument(name = "OnPromiseReject", skip_all)]
    pub fn on_promise_reject(&mut self, runtime: &mut Runtime, promise: ObjectId, value: &Value) {
        if self.in_debug_scope() || self.ignore_events() {
            return;
        }
        let marked = runtime
            .heap()
            .object(promise)
            .and_then(|object| object.promise)
            .is_some_and(|state| state.debug_marked);
        if !marked {
            self.on_exception(runtime, value, Some(promise), ExceptionKind::PromiseRejection);
        }
    }

    pub(crate) fn on_exception(
        &mut self,
        runtime: &mut Runtime,
        exception: &Value,
        promise: Option<ObjectId>,
        kind: ExceptionKind,
    ) {
        if self.delegate.is_none() {
            return;
        }
        // An overflowed stack cannot run the delegate.
        if runtime.stack().has_overflowed() {
            return;
        }
        if matches!(self.execution_mode, ExecutionMode::SideEffects) {
            return;
        }
        if !self.break_on_exception && !self.break_on_uncaught_exception {
            return;
        }

        let mut uncaught =
            matches!(runtime.predict_exception_catcher(), CatchPrediction::Uncaught);
        if let Some(promise) = promise {
            let state = runtime.heap().object(promise).and_then(|object| object.promise);
            if let Some(state) = state {
                if state.silent {
                    return;
                }
                // A rejection with no user handler will surface uncaught no
                // matter what the stack predicts.
                uncaught = !state.has_user_reject_handler;
            }
            // Mark the promise so a later re-rejection stays quiet.
            if let Some(object) = runtime.heap_mut().object_mut(promise) {
                if let Some(state) = object.promise.as_mut() {
                    state.debug_marked = true;
                }
            }
        }
        if uncaught {
            if !self.break_on_uncaught_exception {
                return;
            }
        } else if !self.break_on_exception {
            return;
        }

        if runtime.stack().top().is_none() {
            return;
        }
        if self.is_muted_at_current_location(runtime)
            || self.is_exception_blackboxed(runtime, uncaught)
        {
            return;
        }

        tracing::debug!(uncaught, ?kind, "exception reported");
        self.with_debug_scope(runtime, |this, runtime| {
            this.with_break_disabled(|this| {
                let Some(mut delegate) = this.delegate.take() else {
                    return;
                };
                delegate.exception_thrown(runtime, exception, promise, uncaught, kind);
                this.delegate = Some(delegate);
            });
        });
    }

    /// Reports a finished compilation.
    pub fn on_after_compile(&mut self, runtime: &mut Runtime, script: ScriptId) {
        self.process_compile_event(runtime, script, false);
    }

    /// Reports a failed compilation.
    pub fn on_compile_error(&mut self, runtime: &mut Runtime, script: ScriptId) {
        self.process_compile_event(runtime, script, true);
    }

    fn process_compile_event(
        &mut self,
        runtime: &mut Runtime,
        script: ScriptId,
        has_compile_error: bool,
    ) {
        if runtime.script(script).temporary {
            return;
        }
        if self.ignore_events() || !runtime.script(script).user_script {
            return;
        }
        if self.delegate.is_none() {
            return;
        }
        let is_live_edit = self.running_live_edit;
        self.with_debug_scope(runtime, |this, runtime| {
            this.with_break_disabled(|this| {
                let Some(mut delegate) = this.delegate.take() else {
                    return;
                };
                delegate.script_compiled(runtime, script, is_live_edit, has_compile_error);
                this.delegate = Some(delegate);
            });
        });
    }

    /// Whether `function` is blackboxed, asking the delegate on a cache
    /// miss.
    ///
    /// Functions not subject to debugging and functions of internal scripts
    /// are blackboxed without consulting the delegate.
    pub(crate) fn is_blackboxed(&mut self, runtime: &mut Runtime, function: FunctionId) -> bool {
        if self.delegate.is_none() {
            return !runtime.function(function).is_subject_to_debugging();
        }
        if let Some(cached) = self
            .registry
            .get(function)
            .and_then(|info| info.cached_blackboxed())
        {
            return cached;
        }
        let (script, start_position, end_position, subject) = {
            let f = runtime.function(function);
            (
                f.script,
                f.start_position,
                f.end_position,
                f.is_subject_to_debugging(),
            )
        };
        let mut blackboxed = !subject || !runtime.script(script).user_script;
        if !blackboxed {
            let start = runtime.script(script).location(start_position);
            let end = runtime.script(script).location(end_position);
            blackboxed = self.with_suppressed(|this| {
                this.with_break_disabled(|this| {
                    let Some(mut delegate) = this.delegate.take() else {
                        return false;
                    };
                    let verdict = delegate.is_function_blackboxed(runtime, script, start, end);
                    this.delegate = Some(delegate);
                    verdict
                })
            });
        }
        let info = self
            .registry
            .get_or_create(function, runtime.function(function));
        info.cache_blackboxed(blackboxed);
        blackboxed
    }

    /// Whether every activation in the frame is blackboxed.
    fn is_frame_blackboxed(&mut self, runtime: &mut Runtime, functions: &[FunctionId]) -> bool {
        functions
            .iter()
            .all(|function| self.is_blackboxed(runtime, *function))
    }

    /// A caught exception is blackboxed when the throwing frame is; an
    /// uncaught one only when every frame on the stack is.
    fn is_exception_blackboxed(&mut self, runtime: &mut Runtime, uncaught: bool) -> bool {
        let Some(top) = runtime.stack().top() else {
            return false;
        };
        let top_functions: Vec<FunctionId> =
            top.summaries().iter().map(|s| s.function).collect();
        let top_blackboxed = self.is_frame_blackboxed(runtime, &top_functions);
        if !uncaught || !top_blackboxed {
            return top_blackboxed;
        }
        let frames: Vec<Vec<FunctionId>> = runtime
            .stack()
            .frames()
            .iter()
            .map(|frame| frame.summaries().iter().map(|s| s.function).collect())
            .collect();
        frames
            .iter()
            .all(|functions| self.is_frame_blackboxed(runtime, functions))
    }

    /// Asks the delegate whether the paused location should be skipped.
    pub(crate) fn should_be_skipped(&mut self, runtime: &mut Runtime) -> bool {
        let Some(frame) = runtime.stack().top() else {
            return false;
        };
        let summary = *frame.top_summary();
        let (script, location) = {
            let f = runtime.function(summary.function);
            let position = f
                .bytecode()
                .and_then(|bytecode| bytecode.source_position(summary.code_offset))
                .unwrap_or(f.start_position);
            (f.script, runtime.script(f.script).location(position))
        };
        self.with_suppressed(|this| {
            this.with_break_disabled(|this| {
                let Some(mut delegate) = this.delegate.take() else {
                    return false;
                };
                let verdict = delegate.should_be_skipped(runtime, script, location);
                this.delegate = Some(delegate);
                verdict
            })
        })
    }
}
