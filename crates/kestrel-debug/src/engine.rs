use std::sync::{Arc, Mutex};

use kestrel_runtime::{FunctionId, LiveEditStatus, Runtime, ScriptId};

use crate::delegate::{ConditionEvaluator, DebugDelegate};
use crate::info::{CoverageInfo, DebugInfo, DebugInfoRegistry, ExecutionMode};
use crate::scope::ScopeEntry;
use crate::side_effect::TemporaryObjectsTracker;
use crate::stepping::{StepAction, ThreadSnapshot, ThreadState};

/// The debug engine.
///
/// One engine instruments one runtime; every operation receives the runtime
/// by reference. The engine is inert until a [`DebugDelegate`] is attached
/// and unloads all instrumentation when the delegate is detached.
pub struct Debugger {
    pub(crate) registry: DebugInfoRegistry,
    pub(crate) delegate: Option<Box<dyn DebugDelegate>>,
    pub(crate) evaluator: Option<Box<dyn ConditionEvaluator>>,
    pub(crate) thread: ThreadState,
    pub(crate) scopes: Vec<ScopeEntry>,
    pub(crate) is_active: bool,
    pub(crate) break_points_active: bool,
    pub(crate) break_disabled: bool,
    pub(crate) is_suppressed: bool,
    pub(crate) break_on_exception: bool,
    pub(crate) break_on_uncaught_exception: bool,
    pub(crate) side_effect_check_failed: bool,
    pub(crate) hook_on_function_call: bool,
    pub(crate) running_live_edit: bool,
    pub(crate) execution_mode: ExecutionMode,
    pub(crate) temporary_objects: Option<Arc<Mutex<TemporaryObjectsTracker>>>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Debugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debugger")
            .field("is_active", &self.is_active)
            .field("thread", &self.thread)
            .field("scopes", &self.scopes.len())
            .field("execution_mode", &self.execution_mode)
            .finish()
    }
}

impl Debugger {
    /// Creates an inactive engine with no delegate attached.
    pub fn new() -> Self {
        Self {
            registry: DebugInfoRegistry::default(),
            delegate: None,
            evaluator: None,
            thread: ThreadState::default(),
            scopes: Vec::new(),
            is_active: false,
            break_points_active: true,
            break_disabled: false,
            is_suppressed: false,
            break_on_exception: false,
            break_on_uncaught_exception: false,
            side_effect_check_failed: false,
            hook_on_function_call: false,
            running_live_edit: false,
            execution_mode: ExecutionMode::Breakpoints,
            temporary_objects: None,
        }
    }

    /// Starts building an engine with construction-time wiring.
    pub fn builder() -> DebuggerBuilder {
        DebuggerBuilder::default()
    }

    /// Whether a delegate is attached.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Attaches or detaches the debug delegate.
    ///
    /// Detaching unloads all breakpoints, stepping state, coverage, and
    /// cached hints.
    pub fn set_debug_delegate(
        &mut self,
        runtime: &mut Runtime,
        delegate: Option<Box<dyn DebugDelegate>>,
    ) {
        self.delegate = delegate;
        self.update_state(runtime);
    }

    /// Installs the breakpoint-condition evaluator.
    ///
    /// Without one, conditional breakpoints never fire.
    pub fn set_condition_evaluator(&mut self, evaluator: Option<Box<dyn ConditionEvaluator>>) {
        self.evaluator = evaluator;
    }

    /// Toggles all registered breakpoints without unregistering them.
    pub fn set_break_points_active(&mut self, active: bool) {
        self.break_points_active = active;
    }

    /// Toggles pausing on all thrown exceptions.
    pub fn set_break_on_exception(&mut self, enabled: bool) {
        self.break_on_exception = enabled;
    }

    /// Whether pausing on all thrown exceptions is enabled.
    pub fn break_on_exception(&self) -> bool {
        self.break_on_exception
    }

    /// Toggles pausing on exceptions predicted to be uncaught.
    pub fn set_break_on_uncaught_exception(&mut self, enabled: bool) {
        self.break_on_uncaught_exception = enabled;
    }

    /// Whether pausing on predicted-uncaught exceptions is enabled.
    pub fn break_on_uncaught_exception(&self) -> bool {
        self.break_on_uncaught_exception
    }

    /// Requests a pause at the next function call.
    pub fn set_break_on_next_function_call(&mut self) {
        self.thread.break_on_next_function_call = true;
        self.update_hook_on_function_call();
    }

    /// Clears a pending break-on-next-call request.
    pub fn clear_break_on_next_function_call(&mut self) {
        self.thread.break_on_next_function_call = false;
        self.update_hook_on_function_call();
    }

    /// Whether the interpreter must call [`Debugger::prepare_step_in`]
    /// before every function call.
    pub fn hook_on_function_call(&self) -> bool {
        self.hook_on_function_call
    }

    pub(crate) fn update_hook_on_function_call(&mut self) {
        self.hook_on_function_call = matches!(self.thread.last_step_action, StepAction::Into)
            || matches!(self.execution_mode, ExecutionMode::SideEffects)
            || self.thread.break_on_next_function_call;
    }

    /// The debug info of `function`, if one exists.
    ///
    /// The interpreter fetches the patchable debug copy through this while
    /// the engine is active.
    pub fn debug_info(&self, function: FunctionId) -> Option<&DebugInfo> {
        self.registry.get(function)
    }

    pub(crate) fn ignore_events(&self) -> bool {
        !self.is_active || self.is_suppressed
    }

    pub(crate) fn update_state(&mut self, runtime: &mut Runtime) {
        let is_active = self.delegate.is_some();
        if is_active == self.is_active {
            return;
        }
        if is_active {
            // Stale cached code would bypass debug instrumentation.
            runtime.set_compilation_cache_enabled(false);
        } else {
            runtime.set_compilation_cache_enabled(true);
            self.unload();
        }
        self.is_active = is_active;
        tracing::debug!(active = is_active, "debugger activation changed");
    }

    /// Drops all instrumentation and caches.
    fn unload(&mut self) {
        self.clear_all_break_points();
        self.clear_stepping();
        self.remove_all_coverage_infos();
        self.clear_all_debugger_hints();
        self.delegate = None;
    }

    /// Unregisters every breakpoint and restores all debug copies.
    pub fn clear_all_break_points(&mut self) {
        for info in self.registry.iter_mut() {
            info.clear_break_point_patches();
            info.clear_break_info();
        }
        self.registry.prune_empty();
    }

    /// Clears cached blackbox verdicts.
    pub fn clear_all_debugger_hints(&mut self) {
        for info in self.registry.iter_mut() {
            info.clear_blackboxed();
        }
        self.registry.prune_empty();
    }

    /// Attaches coverage counters to a function.
    pub fn install_coverage_info(
        &mut self,
        runtime: &Runtime,
        function: FunctionId,
        coverage: CoverageInfo,
    ) {
        let info = self
            .registry
            .get_or_create(function, runtime.function(function));
        info.set_coverage(coverage);
    }

    /// Drops all coverage counters.
    pub fn remove_all_coverage_infos(&mut self) {
        for info in self.registry.iter_mut() {
            info.clear_coverage();
        }
        self.registry.prune_empty();
    }

    /// Number of function activations from the break frame down to the
    /// outermost frame.
    ///
    /// Frames above the break frame (the debugger's own activations) are
    /// not counted.
    pub(crate) fn current_frame_count(&self, runtime: &Runtime) -> usize {
        let frames = runtime.stack().frames();
        let upto = self
            .thread
            .break_frame_id
            .and_then(|id| runtime.stack().index_of(id))
            .map(|index| index + 1)
            .unwrap_or(frames.len());
        frames[..upto].iter().map(|f| f.function_count()).sum()
    }

    /// Live-edits a script's source.
    ///
    /// Compile events are suppressed while the patch recompiles.
    #[tracing::instrument(name = "SetScriptSource", skip(self, runtime, new_source))]
    pub fn set_script_source(
        &mut self,
        runtime: &mut Runtime,
        script: ScriptId,
        new_source: &str,
        preview: bool,
    ) -> LiveEditStatus {
        self.with_debug_scope(runtime, |this, runtime| {
            this.running_live_edit = true;
            let status = runtime.patch_script(script, new_source, preview);
            this.running_live_edit = false;
            tracing::debug!(?status, "live edit finished");
            status
        })
    }

    /// Archives the per-thread debug state for a cooperative thread switch
    /// and resets it for the incoming thread.
    pub fn archive_thread(&mut self) -> ThreadSnapshot {
        debug_assert!(self.scopes.is_empty());
        let snapshot = self.thread.snapshot();
        self.thread = ThreadState::default();
        snapshot
    }

    /// Restores archived per-thread debug state and re-arms any pending
    /// step against the restored stack.
    #[tracing::instrument(name = "RestoreThread", skip_all)]
    pub fn restore_thread(&mut self, runtime: &mut Runtime, snapshot: ThreadSnapshot) {
        self.thread = ThreadState::from_snapshot(&snapshot);
        self.update_hook_on_function_call();
        self.with_debug_scope(runtime, |this, runtime| {
            this.clear_one_shot();
            if matches!(this.thread.last_step_action, StepAction::None) {
                return;
            }
            let Some(target) = this.thread.target_frame_count else {
                return;
            };
            // Re-derive the break frame: the frame at which the remaining
            // activation count matches the archived target.
            let frames = runtime.stack().frames();
            let mut count: usize = frames.iter().map(|f| f.function_count()).sum();
            let mut break_frame = None;
            for frame in frames.iter().rev() {
                if count <= target {
                    break_frame = Some(frame.id());
                    break;
                }
                count -= frame.function_count();
            }
            let Some(break_frame) = break_frame else {
                return;
            };
            this.thread.break_frame_id = Some(break_frame);
            let action = this.thread.last_step_action;
            this.prepare_step(runtime, action);
        });
    }
}

/// Builder for [`Debugger`], wiring the delegate and evaluator up front.
#[derive(Default)]
pub struct DebuggerBuilder {
    delegate: Option<Box<dyn DebugDelegate>>,
    evaluator: Option<Box<dyn ConditionEvaluator>>,
}

impl DebuggerBuilder {
    /// Sets the debug delegate.
    pub fn with_delegate(mut self, delegate: Box<dyn DebugDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Sets the breakpoint-condition evaluator.
    pub fn with_condition_evaluator(mut self, evaluator: Box<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Builds the engine and activates it against `runtime` when a
    /// delegate was provided.
    pub fn build(self, runtime: &mut Runtime) -> Debugger {
        let mut debugger = Debugger::new();
        debugger.evaluator = self.evaluator;
        debugger.set_debug_delegate(runtime, self.delegate);
        debugger
    }
}
