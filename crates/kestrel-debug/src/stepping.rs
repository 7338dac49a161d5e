use kestrel_runtime::{FrameId, FunctionId, ObjectId, Runtime, Value};
use serde::{Deserialize, Serialize};

use crate::breakpoints::BreakpointId;
use crate::delegate::BreakResume;
use crate::engine::Debugger;
use crate::error::Result;
use crate::info::ExecutionMode;
use crate::location::BreakLocation;

/// A stepping command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepAction {
    /// No step pending.
    #[default]
    None,
    /// Run until the current function returns to its caller.
    Out,
    /// Run to the next statement in the current function or its callers.
    Over,
    /// Run to the next statement, entering callees.
    Into,
}

/// Per-thread stepping and pause state.
#[derive(Debug, Default)]
pub(crate) struct ThreadState {
    pub(crate) last_step_action: StepAction,
    /// Statement the last pause sat in; a step completes on leaving it.
    pub(crate) last_statement_position: Option<u32>,
    pub(crate) last_frame_count: Option<usize>,
    /// Activation count the pending step must not exceed to complete.
    pub(crate) target_frame_count: Option<usize>,
    /// Set while a step-out runs to the nearest return site first.
    pub(crate) fast_forward_to_return: bool,
    /// Function whose calls a step-out must not step back into.
    pub(crate) ignore_step_into_function: Option<FunctionId>,
    pub(crate) break_frame_id: Option<FrameId>,
    /// Generator whose resumption continues a pending step-in.
    pub(crate) suspended_generator: Option<ObjectId>,
    pub(crate) break_on_next_function_call: bool,
    pub(crate) next_breakpoint_id: u32,
}

impl ThreadState {
    pub(crate) fn allocate_breakpoint_id(&mut self) -> BreakpointId {
        self.next_breakpoint_id += 1;
        BreakpointId(self.next_breakpoint_id)
    }

    pub(crate) fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            last_step_action: self.last_step_action,
            last_statement_position: self.last_statement_position,
            last_frame_count: self.last_frame_count,
            target_frame_count: self.target_frame_count,
            fast_forward_to_return: self.fast_forward_to_return,
            ignore_step_into_function: self.ignore_step_into_function,
            break_frame_id: self.break_frame_id,
            suspended_generator: self.suspended_generator,
            break_on_next_function_call: self.break_on_next_function_call,
            next_breakpoint_id: self.next_breakpoint_id,
        }
    }

    pub(crate) fn from_snapshot(snapshot: &ThreadSnapshot) -> Self {
        Self {
            last_step_action: snapshot.last_step_action,
            last_statement_position: snapshot.last_statement_position,
            last_frame_count: snapshot.last_frame_count,
            target_frame_count: snapshot.target_frame_count,
            fast_forward_to_return: snapshot.fast_forward_to_return,
            ignore_step_into_function: snapshot.ignore_step_into_function,
            break_frame_id: snapshot.break_frame_id,
            suspended_generator: snapshot.suspended_generator,
            break_on_next_function_call: snapshot.break_on_next_function_call,
            next_breakpoint_id: snapshot.next_breakpoint_id,
        }
    }
}

/// Serializable archive of the per-thread debug state, for cooperative
/// thread switches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    last_step_action: StepAction,
    last_statement_position: Option<u32>,
    last_frame_count: Option<usize>,
    target_frame_count: Option<usize>,
    fast_forward_to_return: bool,
    ignore_step_into_function: Option<FunctionId>,
    break_frame_id: Option<FrameId>,
    suspended_generator: Option<ObjectId>,
    break_on_next_function_call: bool,
    next_breakpoint_id: u32,
}

impl Debugger {
    /// Entry point for a `DebugBreak` patch or `debugger;` statement hit by
    /// the interpreter.
    ///
    /// Dispatches on the current execution mode: under side-effect checking
    /// the trap is a write check; otherwise it is a breakpoint or step
    /// candidate.
    pub fn handle_debug_break(&mut self, runtime: &mut Runtime) -> Result<()> {
        if self.break_disabled {
            return Ok(());
        }
        match self.execution_mode {
            ExecutionMode::SideEffects => {
                self.perform_side_effect_check_at_bytecode(runtime);
                Ok(())
            }
            ExecutionMode::Breakpoints => {
                self.break_hit(runtime);
                Ok(())
            }
        }
    }

    /// Resolves a break in breakpoint mode: fires matching breakpoints,
    /// completes or re-arms a pending step, or swallows the break.
    #[tracing::instrument(name = "Break", skip_all)]
    pub(crate) fn break_hit(&mut self, runtime: &mut Runtime) {
        if runtime.stack().top().is_none() {
            return;
        }
        self.with_debug_scope(runtime, |this, runtime| {
            this.with_break_disabled(|this| this.break_hit_in_scope(runtime));
        });
    }

    fn break_hit_in_scope(&mut self, runtime: &mut Runtime) {
        let Some(frame) = runtime.stack().top() else {
            return;
        };
        let function = frame.top_summary().function;
        if !self.ensure_break_info(runtime, function) {
            return;
        }
        self.prepare_function_for_debug_execution(runtime, function);

        let location = {
            let Some(info) = self.registry.get(function) else {
                unreachable!("break info just ensured")
            };
            let Some(frame) = runtime.stack().top() else {
                return;
            };
            BreakLocation::from_frame(info, frame)
        };

        let (_, hits) = self.check_break_points(runtime, function, &location);
        if !hits.is_empty() || self.thread.break_on_next_function_call {
            let last_step_action = self.thread.last_step_action;
            self.clear_stepping();
            self.on_debug_break(runtime, hits, last_step_action);
            return;
        }

        // An entry break without a matching breakpoint has nothing further
        // to resolve.
        if location.is_entry() {
            return;
        }

        let current_frame_count = self.current_frame_count(runtime);

        if self.thread.fast_forward_to_return {
            debug_assert!(location.is_return_or_suspend());
            // Ignore the return sites of deeper recursive activations.
            if self
                .thread
                .target_frame_count
                .is_some_and(|target| current_frame_count > target)
            {
                return;
            }
            self.clear_stepping();
            self.prepare_step(runtime, StepAction::Out);
            return;
        }

        let step_action = self.thread.last_step_action;
        let step_break = match step_action {
            StepAction::None => return,
            StepAction::Out
                if self
                    .thread
                    .target_frame_count
                    .is_some_and(|target| current_frame_count > target) =>
            {
                return;
            }
            StepAction::Out => true,
            StepAction::Over | StepAction::Into => {
                if matches!(step_action, StepAction::Over)
                    && self
                        .thread
                        .target_frame_count
                        .is_some_and(|target| current_frame_count > target)
                {
                    return;
                }
                // A suspend parks the step until the generator resumes,
                // except for the implicit initial yield (suspend id 0),
                // which reports back to the caller like a normal return.
                if location.is_suspend()
                    && (!runtime.function(function).is_generator()
                        || location.generator_suspend_id.is_some_and(|id| id > 0))
                {
                    self.suspend_stepping_until_resume(runtime, &location);
                    return;
                }
                let statement_position = self
                    .registry
                    .get(function)
                    .and_then(|info| info.original_bytecode())
                    .and_then(|bytecode| bytecode.statement_position(location.code_offset));
                location.is_return()
                    || Some(current_frame_count) != self.thread.last_frame_count
                    || self.thread.last_statement_position != statement_position
            }
        };

        let last_step_action = self.thread.last_step_action;
        self.clear_stepping();
        if step_break {
            self.on_debug_break(runtime, Vec::new(), last_step_action);
        } else {
            self.prepare_step(runtime, last_step_action);
        }
    }

    /// Parks a pending step until the suspending generator resumes.
    fn suspend_stepping_until_resume(&mut self, runtime: &Runtime, location: &BreakLocation) {
        debug_assert!(self.thread.suspended_generator.is_none());
        let generator = location.generator_register.and_then(|register| {
            runtime.stack().top().and_then(|frame| match frame.register(register) {
                Some(Value::Object(id)) => Some(*id),
                _ => None,
            })
        });
        self.clear_stepping();
        self.thread.suspended_generator = generator;
    }

    /// Reports a pause to the delegate and applies its resume decision.
    pub(crate) fn on_debug_break(
        &mut self,
        runtime: &mut Runtime,
        hits: Vec<BreakpointId>,
        last_step_action: StepAction,
    ) {
        debug_assert!(self.in_debug_scope());
        if self.ignore_events() || self.delegate.is_none() {
            return;
        }
        self.with_break_disabled(|this| {
            // A paused location the embedder wants skipped re-arms the step
            // instead of surfacing.
            if matches!(last_step_action, StepAction::Over | StepAction::Into)
                && this.should_be_skipped(runtime)
            {
                this.prepare_step(runtime, last_step_action);
                return;
            }
            let resume = {
                let Some(mut delegate) = this.delegate.take() else {
                    return;
                };
                let resume = delegate.break_program_requested(runtime, &hits);
                this.delegate = Some(delegate);
                resume
            };
            tracing::debug!(?hits, ?resume, "break reported");
            match resume {
                BreakResume::Continue => {}
                BreakResume::Step(action) => this.prepare_step(runtime, action),
                BreakResume::Terminate => {
                    if this.set_terminate_on_resume().is_err() {
                        unreachable!("debug scope open during break dispatch")
                    }
                }
            }
        });
    }

    /// Arms a stepping command against the current break frame.
    #[tracing::instrument(name = "PrepareStep", skip(self, runtime))]
    pub fn prepare_step(&mut self, runtime: &mut Runtime, step_action: StepAction) {
        debug_assert!(self.in_debug_scope());
        if matches!(step_action, StepAction::None) {
            return;
        }
        let Some(break_frame_id) = self.thread.break_frame_id else {
            return;
        };
        let Some(frame_index) = runtime.stack().index_of(break_frame_id) else {
            return;
        };

        self.thread.last_step_action = step_action;
        self.update_hook_on_function_call();

        let (function, code_offset) = {
            let summary = runtime.stack().frames()[frame_index].top_summary();
            (summary.function, summary.code_offset)
        };
        if !self.ensure_break_info(runtime, function) {
            return;
        }
        self.prepare_function_for_debug_execution(runtime, function);

        let location = {
            let Some(info) = self.registry.get(function) else {
                unreachable!("break info just ensured")
            };
            BreakLocation::from_frame(info, &runtime.stack().frames()[frame_index])
        };

        // Any step at a return is a step-out; a step at a suspend behaves
        // like a return for step-out and for the implicit initial yield.
        let mut step_action = step_action;
        let is_generator = runtime.function(function).is_generator();
        if location.is_return()
            || (location.is_suspend()
                && (matches!(step_action, StepAction::Out)
                    || (is_generator && location.generator_suspend_id == Some(0))))
        {
            if matches!(step_action, StepAction::Out) {
                // Further calls of this function must not be stepped back
                // into while unwinding.
                self.thread.ignore_step_into_function = Some(function);
            }
            step_action = StepAction::Out;
            self.thread.last_step_action = StepAction::Into;
        }
        self.update_hook_on_function_call();

        // A step-over in a blackboxed function is a step-out.
        if matches!(step_action, StepAction::Over) && self.is_blackboxed(runtime, function) {
            step_action = StepAction::Out;
        }

        let current_frame_count = self.current_frame_count(runtime);
        self.thread.last_statement_position = self
            .registry
            .get(function)
            .and_then(|info| info.original_bytecode())
            .and_then(|bytecode| bytecode.statement_position(code_offset));
        self.thread.last_frame_count = Some(current_frame_count);
        self.thread.suspended_generator = None;

        match step_action {
            StepAction::None => unreachable!("pending step already filtered"),
            StepAction::Out => {
                // Where the step lands does not depend on where it started.
                self.thread.last_statement_position = None;
                self.thread.last_frame_count = None;
                if !location.is_return_or_suspend() && !self.is_blackboxed(runtime, function) {
                    // Not at a return yet: flood the return sites and repeat
                    // the step-out from whichever fires first.
                    self.thread.target_frame_count = Some(current_frame_count);
                    self.thread.fast_forward_to_return = true;
                    self.flood_with_one_shot(runtime, function, true);
                    return;
                }
                self.step_out_of_frame(runtime, frame_index, current_frame_count);
            }
            StepAction::Over => {
                self.thread.target_frame_count = Some(current_frame_count);
                self.flood_with_one_shot(runtime, function, false);
            }
            StepAction::Into => {
                self.flood_with_one_shot(runtime, function, false);
            }
        }
    }

    /// Floods the first non-blackboxed activation below the break frame
    /// with one-shots.
    fn step_out_of_frame(
        &mut self,
        runtime: &mut Runtime,
        frame_index: usize,
        current_frame_count: usize,
    ) {
        let activations: Vec<(Vec<FunctionId>, bool)> = runtime.stack().frames()[..=frame_index]
            .iter()
            .rev()
            .map(|frame| {
                let functions = frame.summaries().iter().map(|s| s.function).collect();
                (functions, frame.function_count() > 1)
            })
            .collect();

        let mut in_current_frame = true;
        let mut count = current_frame_count;
        for (functions, inlined) in activations {
            for function in functions.into_iter().rev() {
                if in_current_frame {
                    in_current_frame = false;
                } else {
                    if inlined {
                        // Inlined activations cannot take patches until the
                        // frame rematerializes interpreted.
                        runtime.deoptimize_function(function);
                    }
                    if !self.is_blackboxed(runtime, function) {
                        self.flood_with_one_shot(runtime, function, false);
                        self.thread.target_frame_count = Some(count);
                        return;
                    }
                }
                count = count.saturating_sub(1);
            }
        }
    }

    /// Continues a pending step-in into `function`, about to be called.
    ///
    /// The interpreter calls this before every call while
    /// [`Debugger::hook_on_function_call`] holds.
    pub fn prepare_step_in(&mut self, runtime: &mut Runtime, function: FunctionId) {
        debug_assert!(
            matches!(self.thread.last_step_action, StepAction::Into)
                || self.thread.break_on_next_function_call
        );
        if self.ignore_events() || self.in_debug_scope() || self.break_disabled {
            return;
        }
        if self.is_blackboxed(runtime, function) {
            return;
        }
        if self.thread.ignore_step_into_function == Some(function) {
            return;
        }
        self.thread.ignore_step_into_function = None;
        self.flood_with_one_shot(runtime, function, false);
    }

    /// Whether a step is parked on a suspended generator.
    pub fn has_suspended_generator(&self) -> bool {
        self.thread.suspended_generator.is_some()
    }

    /// Continues a step parked across a generator suspension; called when
    /// the runtime resumes the generator.
    pub fn prepare_step_in_suspended_generator(&mut self, runtime: &mut Runtime) {
        debug_assert!(self.has_suspended_generator());
        if self.ignore_events() || self.in_debug_scope() || self.break_disabled {
            return;
        }
        self.thread.last_step_action = StepAction::Into;
        self.update_hook_on_function_call();
        let function = self
            .thread
            .suspended_generator
            .and_then(|object| runtime.heap().object(object))
            .and_then(|info| info.generator_function);
        if let Some(function) = function {
            self.flood_with_one_shot(runtime, function, false);
        }
        self.thread.suspended_generator = None;
    }

    /// Re-arms a pending step across an unwinding throw.
    ///
    /// One-shots in the frames being unwound would never fire again; the
    /// handler frame gets flooded instead, honoring a pending step-over or
    /// step-out's depth bound.
    #[tracing::instrument(name = "PrepareStepOnThrow", skip_all)]
    pub(crate) fn prepare_step_on_throw(&mut self, runtime: &mut Runtime) {
        if matches!(self.thread.last_step_action, StepAction::None) {
            return;
        }
        if self.ignore_events() || self.in_debug_scope() || self.break_disabled {
            return;
        }

        self.clear_one_shot();

        let activation_has_handler = |runtime: &Runtime, function: FunctionId, offset: usize| {
            runtime
                .function(function)
                .bytecode()
                .is_some_and(|bytecode| bytecode.handler_for(offset).is_some())
        };

        let frames: Vec<Vec<(FunctionId, usize)>> = runtime
            .stack()
            .frames()
            .iter()
            .rev()
            .map(|frame| {
                frame
                    .summaries()
                    .iter()
                    .map(|s| (s.function, s.code_offset))
                    .collect()
            })
            .collect();

        // Find the topmost frame that will catch the unwinding throw.
        let mut count = self.current_frame_count(runtime);
        let mut handler_frame = None;
        for (index, summaries) in frames.iter().enumerate() {
            if summaries
                .iter()
                .any(|&(function, offset)| activation_has_handler(runtime, function, offset))
            {
                handler_frame = Some(index);
                break;
            }
            count = count.saturating_sub(summaries.len());
        }
        let Some(handler_frame) = handler_frame else {
            return;
        };

        let last_step_action = self.thread.last_step_action;
        let mut found_handler = false;
        for summaries in &frames[handler_frame..] {
            let inlined = summaries.len() > 1;
            for &(function, code_offset) in summaries.iter().rev() {
                if !found_handler {
                    // An inlined frame needs the catching activation pinned
                    // down; a plain frame is the handler itself.
                    found_handler =
                        !inlined || activation_has_handler(runtime, function, code_offset);
                }
                if found_handler {
                    if matches!(last_step_action, StepAction::Into) {
                        runtime.deoptimize_function(function);
                    }
                    let too_deep = matches!(
                        last_step_action,
                        StepAction::Out | StepAction::Over
                    ) && self
                        .thread
                        .target_frame_count
                        .is_some_and(|target| count > target);
                    if !too_deep && !self.is_blackboxed(runtime, function) {
                        self.flood_with_one_shot(runtime, function, false);
                        return;
                    }
                }
                count = count.saturating_sub(1);
            }
        }
    }

    /// Floods every breakable position of `function` with one-shot breaks.
    ///
    /// One-shots are patches without table entries; the next
    /// [`Debugger::clear_one_shot`] restores the patch set to the
    /// registered breakpoints.
    pub(crate) fn flood_with_one_shot(
        &mut self,
        runtime: &mut Runtime,
        function: FunctionId,
        returns_only: bool,
    ) {
        if self.is_blackboxed(runtime, function) {
            return;
        }
        if !self.ensure_break_info(runtime, function) {
            return;
        }
        self.prepare_function_for_debug_execution(runtime, function);
        let Some(info) = self.registry.get_mut(function) else {
            return;
        };
        let offsets = info.breakable_offsets(returns_only);
        for offset in offsets {
            info.set_debug_break(offset);
        }
    }

    /// Restores every debug copy to its registered breakpoints, dropping
    /// one-shot floods.
    pub(crate) fn clear_one_shot(&mut self) {
        for info in self.registry.iter_mut() {
            if !info.has_break_info() {
                continue;
            }
            info.clear_break_point_patches();
            info.apply_break_points();
        }
    }

    /// Drops all stepping state and one-shot floods.
    pub fn clear_stepping(&mut self) {
        self.clear_one_shot();
        self.thread.last_step_action = StepAction::None;
        self.thread.last_statement_position = None;
        self.thread.last_frame_count = None;
        self.thread.target_frame_count = None;
        self.thread.fast_forward_to_return = false;
        self.thread.ignore_step_into_function = None;
        self.thread.suspended_generator = None;
        self.thread.break_on_next_function_call = false;
        self.update_hook_on_function_call();
    }
}
