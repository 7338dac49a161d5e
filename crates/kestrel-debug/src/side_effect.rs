use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use kestrel_runtime::{AllocationTracker, FunctionId, FunctionInfo, ObjectId, Runtime, Value};

use crate::engine::Debugger;
use crate::error::{Error, Result};
use crate::info::{ExecutionMode, SideEffectState};

/// Objects allocated since side-effect checking started.
///
/// Writes into these are invisible to the program being debugged, so they
/// pass the runtime write checks.
#[derive(Debug, Default)]
pub(crate) struct TemporaryObjectsTracker {
    objects: HashSet<ObjectId>,
    pub(crate) disabled: bool,
}

impl TemporaryObjectsTracker {
    fn has_object(&self, id: ObjectId) -> bool {
        self.objects.contains(&id)
    }
}

impl AllocationTracker for TemporaryObjectsTracker {
    fn object_allocated(&mut self, id: ObjectId) {
        if !self.disabled {
            self.objects.insert(id);
        }
    }

    fn object_moved(&mut self, from: ObjectId, to: ObjectId) {
        // Track the move; a non-temporary object landing in a recycled slot
        // evicts whatever the slot id used to mean.
        if self.objects.remove(&from) {
            self.objects.insert(to);
        } else {
            self.objects.remove(&to);
        }
    }
}

fn classify_side_effects(function: &FunctionInfo) -> SideEffectState {
    let Some(bytecode) = function.bytecode() else {
        return SideEffectState::HasSideEffects;
    };
    let mut requires_checks = false;
    for offset in 0..bytecode.len() {
        let op = bytecode.op_at(offset);
        if op.has_unclassified_side_effects() {
            return SideEffectState::HasSideEffects;
        }
        requires_checks |= op.mutates_heap();
    }
    if requires_checks {
        SideEffectState::RequiresRuntimeChecks
    } else {
        SideEffectState::HasNoSideEffect
    }
}

impl Debugger {
    /// Enters side-effect checking mode for a restricted evaluation.
    ///
    /// All applied breakpoint patches are swapped for write-check traps,
    /// and a fresh temporary-objects tracker starts observing the heap.
    #[tracing::instrument(name = "StartSideEffectCheckMode", skip_all)]
    pub fn start_side_effect_check_mode(&mut self, runtime: &mut Runtime) {
        debug_assert!(matches!(self.execution_mode, ExecutionMode::Breakpoints));
        self.execution_mode = ExecutionMode::SideEffects;
        self.update_hook_on_function_call();
        self.side_effect_check_failed = false;
        debug_assert!(self.temporary_objects.is_none());
        let tracker = Arc::new(Mutex::new(TemporaryObjectsTracker::default()));
        runtime
            .heap_mut()
            .set_allocation_tracker(Some(tracker.clone()));
        self.temporary_objects = Some(tracker);
        self.update_debug_infos_for_execution_mode();
    }

    /// Leaves side-effect checking mode.
    ///
    /// A failed check during the evaluation surfaces here as
    /// [`Error::SideEffectViolation`], with the termination request it
    /// raised cleared.
    #[tracing::instrument(name = "StopSideEffectCheckMode", skip_all)]
    pub fn stop_side_effect_check_mode(&mut self, runtime: &mut Runtime) -> Result<()> {
        debug_assert!(matches!(self.execution_mode, ExecutionMode::SideEffects));
        let failed = self.side_effect_check_failed;
        if failed {
            runtime.clear_terminate_request();
        }
        self.execution_mode = ExecutionMode::Breakpoints;
        self.update_hook_on_function_call();
        self.side_effect_check_failed = false;
        runtime.heap_mut().set_allocation_tracker(None);
        self.temporary_objects = None;
        self.update_debug_infos_for_execution_mode();
        if failed {
            return Err(Error::SideEffectViolation);
        }
        Ok(())
    }

    /// Suspends or resumes temporary-object tracking, for host phases whose
    /// allocations must not count as temporaries.
    pub fn set_temporary_object_tracking_disabled(&mut self, disabled: bool) {
        if let Some(tracker) = &self.temporary_objects {
            if let Ok(mut tracker) = tracker.lock() {
                tracker.disabled = disabled;
            }
        }
    }

    /// Swaps every instrumented debug copy to the patch set of the current
    /// execution mode.
    pub(crate) fn update_debug_infos_for_execution_mode(&mut self) {
        let mode = self.execution_mode;
        for info in self.registry.iter_mut() {
            if !info.has_instrumented_bytecode() || info.execution_mode() == mode {
                continue;
            }
            match mode {
                ExecutionMode::Breakpoints => {
                    info.clear_side_effect_checks();
                    info.apply_break_points();
                }
                ExecutionMode::SideEffects => {
                    info.clear_break_point_patches();
                    info.apply_side_effect_checks();
                }
            }
        }
    }

    /// Checks whether `function` may run during a restricted evaluation.
    ///
    /// Functions that only mutate the heap get their write sites trapped
    /// and are allowed through; anything unclassifiable fails the
    /// evaluation.
    pub fn perform_side_effect_check(
        &mut self,
        runtime: &mut Runtime,
        function: FunctionId,
        receiver: &Value,
    ) -> bool {
        debug_assert!(matches!(self.execution_mode, ExecutionMode::SideEffects));
        if !runtime.function(function).is_compiled() && !runtime.compile(function) {
            return false;
        }
        let state = {
            let cached = self
                .registry
                .get(function)
                .map(|info| info.cached_side_effect_state())
                .unwrap_or_default();
            if matches!(cached, SideEffectState::NotComputed) {
                let computed = classify_side_effects(runtime.function(function));
                let info = self
                    .registry
                    .get_or_create(function, runtime.function(function));
                info.cache_side_effect_state(computed);
                computed
            } else {
                cached
            }
        };
        match state {
            SideEffectState::HasSideEffects => {
                tracing::debug!(?function, "callee has side effects");
                self.side_effect_check_failed = true;
                runtime.request_terminate_execution();
                false
            }
            SideEffectState::RequiresRuntimeChecks => {
                if runtime.function(function).bytecode().is_none() {
                    return self.perform_side_effect_check_for_object(runtime, receiver);
                }
                if !self.ensure_break_info(runtime, function) {
                    return false;
                }
                self.prepare_function_for_debug_execution(runtime, function);
                if let Some(info) = self.registry.get_mut(function) {
                    info.apply_side_effect_checks();
                }
                true
            }
            SideEffectState::HasNoSideEffect => true,
            SideEffectState::NotComputed => unreachable!("state just computed"),
        }
    }

    /// Resolves a write-check trap hit by the interpreter: reads the
    /// written-to object out of the trapped instruction's register operand
    /// and checks it.
    pub(crate) fn perform_side_effect_check_at_bytecode(&mut self, runtime: &mut Runtime) -> bool {
        debug_assert!(matches!(self.execution_mode, ExecutionMode::SideEffects));
        let Some(frame) = runtime.stack().top() else {
            return false;
        };
        let summary = *frame.top_summary();
        let object = {
            let Some(original) = self
                .registry
                .get(summary.function)
                .and_then(|info| info.original_bytecode())
            else {
                return true;
            };
            debug_assert!(original.op_at(summary.code_offset).mutates_heap());
            let instruction = original.instruction(summary.code_offset);
            frame
                .register(instruction.a)
                .cloned()
                .unwrap_or(Value::Undefined)
        };
        self.perform_side_effect_check_for_object(runtime, &object)
    }

    /// Checks whether writing into `object` is allowed during a restricted
    /// evaluation.
    ///
    /// Primitives and objects allocated during the evaluation pass, unless
    /// the object carries embedder fields the engine cannot see through.
    pub fn perform_side_effect_check_for_object(
        &mut self,
        runtime: &mut Runtime,
        object: &Value,
    ) -> bool {
        debug_assert!(matches!(self.execution_mode, ExecutionMode::SideEffects));
        let allowed = match object {
            Value::Number(_) | Value::Name(_) => true,
            Value::Object(id) => {
                let embedder_fields = runtime
                    .heap()
                    .object(*id)
                    .map(|info| info.embedder_field_count)
                    .unwrap_or(0);
                embedder_fields == 0
                    && self.temporary_objects.as_ref().is_some_and(|tracker| {
                        tracker
                            .lock()
                            .map(|tracker| tracker.has_object(*id))
                            .unwrap_or(false)
                    })
            }
            _ => false,
        };
        if allowed {
            return true;
        }
        tracing::debug!(?object, "write to a pre-existing object");
        self.side_effect_check_failed = true;
        runtime.request_terminate_execution();
        false
    }

    /// Checks a host callback about to run during a restricted evaluation.
    ///
    /// `side_effect_free` is the host's own declaration for the callback.
    pub fn perform_side_effect_check_for_host_callback(
        &mut self,
        runtime: &mut Runtime,
        side_effect_free: bool,
    ) -> bool {
        debug_assert!(matches!(self.execution_mode, ExecutionMode::SideEffects));
        if side_effect_free {
            return true;
        }
        self.side_effect_check_failed = true;
        runtime.request_terminate_execution();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn moves_follow_temporaries() {
        let mut tracker = TemporaryObjectsTracker::default();
        tracker.object_allocated(ObjectId(1));
        tracker.object_moved(ObjectId(1), ObjectId(7));

        assert!(!tracker.has_object(ObjectId(1)));
        assert!(tracker.has_object(ObjectId(7)));
    }

    #[test_log::test]
    fn a_foreign_move_evicts_the_target_slot() {
        let mut tracker = TemporaryObjectsTracker::default();
        tracker.object_allocated(ObjectId(7));
        // A pre-existing object compacted into the freed temporary's slot.
        tracker.object_moved(ObjectId(3), ObjectId(7));

        assert!(!tracker.has_object(ObjectId(7)));
    }

    #[test_log::test]
    fn disabled_tracking_ignores_allocations() {
        let mut tracker = TemporaryObjectsTracker::default();
        tracker.disabled = true;
        tracker.object_allocated(ObjectId(1));
        tracker.disabled = false;
        tracker.object_allocated(ObjectId(2));

        assert!(!tracker.has_object(ObjectId(1)));
        assert!(tracker.has_object(ObjectId(2)));
    }
}
