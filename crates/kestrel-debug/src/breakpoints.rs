use kestrel_runtime::{FunctionId, FunctionInfo, Opcode, Runtime, ScriptId};

use crate::engine::Debugger;
use crate::info::DebugInfo;
use crate::location::{BreakIterator, BreakLocation};

/// Identifier of a registered breakpoint, unique per thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(pub u32);

/// A registered breakpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Breakpoint {
    /// The breakpoint id.
    pub id: BreakpointId,
    /// Optional hit condition. Empty or absent conditions always hit.
    pub condition: Option<String>,
}

/// Whether breaks at `location` would find this breakpoint armed.
///
/// Checks the actual patch state, not just the registration table, so a
/// stale table entry without an applied patch never fires.
fn location_has_break_point(info: &DebugInfo, location: &BreakLocation) -> bool {
    if location.is_entry() {
        return info.break_at_entry();
    }
    if !info.has_break_point_at(location.position) {
        return false;
    }
    if location.is_debugger_statement() {
        return true;
    }
    match info.debug_bytecode() {
        Some(bytecode) => matches!(bytecode.op_at(location.code_offset), Opcode::DebugBreak),
        None => false,
    }
}

/// Innermost-function search over the revealed functions of a script.
struct FunctionRangeFinder {
    position: u32,
    current: Option<FunctionId>,
    current_start: u32,
    current_end: u32,
    current_has_closure: bool,
    current_top_level: bool,
}

impl FunctionRangeFinder {
    fn new(position: u32) -> Self {
        Self {
            position,
            current: None,
            current_start: 0,
            current_end: 0,
            current_has_closure: false,
            current_top_level: false,
        }
    }

    fn consider(&mut self, id: FunctionId, info: &FunctionInfo) {
        if !info.is_subject_to_debugging() {
            return;
        }
        if info.start_position > self.position || self.position >= info.end_position {
            return;
        }
        if self.current.is_some() {
            if info.start_position == self.current_start && info.end_position == self.current_end {
                // Same source range: prefer a candidate with a live
                // closure, then a non-top-level one.
                if self.current_has_closure && !info.has_closure {
                    return;
                }
                if self.current_has_closure == info.has_closure
                    && (!self.current_top_level || info.top_level)
                {
                    return;
                }
            } else if info.start_position < self.current_start
                || self.current_end < info.end_position
            {
                // Outer than the current candidate.
                return;
            }
        }
        self.current = Some(id);
        self.current_start = info.start_position;
        self.current_end = info.end_position;
        self.current_has_closure = info.has_closure;
        self.current_top_level = info.top_level;
    }

    fn result(&self) -> Option<FunctionId> {
        self.current
    }
}

impl Debugger {
    /// Registers `breakpoint` in `function` as close to `source_position`
    /// as possible and returns the resolved position.
    ///
    /// Resolution is idempotent: re-requesting the resolved position
    /// resolves to itself.
    #[tracing::instrument(name = "SetBreakpoint", skip(self, runtime, breakpoint))]
    pub fn set_breakpoint(
        &mut self,
        runtime: &mut Runtime,
        function: FunctionId,
        breakpoint: Breakpoint,
        source_position: u32,
    ) -> Option<u32> {
        if !self.ensure_break_info(runtime, function) {
            return None;
        }
        self.prepare_function_for_debug_execution(runtime, function);
        let Some(info) = self.registry.get_mut(function) else {
            unreachable!("break info just ensured")
        };
        let resolved = info.find_breakable_position(source_position);
        info.set_break_point(resolved, breakpoint);
        debug_assert!(info.break_point_count() > 0);
        // Re-derive the whole patch set rather than patching in place.
        info.clear_break_point_patches();
        info.apply_break_points();
        tracing::debug!(resolved, "breakpoint applied");
        Some(resolved)
    }

    /// Sets a breakpoint at the first breakable position of `function`.
    pub fn set_breakpoint_for_function(
        &mut self,
        runtime: &mut Runtime,
        function: FunctionId,
        condition: Option<String>,
    ) -> Option<BreakpointId> {
        let id = self.thread.allocate_breakpoint_id();
        let breakpoint = Breakpoint { id, condition };
        self.set_breakpoint(runtime, function, breakpoint, 0)
            .map(|_| id)
    }

    /// Sets a breakpoint in `script` near `source_position` and returns the
    /// breakpoint id with the resolved position.
    ///
    /// Locates the innermost function containing the position, compiling
    /// lazily as needed to reveal nested functions, and narrows to the
    /// nested function whose breakable position lands closest.
    #[tracing::instrument(name = "SetBreakpointForScript", skip(self, runtime, condition))]
    pub fn set_breakpoint_for_script(
        &mut self,
        runtime: &mut Runtime,
        script: ScriptId,
        condition: Option<String>,
        source_position: u32,
    ) -> Option<(BreakpointId, u32)> {
        let id = self.thread.allocate_breakpoint_id();
        let breakpoint = Breakpoint { id, condition };

        let innermost = self.find_innermost_containing_function_info(
            runtime,
            script,
            source_position,
        )?;
        if !self.ensure_break_info(runtime, innermost) {
            return None;
        }
        self.prepare_function_for_debug_execution(runtime, innermost);

        let position = source_position.max(runtime.function(innermost).start_position);
        let target = self.find_closest_function_from_position(runtime, innermost, position)?;
        let resolved = self.set_breakpoint(runtime, target, breakpoint, position)?;
        Some((id, resolved))
    }

    /// Unregisters the breakpoint with `id` everywhere it is applied.
    #[tracing::instrument(name = "RemoveBreakpoint", skip(self))]
    pub fn remove_breakpoint(&mut self, id: BreakpointId) {
        for function in self.registry.functions() {
            let Some(info) = self.registry.get_mut(function) else {
                continue;
            };
            if !info.has_break_info() || !info.clear_break_point(id) {
                continue;
            }
            info.clear_break_point_patches();
            if info.break_point_count() == 0 {
                self.remove_break_info_and_maybe_free(function);
            } else if let Some(info) = self.registry.get_mut(function) {
                info.apply_break_points();
            }
            return;
        }
    }

    /// Source positions of all breakpoints registered in `function`, one
    /// entry per breakpoint.
    pub fn source_break_positions(&self, function: FunctionId) -> Vec<u32> {
        self.registry
            .get(function)
            .filter(|info| info.has_break_info())
            .map(|info| info.break_point_positions())
            .unwrap_or_default()
    }

    /// All breakable positions of `script` within `start..end`.
    ///
    /// With `restrict_to_function`, only that function is scanned.
    pub fn get_possible_breakpoints(
        &mut self,
        runtime: &mut Runtime,
        script: ScriptId,
        start: u32,
        end: u32,
        restrict_to_function: Option<FunctionId>,
    ) -> Option<Vec<BreakLocation>> {
        let functions = match restrict_to_function {
            Some(function) => vec![function],
            None => self.find_functions_intersecting_range(runtime, script, start, end)?,
        };
        let mut locations = Vec::new();
        for function in functions {
            if !self.ensure_break_info(runtime, function) {
                return None;
            }
            self.prepare_function_for_debug_execution(runtime, function);
            let Some(info) = self.registry.get(function) else {
                continue;
            };
            if info.can_break_at_entry() {
                continue;
            }
            let mut it = BreakIterator::new(info);
            while !it.done() {
                if it.position() >= start && it.position() < end {
                    locations.push(it.location());
                }
                it.next();
            }
        }
        Some(locations)
    }

    /// Whether all breakpoints at the statement the top frame is paused in
    /// have conditions and none of them matched.
    pub fn is_muted_at_current_location(&mut self, runtime: &mut Runtime) -> bool {
        let (function, locations) = {
            let Some(frame) = runtime.stack().top() else {
                return false;
            };
            let function = frame.top_summary().function;
            let Some(info) = self.registry.get(function) else {
                return false;
            };
            if !info.has_break_info() {
                return false;
            }
            (function, BreakLocation::all_at_current_statement(info, frame))
        };
        let mut found_any = false;
        for location in &locations {
            let (has_break_points, hits) = self.check_break_points(runtime, function, location);
            if has_break_points && !hits.is_empty() {
                return false;
            }
            found_any |= has_break_points;
        }
        found_any
    }

    /// Evaluates the breakpoints armed at `location`.
    ///
    /// Returns whether any breakpoint is armed there while breakpoints are
    /// active, and the ids of those whose conditions matched.
    pub(crate) fn check_break_points(
        &mut self,
        runtime: &mut Runtime,
        function: FunctionId,
        location: &BreakLocation,
    ) -> (bool, Vec<BreakpointId>) {
        let (has_break_points, candidates) = {
            let Some(info) = self.registry.get(function) else {
                return (false, Vec::new());
            };
            if !info.has_break_info() {
                return (false, Vec::new());
            }
            let has = self.break_points_active && location_has_break_point(info, location);
            if has {
                (true, info.break_points_at(location.position).to_vec())
            } else {
                (false, Vec::new())
            }
        };
        let is_entry = location.is_entry();
        let hits = candidates
            .iter()
            .filter(|breakpoint| self.check_break_point(runtime, breakpoint, is_entry))
            .map(|breakpoint| breakpoint.id)
            .collect();
        (has_break_points, hits)
    }

    fn check_break_point(
        &mut self,
        runtime: &mut Runtime,
        breakpoint: &Breakpoint,
        is_entry: bool,
    ) -> bool {
        let Some(condition) = breakpoint
            .condition
            .as_deref()
            .filter(|condition| !condition.is_empty())
        else {
            return true;
        };
        let frame = self.thread.break_frame_id;
        let Some(evaluator) = self.evaluator.as_mut() else {
            tracing::debug!(breakpoint = ?breakpoint.id, "no condition evaluator installed");
            return false;
        };
        match evaluator.evaluate(runtime, frame, condition, is_entry) {
            Ok(value) => value.boolean_value(),
            Err(error) => {
                // A throwing condition is swallowed and counts as no hit.
                tracing::debug!(%error, breakpoint = ?breakpoint.id, "condition threw");
                false
            }
        }
    }

    pub(crate) fn ensure_break_info(&mut self, runtime: &mut Runtime, function: FunctionId) -> bool {
        if let Some(info) = self.registry.get(function) {
            if info.has_break_info() {
                return true;
            }
        }
        let can_break_at_entry = !runtime.function(function).is_subject_to_debugging();
        if !runtime.function(function).is_compiled() && !runtime.compile(function) {
            return false;
        }
        let info = self
            .registry
            .get_or_create(function, runtime.function(function));
        info.create_break_info(can_break_at_entry);
        true
    }

    /// Installs the patchable bytecode copy and forces interpreted
    /// execution so patches take effect.
    pub(crate) fn prepare_function_for_debug_execution(
        &mut self,
        runtime: &mut Runtime,
        function: FunctionId,
    ) {
        let bytecode = runtime.function(function).bytecode().cloned();
        let Some(info) = self.registry.get_mut(function) else {
            unreachable!("debug info missing for prepared function")
        };
        debug_assert!(info.has_break_info());
        if info.is_prepared_for_debug_execution() {
            return;
        }
        if let Some(bytecode) = &bytecode {
            info.install_instrumented(bytecode);
        }
        let entry_only = info.can_break_at_entry();
        info.mark_prepared_for_debug_execution();
        if !entry_only {
            runtime.deoptimize_function(function);
        }
    }

    pub(crate) fn remove_break_info_and_maybe_free(&mut self, function: FunctionId) {
        if let Some(info) = self.registry.get_mut(function) {
            info.clear_break_info();
            if info.is_empty() {
                self.registry.remove(function);
            }
        }
    }

    /// Innermost revealed function of `script` containing `position`,
    /// compiling lazily to reveal nested candidates.
    fn find_innermost_containing_function_info(
        &mut self,
        runtime: &mut Runtime,
        script: ScriptId,
        position: u32,
    ) -> Option<FunctionId> {
        let mut iteration = 0;
        loop {
            let candidate = {
                let mut finder = FunctionRangeFinder::new(position);
                for id in runtime.functions_of_script(script) {
                    finder.consider(id, runtime.function(id));
                }
                finder.result()?
            };
            if runtime.function(candidate).is_compiled() {
                return Some(candidate);
            }
            if iteration > 1 {
                return Some(candidate);
            }
            // Compiling may reveal a more deeply nested candidate; retry.
            if !runtime.compile(candidate) {
                return None;
            }
            iteration += 1;
        }
    }

    /// Narrows an outer function to the nested function whose breakable
    /// position lands closest at or after `position`.
    fn find_closest_function_from_position(
        &mut self,
        runtime: &mut Runtime,
        function: FunctionId,
        position: u32,
    ) -> Option<FunctionId> {
        let (mut closest_position, end_position, script) = {
            let info = self.registry.get(function)?;
            if info.can_break_at_entry() {
                return Some(function);
            }
            let f = runtime.function(function);
            (info.find_breakable_position(position), f.end_position, f.script)
        };
        if closest_position == position {
            return Some(function);
        }
        if closest_position < position {
            // No breakable position at or after the request in the outer
            // function; widen the search to its whole tail.
            closest_position = end_position;
        }
        let mut closest = function;
        let candidates =
            self.find_functions_intersecting_range(runtime, script, position, closest_position)?;
        for candidate in candidates {
            if candidate == function {
                continue;
            }
            if !self.ensure_break_info(runtime, candidate) {
                return None;
            }
            self.prepare_function_for_debug_execution(runtime, candidate);
            let candidate_position = self
                .registry
                .get(candidate)?
                .find_breakable_position(position);
            if candidate_position >= position && candidate_position < closest_position {
                closest_position = candidate_position;
                closest = candidate;
            }
            if closest_position == position {
                break;
            }
        }
        Some(closest)
    }

    /// All debuggable functions of `script` intersecting `start..end`,
    /// compiled and prepared for debug execution.
    ///
    /// Attempts one top-level compile when no candidate subsumes the whole
    /// range, then restarts discovery until no candidate needed compiling.
    fn find_functions_intersecting_range(
        &mut self,
        runtime: &mut Runtime,
        script: ScriptId,
        start: u32,
        end: u32,
    ) -> Option<Vec<FunctionId>> {
        let mut tried_top_level = false;
        loop {
            let mut candidates = Vec::new();
            let mut candidate_subsumes = false;
            for id in runtime.functions_of_script(script) {
                let f = runtime.function(id);
                if f.end_position < start || f.start_position >= end {
                    continue;
                }
                candidate_subsumes |= f.start_position <= start && f.end_position >= end;
                if !f.is_subject_to_debugging() {
                    continue;
                }
                if !f.is_compiled() && !f.allows_lazy_compilation {
                    continue;
                }
                candidates.push(id);
            }

            if !tried_top_level && !candidate_subsumes {
                tried_top_level = true;
                if !runtime.compile_top_level(script) {
                    return None;
                }
                continue;
            }

            let mut was_compiled = false;
            for id in &candidates {
                if !runtime.function(*id).is_compiled() {
                    if !runtime.compile(*id) {
                        return None;
                    }
                    was_compiled = true;
                }
                if !self.ensure_break_info(runtime, *id) {
                    return None;
                }
                self.prepare_function_for_debug_execution(runtime, *id);
            }
            if was_compiled {
                continue;
            }
            return Some(candidates);
        }
    }
}
