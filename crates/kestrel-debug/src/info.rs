use indexmap::IndexMap;
use kestrel_runtime::{BytecodeArray, FunctionId, FunctionInfo, Opcode};

use crate::breakpoints::{Breakpoint, BreakpointId};
use crate::location::{BREAK_AT_ENTRY_POSITION, BreakIterator};

/// Breakpoint-table capacity reserved when break info is created.
const ESTIMATED_BREAK_POINTS_PER_FUNCTION: usize = 4;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct DebugInfoFlags: u8 {
        const HAS_BREAK_INFO = 1 << 0;
        const CAN_BREAK_AT_ENTRY = 1 << 1;
        const BREAK_AT_ENTRY = 1 << 2;
        const PREPARED_FOR_DEBUG_EXECUTION = 1 << 3;
    }
}

/// What the patches applied to a debug copy currently mean.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Patches are breakpoints and one-shots.
    #[default]
    Breakpoints,
    /// Patches are side-effect check traps.
    SideEffects,
}

/// Cached side-effect classification of a function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SideEffectState {
    /// Not classified yet.
    #[default]
    NotComputed,
    /// Provably free of observable side effects.
    HasNoSideEffect,
    /// Only mutates objects; allowed under per-write runtime checks.
    RequiresRuntimeChecks,
    /// Has effects the engine cannot allow during restricted evaluation.
    HasSideEffects,
}

/// A range of a function covered by one coverage counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoverageSlot {
    /// First covered source position.
    pub start_position: u32,
    /// First source position past the covered range.
    pub end_position: u32,
    /// Invocation count.
    pub count: u32,
}

/// Coverage counters attached to a debug info.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoverageInfo {
    /// The counter slots.
    pub slots: Vec<CoverageSlot>,
}

#[derive(Clone, Debug)]
struct InstrumentedBytecode {
    /// Pristine snapshot taken at instrumentation time. Never patched.
    original: BytecodeArray,
    /// The copy the interpreter executes while debugging; patches go here.
    debug: BytecodeArray,
}

/// Per-function debug state: the instrumented bytecode pair, registered
/// breakpoints, and cached analysis results.
///
/// The function's own bytecode is never touched; all patching happens on
/// the debug copy held here.
#[derive(Clone, Debug)]
pub struct DebugInfo {
    function: FunctionId,
    start_position: u32,
    flags: DebugInfoFlags,
    instrumented: Option<InstrumentedBytecode>,
    break_points: IndexMap<u32, Vec<Breakpoint>>,
    execution_mode: ExecutionMode,
    side_effect_state: SideEffectState,
    blackboxed: Option<bool>,
    coverage: Option<CoverageInfo>,
}

impl DebugInfo {
    pub(crate) fn new(function: FunctionId, info: &FunctionInfo) -> Self {
        Self {
            function,
            start_position: info.start_position,
            flags: DebugInfoFlags::empty(),
            instrumented: None,
            break_points: IndexMap::new(),
            execution_mode: ExecutionMode::default(),
            side_effect_state: SideEffectState::default(),
            blackboxed: None,
            coverage: None,
        }
    }

    /// The instrumented function.
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// Source position of the first character of the function.
    pub fn start_position(&self) -> u32 {
        self.start_position
    }

    /// Whether breakpoint bookkeeping exists for this function.
    pub fn has_break_info(&self) -> bool {
        self.flags.contains(DebugInfoFlags::HAS_BREAK_INFO)
    }

    /// Whether breaks are taken at function entry instead of in the body.
    pub fn can_break_at_entry(&self) -> bool {
        self.flags.contains(DebugInfoFlags::CAN_BREAK_AT_ENTRY)
    }

    /// Whether an entry breakpoint is currently applied.
    pub fn break_at_entry(&self) -> bool {
        self.flags.contains(DebugInfoFlags::BREAK_AT_ENTRY)
    }

    pub(crate) fn is_prepared_for_debug_execution(&self) -> bool {
        self.flags
            .contains(DebugInfoFlags::PREPARED_FOR_DEBUG_EXECUTION)
    }

    pub(crate) fn mark_prepared_for_debug_execution(&mut self) {
        self.flags
            .insert(DebugInfoFlags::PREPARED_FOR_DEBUG_EXECUTION);
    }

    pub(crate) fn create_break_info(&mut self, can_break_at_entry: bool) {
        self.flags.insert(DebugInfoFlags::HAS_BREAK_INFO);
        if can_break_at_entry {
            self.flags.insert(DebugInfoFlags::CAN_BREAK_AT_ENTRY);
        }
        self.break_points = IndexMap::with_capacity(ESTIMATED_BREAK_POINTS_PER_FUNCTION);
    }

    /// Drops breakpoint bookkeeping and restores the debug copy.
    pub(crate) fn clear_break_info(&mut self) {
        self.restore_debug_copy();
        self.instrumented = None;
        self.break_points = IndexMap::new();
        self.flags.remove(
            DebugInfoFlags::HAS_BREAK_INFO
                | DebugInfoFlags::CAN_BREAK_AT_ENTRY
                | DebugInfoFlags::BREAK_AT_ENTRY
                | DebugInfoFlags::PREPARED_FOR_DEBUG_EXECUTION,
        );
        self.execution_mode = ExecutionMode::Breakpoints;
    }

    pub(crate) fn install_instrumented(&mut self, bytecode: &BytecodeArray) {
        if self.instrumented.is_none() {
            self.instrumented = Some(InstrumentedBytecode {
                original: bytecode.clone(),
                debug: bytecode.clone(),
            });
        }
    }

    /// Whether an instrumented bytecode pair has been installed.
    pub fn has_instrumented_bytecode(&self) -> bool {
        self.instrumented.is_some()
    }

    /// The pristine bytecode snapshot.
    pub fn original_bytecode(&self) -> Option<&BytecodeArray> {
        self.instrumented.as_ref().map(|i| &i.original)
    }

    /// The patchable copy the interpreter executes while debugging.
    pub fn debug_bytecode(&self) -> Option<&BytecodeArray> {
        self.instrumented.as_ref().map(|i| &i.debug)
    }

    /// What applied patches currently mean.
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    /// Patches the debug copy at `code_offset`.
    ///
    /// `debugger;` statements break on their own and are never patched.
    pub(crate) fn set_debug_break(&mut self, code_offset: usize) {
        let Some(instrumented) = self.instrumented.as_mut() else {
            return;
        };
        if matches!(instrumented.original.op_at(code_offset), Opcode::Debugger) {
            return;
        }
        instrumented.debug.set_op(code_offset, Opcode::DebugBreak);
    }

    /// Restores the debug copy at `code_offset` from the original.
    pub(crate) fn clear_debug_break(&mut self, code_offset: usize) {
        let Some(instrumented) = self.instrumented.as_mut() else {
            return;
        };
        let op = instrumented.original.op_at(code_offset);
        if matches!(op, Opcode::Debugger) {
            return;
        }
        instrumented.debug.set_op(code_offset, op);
    }

    fn restore_debug_copy(&mut self) {
        if let Some(instrumented) = self.instrumented.as_mut() {
            instrumented.debug = instrumented.original.clone();
        }
    }

    /// Registers a breakpoint at an already resolved position.
    pub(crate) fn set_break_point(&mut self, position: u32, breakpoint: Breakpoint) {
        self.break_points
            .entry(position)
            .or_default()
            .push(breakpoint);
    }

    /// Breakpoints registered at `position`.
    pub fn break_points_at(&self, position: u32) -> &[Breakpoint] {
        self.break_points
            .get(&position)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether any breakpoint is registered at `position`.
    pub fn has_break_point_at(&self, position: u32) -> bool {
        !self.break_points_at(position).is_empty()
    }

    /// Total number of registered breakpoints.
    pub fn break_point_count(&self) -> usize {
        self.break_points.values().map(Vec::len).sum()
    }

    /// Removes the breakpoint with `id`; true when it was registered here.
    pub(crate) fn clear_break_point(&mut self, id: BreakpointId) -> bool {
        let mut found = false;
        self.break_points.retain(|_, list| {
            let before = list.len();
            list.retain(|bp| bp.id != id);
            found |= list.len() != before;
            !list.is_empty()
        });
        found
    }

    /// Source positions of all registered breakpoints, one per breakpoint.
    pub fn break_point_positions(&self) -> Vec<u32> {
        self.break_points
            .iter()
            .flat_map(|(position, list)| list.iter().map(|_| *position))
            .collect()
    }

    pub(crate) fn registered_positions(&self) -> Vec<u32> {
        self.break_points
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(position, _)| *position)
            .collect()
    }

    /// Applies all registered breakpoints to the debug copy.
    pub(crate) fn apply_break_points(&mut self) {
        if self.can_break_at_entry() {
            if self.break_point_count() > 0 {
                self.flags.insert(DebugInfoFlags::BREAK_AT_ENTRY);
            }
        } else if self.has_instrumented_bytecode() {
            let offsets: Vec<usize> = self
                .registered_positions()
                .into_iter()
                .filter_map(|position| self.code_offset_of_position(position))
                .collect();
            for offset in offsets {
                self.set_debug_break(offset);
            }
        }
        self.execution_mode = ExecutionMode::Breakpoints;
    }

    /// Removes all patches (breakpoints and one-shots) from the debug copy.
    pub(crate) fn clear_break_point_patches(&mut self) {
        if self.can_break_at_entry() {
            self.flags.remove(DebugInfoFlags::BREAK_AT_ENTRY);
            return;
        }
        if !self.has_instrumented_bytecode() || !self.has_break_info() {
            return;
        }
        let offsets: Vec<usize> = self.breakable_offsets(false);
        for offset in offsets {
            self.clear_debug_break(offset);
        }
    }

    /// Patches every heap-mutating slot with a side-effect check trap.
    pub(crate) fn apply_side_effect_checks(&mut self) {
        if let Some(instrumented) = self.instrumented.as_mut() {
            for offset in 0..instrumented.original.len() {
                if instrumented.original.op_at(offset).mutates_heap() {
                    instrumented.debug.set_op(offset, Opcode::DebugBreak);
                }
            }
        }
        self.execution_mode = ExecutionMode::SideEffects;
    }

    /// Restores the whole debug copy from the original.
    pub(crate) fn clear_side_effect_checks(&mut self) {
        self.restore_debug_copy();
    }

    /// Offsets of all breakable positions, optionally returns/suspends only.
    pub(crate) fn breakable_offsets(&self, returns_only: bool) -> Vec<usize> {
        if self.instrumented.is_none() {
            return Vec::new();
        }
        let mut offsets = Vec::new();
        let mut it = BreakIterator::new(self);
        while !it.done() {
            let location = it.location();
            if !returns_only || location.is_return_or_suspend() {
                offsets.push(location.code_offset);
            }
            it.next();
        }
        offsets
    }

    /// Break index of the closest breakable position at or after `position`,
    /// upgraded to an exact position match when one exists.
    pub(crate) fn break_index_from_position(&self, position: u32) -> usize {
        let mut it = BreakIterator::new(self);
        while !it.done() {
            if position <= it.position() {
                let first_break = it.break_index();
                while !it.done() {
                    if position == it.position() {
                        return it.break_index();
                    }
                    it.next();
                }
                return first_break;
            }
            it.next();
        }
        it.break_index()
    }

    /// Break index of the closest breakable position at or before
    /// `code_offset`.
    pub(crate) fn break_index_from_code_offset(&self, code_offset: usize) -> usize {
        let mut closest = 0;
        let mut distance = usize::MAX;
        let mut it = BreakIterator::new(self);
        while !it.done() {
            if it.code_offset() <= code_offset && code_offset - it.code_offset() < distance {
                closest = it.break_index();
                distance = code_offset - it.code_offset();
                if distance == 0 {
                    break;
                }
            }
            it.next();
        }
        closest
    }

    pub(crate) fn code_offset_of_position(&self, position: u32) -> Option<usize> {
        if self.instrumented.is_none() {
            return None;
        }
        let index = self.break_index_from_position(position);
        let mut it = BreakIterator::new(self);
        if it.done() {
            return None;
        }
        it.skip_to(index);
        Some(it.code_offset())
    }

    /// Resolves a requested position to the position breaks will fire at.
    pub(crate) fn find_breakable_position(&self, position: u32) -> u32 {
        if self.can_break_at_entry() {
            return BREAK_AT_ENTRY_POSITION;
        }
        let index = self.break_index_from_position(position);
        let mut it = BreakIterator::new(self);
        if it.done() {
            return position;
        }
        it.skip_to(index);
        it.position()
    }

    pub(crate) fn cached_side_effect_state(&self) -> SideEffectState {
        self.side_effect_state
    }

    pub(crate) fn cache_side_effect_state(&mut self, state: SideEffectState) {
        self.side_effect_state = state;
    }

    pub(crate) fn cached_blackboxed(&self) -> Option<bool> {
        self.blackboxed
    }

    pub(crate) fn cache_blackboxed(&mut self, blackboxed: bool) {
        self.blackboxed = Some(blackboxed);
    }

    pub(crate) fn clear_blackboxed(&mut self) {
        self.blackboxed = None;
    }

    /// The attached coverage counters, if any.
    pub fn coverage(&self) -> Option<&CoverageInfo> {
        self.coverage.as_ref()
    }

    pub(crate) fn set_coverage(&mut self, coverage: CoverageInfo) {
        debug_assert!(self.coverage.is_none());
        self.coverage = Some(coverage);
    }

    pub(crate) fn clear_coverage(&mut self) {
        self.coverage = None;
    }

    /// Whether nothing keeps this debug info alive.
    pub(crate) fn is_empty(&self) -> bool {
        !self.has_break_info() && self.coverage.is_none() && self.blackboxed.is_none()
    }
}

/// Registry of all live debug infos, keyed by function.
///
/// Insertion order is preserved, so sweeps over the registry visit infos in
/// creation order.
#[derive(Debug, Default)]
pub(crate) struct DebugInfoRegistry {
    infos: IndexMap<FunctionId, DebugInfo>,
}

impl DebugInfoRegistry {
    pub(crate) fn get(&self, function: FunctionId) -> Option<&DebugInfo> {
        self.infos.get(&function)
    }

    pub(crate) fn get_mut(&mut self, function: FunctionId) -> Option<&mut DebugInfo> {
        self.infos.get_mut(&function)
    }

    pub(crate) fn get_or_create(
        &mut self,
        function: FunctionId,
        info: &FunctionInfo,
    ) -> &mut DebugInfo {
        self.infos
            .entry(function)
            .or_insert_with(|| DebugInfo::new(function, info))
    }

    pub(crate) fn remove(&mut self, function: FunctionId) {
        self.infos.shift_remove(&function);
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut DebugInfo> {
        self.infos.values_mut()
    }

    pub(crate) fn functions(&self) -> Vec<FunctionId> {
        self.infos.keys().copied().collect()
    }

    /// Drops every info no longer holding breakpoints, coverage, or hints.
    pub(crate) fn prune_empty(&mut self) {
        self.infos.retain(|_, info| !info.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use kestrel_runtime::{BytecodeArrayBuilder, FunctionId, FunctionInfo, ScriptId};

    use super::*;

    fn info() -> DebugInfo {
        let function = FunctionInfo::new(ScriptId(0), "f", 0, 30);
        let bytecode = BytecodeArrayBuilder::new()
            .emit_with_position(Opcode::LdaConstant, 0, 0, 0, true)
            .emit(Opcode::Star, 0, 0)
            .emit_with_position(Opcode::Call, 1, 0, 10, true)
            .emit_with_position(Opcode::Return, 0, 0, 20, true)
            .build();
        let mut info = DebugInfo::new(FunctionId(0), &function);
        info.create_break_info(false);
        info.install_instrumented(&bytecode);
        info
    }

    #[test_log::test]
    fn position_resolution_upgrades_to_exact_matches() {
        let info = info();
        assert_eq!(info.break_index_from_position(10), 1);
        assert_eq!(info.break_index_from_position(3), 1);
        // Past the last breakable position: the last break wins.
        assert_eq!(info.break_index_from_position(25), 2);
        assert_eq!(info.find_breakable_position(3), 10);
    }

    #[test_log::test]
    fn offset_resolution_picks_the_closest_preceding_break() {
        let info = info();
        assert_eq!(info.break_index_from_code_offset(0), 0);
        assert_eq!(info.break_index_from_code_offset(1), 0);
        assert_eq!(info.break_index_from_code_offset(2), 1);
        assert_eq!(info.break_index_from_code_offset(3), 2);
    }
}
