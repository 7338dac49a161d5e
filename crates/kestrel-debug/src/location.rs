use kestrel_runtime::{BytecodeArray, CallFrame, Opcode};

use crate::info::DebugInfo;

/// Sentinel resolved position of a break-at-entry breakpoint.
pub const BREAK_AT_ENTRY_POSITION: u32 = u32::MAX;

/// What kind of break a breakable position carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakLocationKind {
    /// A `debugger;` statement. Always breaks; never patched.
    DebuggerStatement,
    /// The return site of the function.
    Return,
    /// A generator suspension site.
    Suspend,
    /// A call or construct site.
    Call,
    /// A plain statement boundary.
    Slot,
    /// The entry of a function whose body cannot be instrumented.
    Entry,
}

/// A breakable position within a function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakLocation {
    /// The kind of break.
    pub kind: BreakLocationKind,
    /// Bytecode offset of the breakable instruction.
    pub code_offset: usize,
    /// Source position of the breakable instruction.
    pub position: u32,
    /// For suspend locations, the register holding the generator object.
    pub generator_register: Option<u32>,
    /// For suspend locations, the resume id. Zero is the initial yield.
    pub generator_suspend_id: Option<u32>,
}

impl BreakLocation {
    pub(crate) fn at_entry() -> Self {
        Self {
            kind: BreakLocationKind::Entry,
            code_offset: 0,
            position: BREAK_AT_ENTRY_POSITION,
            generator_register: None,
            generator_suspend_id: None,
        }
    }

    /// Whether this is a return site.
    pub fn is_return(&self) -> bool {
        matches!(self.kind, BreakLocationKind::Return)
    }

    /// Whether this is a generator suspension site.
    pub fn is_suspend(&self) -> bool {
        matches!(self.kind, BreakLocationKind::Suspend)
    }

    /// Whether this is a return or suspension site.
    pub fn is_return_or_suspend(&self) -> bool {
        self.is_return() || self.is_suspend()
    }

    /// Whether this is a function-entry location.
    pub fn is_entry(&self) -> bool {
        matches!(self.kind, BreakLocationKind::Entry)
    }

    /// Whether this is a `debugger;` statement.
    pub fn is_debugger_statement(&self) -> bool {
        matches!(self.kind, BreakLocationKind::DebuggerStatement)
    }

    /// Resolves the break location a paused frame sits at.
    ///
    /// Picks the closest breakable position at or before the frame's
    /// current offset; entry-breakable functions resolve to the entry
    /// location unconditionally.
    pub fn from_frame(debug_info: &DebugInfo, frame: &CallFrame) -> Self {
        if debug_info.can_break_at_entry() {
            return Self::at_entry();
        }
        let code_offset = frame.top_summary().code_offset;
        let index = debug_info.break_index_from_code_offset(code_offset);
        let mut it = BreakIterator::new(debug_info);
        debug_assert!(!it.done());
        it.skip_to(index);
        it.location()
    }

    /// All break locations sharing the statement the frame is paused in.
    pub fn all_at_current_statement(debug_info: &DebugInfo, frame: &CallFrame) -> Vec<Self> {
        let code_offset = frame.top_summary().code_offset;

        let mut statement_position = None;
        let mut it = BreakIterator::new(debug_info);
        while !it.done() && it.code_offset() <= code_offset {
            statement_position = Some(it.statement_position());
            it.next();
        }
        let Some(statement_position) = statement_position else {
            return Vec::new();
        };

        let mut locations = Vec::new();
        let mut it = BreakIterator::new(debug_info);
        while !it.done() {
            if it.statement_position() == statement_position {
                locations.push(it.location());
            }
            it.next();
        }
        locations
    }
}

/// Iterator over the breakable positions of an instrumented function.
///
/// Classification always reads the pristine original bytecode, so applied
/// patches never change what counts as breakable.
pub struct BreakIterator<'a> {
    original: &'a BytecodeArray,
    entry_index: usize,
    break_index: isize,
    position: u32,
    statement_position: u32,
}

impl<'a> BreakIterator<'a> {
    /// Positions the iterator on the first breakable position.
    ///
    /// The debug info must have instrumented bytecode installed.
    pub fn new(debug_info: &'a DebugInfo) -> Self {
        let Some(original) = debug_info.original_bytecode() else {
            unreachable!("break iteration without instrumented bytecode")
        };
        let mut it = Self {
            original,
            entry_index: 0,
            break_index: -1,
            position: debug_info.start_position(),
            statement_position: debug_info.start_position(),
        };
        if !it.done() {
            it.next();
        }
        it
    }

    /// Whether the iterator has moved past the last breakable position.
    pub fn done(&self) -> bool {
        self.entry_index >= self.original.positions().len()
    }

    /// Advances to the next breakable position.
    pub fn next(&mut self) {
        debug_assert!(!self.done());
        let mut first = self.break_index == -1;
        while !self.done() {
            if !first {
                self.entry_index += 1;
            }
            first = false;
            if self.done() {
                return;
            }
            let entry = self.original.positions()[self.entry_index];
            self.position = entry.position;
            if entry.is_statement {
                self.statement_position = entry.position;
            }
            if self.kind_at_current().is_some() {
                break;
            }
        }
        self.break_index += 1;
    }

    /// Advances `count` breakable positions.
    pub fn skip_to(&mut self, count: usize) {
        for _ in 0..count {
            self.next();
        }
    }

    /// Index of the current breakable position.
    pub fn break_index(&self) -> usize {
        self.break_index.max(0) as usize
    }

    /// Bytecode offset of the current breakable position.
    pub fn code_offset(&self) -> usize {
        self.original.positions()[self.entry_index].code_offset
    }

    /// Source position of the current entry.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Statement position covering the current entry.
    pub fn statement_position(&self) -> u32 {
        self.statement_position
    }

    /// The break location at the current position.
    pub fn location(&self) -> BreakLocation {
        let Some(kind) = self.kind_at_current() else {
            unreachable!("iterator not positioned on a breakable entry")
        };
        let code_offset = self.code_offset();
        let (generator_register, generator_suspend_id) =
            if matches!(kind, BreakLocationKind::Suspend) {
                let instruction = self.original.instruction(code_offset);
                (Some(instruction.a), Some(instruction.b))
            } else {
                (None, None)
            };
        BreakLocation {
            kind,
            code_offset,
            position: self.position,
            generator_register,
            generator_suspend_id,
        }
    }

    /// Classifies the entry the iterator currently sits on.
    ///
    /// `None` marks a position-table entry that is not breakable.
    fn kind_at_current(&self) -> Option<BreakLocationKind> {
        let entry = self.original.positions()[self.entry_index];
        match self.original.op_at(entry.code_offset) {
            Opcode::Debugger => Some(BreakLocationKind::DebuggerStatement),
            Opcode::Return => Some(BreakLocationKind::Return),
            Opcode::SuspendGenerator => Some(BreakLocationKind::Suspend),
            op if op.is_call() => Some(BreakLocationKind::Call),
            _ if entry.is_statement => Some(BreakLocationKind::Slot),
            _ => None,
        }
    }
}
