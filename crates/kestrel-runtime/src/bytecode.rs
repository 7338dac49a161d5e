/// Interpreter bytecodes.
///
/// This is the subset of the instruction set the debug subsystem cares
/// about; the classification helpers below drive break-location kinds and
/// side-effect analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// Loads a constant into the accumulator.
    LdaConstant,
    /// Loads a global into the accumulator.
    LdaGlobal,
    /// Loads a register into the accumulator.
    Ldar,
    /// Stores the accumulator into a register.
    Star,
    /// Adds a register to the accumulator.
    Add,
    /// Compares a register against the accumulator.
    TestEqual,
    /// Unconditional jump.
    Jump,
    /// Conditional jump on a falsy accumulator.
    JumpIfFalse,
    /// Calls the closure held in register `a` with `b` arguments.
    Call,
    /// Constructs with the closure held in register `a`.
    Construct,
    /// Calls into the embedder; effects are opaque to the engine.
    CallHost,
    /// Stores the accumulator into a named property of the object in
    /// register `a`.
    SetNamedProperty,
    /// Stores the accumulator into a keyed property of the object in
    /// register `a`.
    SetKeyedProperty,
    /// Stores the accumulator into a slot of the context object in
    /// register `a`.
    StaContextSlot,
    /// Allocates a fresh object into the accumulator.
    CreateObject,
    /// Throws the accumulator.
    Throw,
    /// Returns the accumulator to the caller.
    Return,
    /// Suspends the generator in register `a`; `b` is the resume id.
    SuspendGenerator,
    /// Resumes the generator in register `a`.
    ResumeGenerator,
    /// A `debugger;` statement.
    Debugger,
    /// Debug-copy patch slot. Never emitted by the compiler.
    DebugBreak,
}

impl Opcode {
    /// Whether this opcode transfers control into another function.
    pub const fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::Construct | Self::CallHost)
    }

    /// Whether this opcode writes through an object reference.
    pub const fn mutates_heap(self) -> bool {
        matches!(
            self,
            Self::SetNamedProperty | Self::SetKeyedProperty | Self::StaContextSlot
        )
    }

    /// Whether this opcode has effects the engine cannot classify.
    pub const fn has_unclassified_side_effects(self) -> bool {
        matches!(self, Self::CallHost)
    }
}

/// A single bytecode instruction with its two generic operands.
///
/// Operand meaning depends on the opcode; see [`Opcode`]. Unused operands
/// are zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// The opcode.
    pub op: Opcode,
    /// First operand, usually a register index.
    pub a: u32,
    /// Second operand.
    pub b: u32,
}

impl Instruction {
    /// Creates an instruction.
    pub const fn new(op: Opcode, a: u32, b: u32) -> Self {
        Self { op, a, b }
    }
}

/// An entry of the source-position table of a [`BytecodeArray`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourcePositionEntry {
    /// Offset of the instruction this entry annotates.
    pub code_offset: usize,
    /// Source position (character offset into the script source).
    pub position: u32,
    /// Whether the position opens a statement.
    pub is_statement: bool,
}

/// An entry of the exception-handler table of a [`BytecodeArray`].
///
/// Covers the half-open instruction range `start..end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerEntry {
    /// First covered instruction offset.
    pub start: usize,
    /// First instruction offset past the covered range.
    pub end: usize,
    /// Offset of the handler entry point.
    pub handler: usize,
}

/// A compiled bytecode array with its source-position and handler tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BytecodeArray {
    code: Vec<Instruction>,
    positions: Vec<SourcePositionEntry>,
    handlers: Vec<HandlerEntry>,
}

impl BytecodeArray {
    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether the array holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Returns the instruction at `offset`.
    pub fn instruction(&self, offset: usize) -> &Instruction {
        match self.code.get(offset) {
            Some(instruction) => instruction,
            None => unreachable!("bytecode offset {offset} out of bounds"),
        }
    }

    /// Returns the opcode at `offset`.
    pub fn op_at(&self, offset: usize) -> Opcode {
        self.instruction(offset).op
    }

    /// Overwrites the opcode at `offset`, keeping its operands.
    pub fn set_op(&mut self, offset: usize, op: Opcode) {
        match self.code.get_mut(offset) {
            Some(instruction) => instruction.op = op,
            None => unreachable!("bytecode offset {offset} out of bounds"),
        }
    }

    /// The source-position table, sorted by code offset.
    pub fn positions(&self) -> &[SourcePositionEntry] {
        &self.positions
    }

    /// Returns the handler entry point covering `offset`, if any.
    ///
    /// The innermost (latest-registered) covering handler wins.
    pub fn handler_for(&self, offset: usize) -> Option<usize> {
        self.handlers
            .iter()
            .rev()
            .find(|h| h.start <= offset && offset < h.end)
            .map(|h| h.handler)
    }

    /// Source position of the instruction at `offset`.
    ///
    /// This is the position of the closest table entry at or before
    /// `offset`; `None` when no entry precedes it.
    pub fn source_position(&self, offset: usize) -> Option<u32> {
        self.positions
            .iter()
            .take_while(|e| e.code_offset <= offset)
            .last()
            .map(|e| e.position)
    }

    /// Statement position of the instruction at `offset`.
    ///
    /// The position of the closest statement entry at or before `offset`.
    pub fn statement_position(&self, offset: usize) -> Option<u32> {
        self.positions
            .iter()
            .take_while(|e| e.code_offset <= offset)
            .filter(|e| e.is_statement)
            .last()
            .map(|e| e.position)
    }
}

/// Builder for [`BytecodeArray`], used by the compiler and by tests.
#[derive(Debug, Default)]
pub struct BytecodeArrayBuilder {
    code: Vec<Instruction>,
    positions: Vec<SourcePositionEntry>,
    handlers: Vec<HandlerEntry>,
}

impl BytecodeArrayBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction without a source-position entry.
    pub fn emit(mut self, op: Opcode, a: u32, b: u32) -> Self {
        self.code.push(Instruction::new(op, a, b));
        self
    }

    /// Appends an instruction annotated with a source position.
    pub fn emit_with_position(
        mut self,
        op: Opcode,
        a: u32,
        b: u32,
        position: u32,
        is_statement: bool,
    ) -> Self {
        self.positions.push(SourcePositionEntry {
            code_offset: self.code.len(),
            position,
            is_statement,
        });
        self.code.push(Instruction::new(op, a, b));
        self
    }

    /// Registers an exception handler for the range `start..end`.
    pub fn handler(mut self, start: usize, end: usize, handler: usize) -> Self {
        self.handlers.push(HandlerEntry {
            start,
            end,
            handler,
        });
        self
    }

    /// Finalizes the array.
    pub fn build(self) -> BytecodeArray {
        BytecodeArray {
            code: self.code,
            positions: self.positions,
            handlers: self.handlers,
        }
    }
}
