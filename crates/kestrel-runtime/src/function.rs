use serde::{Deserialize, Serialize};

use crate::{BytecodeArray, ScriptId};

/// Identifier of a [`FunctionInfo`] registered with the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

/// The syntactic kind of a function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FunctionKind {
    /// An ordinary function.
    #[default]
    Normal,
    /// A generator function.
    Generator,
    /// A native (embedder-provided) function without a debuggable body.
    Native,
}

/// The code tier a function currently executes at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CodeTier {
    /// Plain interpreted bytecode.
    #[default]
    Interpreted,
    /// Baseline-compiled code.
    Baseline,
    /// Optimized code, possibly with inlined callees.
    Optimized,
}

/// Compile-time metadata of a single function, shared by all its closures.
#[derive(Clone, Debug)]
pub struct FunctionInfo {
    /// Name of the function, for diagnostics.
    pub name: String,

    /// The script this function was parsed from.
    pub script: ScriptId,

    /// Source position of the first character of the function.
    pub start_position: u32,

    /// Source position one past the last character of the function.
    pub end_position: u32,

    /// The syntactic kind.
    pub kind: FunctionKind,

    /// The current code tier.
    pub tier: CodeTier,

    /// Whether the function may be compiled on demand.
    pub allows_lazy_compilation: bool,

    /// Whether a live closure of this function exists.
    pub has_closure: bool,

    /// Whether this is the script's top-level function.
    pub top_level: bool,

    /// Uncompiled inner functions stay hidden until an enclosing function
    /// is compiled; hidden functions are invisible to position lookups.
    pub revealed: bool,

    /// Functions directly enclosed by this one, revealed when it compiles.
    pub enclosed: Vec<FunctionId>,

    bytecode: Option<BytecodeArray>,
    pending_bytecode: Option<BytecodeArray>,
}

impl FunctionInfo {
    /// Creates an uncompiled, revealed, lazily compilable function covering
    /// `start..end` of `script`.
    pub fn new(script: ScriptId, name: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            name: name.into(),
            script,
            start_position: start,
            end_position: end,
            kind: FunctionKind::default(),
            tier: CodeTier::default(),
            allows_lazy_compilation: true,
            has_closure: true,
            top_level: false,
            revealed: true,
            enclosed: Vec::new(),
            bytecode: None,
            pending_bytecode: None,
        }
    }

    /// Installs already compiled bytecode.
    pub fn with_bytecode(mut self, bytecode: BytecodeArray) -> Self {
        self.bytecode = Some(bytecode);
        self
    }

    /// Installs the bytecode a later on-demand compile will produce.
    pub fn with_pending_bytecode(mut self, bytecode: BytecodeArray) -> Self {
        self.pending_bytecode = Some(bytecode);
        self
    }

    /// Marks the function as a generator.
    pub fn generator(mut self) -> Self {
        self.kind = FunctionKind::Generator;
        self
    }

    /// Marks the function as native.
    pub fn native(mut self) -> Self {
        self.kind = FunctionKind::Native;
        self
    }

    /// Marks the function as the script's top level.
    pub fn top_level(mut self) -> Self {
        self.top_level = true;
        self
    }

    /// Hides the function until an enclosing function compiles.
    pub fn hidden(mut self) -> Self {
        self.revealed = false;
        self
    }

    /// Marks the function as having no live closure.
    pub fn without_closure(mut self) -> Self {
        self.has_closure = false;
        self
    }

    /// Sets the current code tier.
    pub fn with_tier(mut self, tier: CodeTier) -> Self {
        self.tier = tier;
        self
    }

    /// Records the directly enclosed functions.
    pub fn with_enclosed(mut self, enclosed: Vec<FunctionId>) -> Self {
        self.enclosed = enclosed;
        self
    }

    /// Whether code exists for this function.
    ///
    /// Native functions count as compiled even though they carry no
    /// bytecode.
    pub fn is_compiled(&self) -> bool {
        matches!(self.kind, FunctionKind::Native) || self.bytecode.is_some()
    }

    /// Whether the debugger can instrument this function's body.
    pub fn is_subject_to_debugging(&self) -> bool {
        !matches!(self.kind, FunctionKind::Native)
    }

    /// Whether this is a generator function.
    pub fn is_generator(&self) -> bool {
        matches!(self.kind, FunctionKind::Generator)
    }

    /// The compiled bytecode, if any.
    pub fn bytecode(&self) -> Option<&BytecodeArray> {
        self.bytecode.as_ref()
    }

    pub(crate) fn take_pending_bytecode(&mut self) -> Option<BytecodeArray> {
        self.pending_bytecode.take()
    }

    pub(crate) fn install_bytecode(&mut self, bytecode: BytecodeArray) {
        self.bytecode = Some(bytecode);
    }
}
