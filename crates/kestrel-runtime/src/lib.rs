//! Host-runtime object model for the Kestrel JavaScript engine.
//!
//! This crate holds the structures the debug subsystem instruments: scripts,
//! function infos with their interpreter bytecode, the call stack with
//! inlined frame summaries, and the heap with stable object identities.
//!
//! Nothing in this crate executes bytecode. The interpreter and the debug
//! engine both consume this model; the debug engine additionally keeps its
//! own patchable copies of bytecode arrays so that everything here stays
//! pristine while debugging is active.

mod bytecode;
mod function;
mod heap;
mod runtime;
mod script;
mod stack;

pub use self::bytecode::{
    BytecodeArray, BytecodeArrayBuilder, HandlerEntry, Instruction, Opcode, SourcePositionEntry,
};
pub use self::function::{CodeTier, FunctionId, FunctionInfo, FunctionKind};
pub use self::heap::{AllocationTracker, Heap, ObjectId, ObjectInfo, PromiseState, Value};
pub use self::runtime::{CatchPrediction, LiveEditStatus, Runtime};
pub use self::script::{Script, ScriptId, SourceLocation};
pub use self::stack::{CallFrame, CallStack, FrameId, FrameSummary};
