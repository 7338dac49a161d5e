//! Breakpoint and stepping engine for the Kestrel bytecode interpreter.
//!
//! The engine instruments functions by patching a private copy of their
//! bytecode; the runtime's own code is never modified. A [`Debugger`]
//! attaches to a [`Runtime`](kestrel_runtime::Runtime) through a
//! [`DebugDelegate`], which receives pause, exception, and compile events
//! and decides how execution resumes.
//!
//! The interpreter integration surface is small: fetch the patched copy
//! through [`Debugger::debug_info`], call [`Debugger::handle_debug_break`]
//! on a break trap, [`Debugger::prepare_step_in`] before calls while
//! [`Debugger::hook_on_function_call`] holds, and [`Debugger::on_throw`]
//! when an exception unwinds.

mod breakpoints;
mod delegate;
mod engine;
mod error;
mod info;
mod location;
mod observer;
mod scope;
mod side_effect;
mod stepping;

pub use self::breakpoints::{Breakpoint, BreakpointId};
pub use self::delegate::{
    BreakResume, ConditionEvaluator, DebugDelegate, EvalException, ExceptionKind,
};
pub use self::engine::{Debugger, DebuggerBuilder};
pub use self::error::{Error, Result};
pub use self::info::{CoverageInfo, CoverageSlot, DebugInfo, ExecutionMode, SideEffectState};
pub use self::location::{BREAK_AT_ENTRY_POSITION, BreakIterator, BreakLocation, BreakLocationKind};
pub use self::stepping::{StepAction, ThreadSnapshot};
