#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use kestrel_debug::{
    BreakResume, BreakpointId, ConditionEvaluator, DebugDelegate, Debugger, EvalException,
    ExceptionKind,
};
use kestrel_runtime::{
    BytecodeArray, BytecodeArrayBuilder, FrameId, FunctionId, FunctionInfo, Opcode, Runtime,
    Script, ScriptId, SourceLocation, Value,
};

/// Everything the test delegate observed, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Paused(Vec<BreakpointId>),
    Exception {
        uncaught: bool,
        kind: ExceptionKind,
    },
    Compiled {
        script: ScriptId,
        is_live_edit: bool,
        has_compile_error: bool,
    },
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Recording delegate with scripted resume decisions.
pub struct TestDelegate {
    events: EventLog,
    resume_queue: RefCell<VecDeque<BreakResume>>,
    blackboxed_scripts: Vec<ScriptId>,
    skipped_lines: Vec<(ScriptId, u32)>,
}

impl TestDelegate {
    pub fn new() -> (Box<Self>, EventLog) {
        let events: EventLog = Rc::default();
        let delegate = Box::new(Self {
            events: events.clone(),
            resume_queue: RefCell::new(VecDeque::new()),
            blackboxed_scripts: Vec::new(),
            skipped_lines: Vec::new(),
        });
        (delegate, events)
    }

    /// Queues resume decisions; pauses past the end of the queue continue.
    pub fn with_resumes(
        mut self: Box<Self>,
        resumes: impl IntoIterator<Item = BreakResume>,
    ) -> Box<Self> {
        self.resume_queue.get_mut().extend(resumes);
        self
    }

    /// Blackboxes every function of `script`.
    pub fn blackbox_script(mut self: Box<Self>, script: ScriptId) -> Box<Self> {
        self.blackboxed_scripts.push(script);
        self
    }

    /// Skips step-completion pauses on `line` of `script`.
    pub fn skip_line(mut self: Box<Self>, script: ScriptId, line: u32) -> Box<Self> {
        self.skipped_lines.push((script, line));
        self
    }
}

impl DebugDelegate for TestDelegate {
    fn script_compiled(
        &mut self,
        _runtime: &Runtime,
        script: ScriptId,
        is_live_edit: bool,
        has_compile_error: bool,
    ) {
        self.events.borrow_mut().push(Event::Compiled {
            script,
            is_live_edit,
            has_compile_error,
        });
    }

    fn break_program_requested(
        &mut self,
        _runtime: &Runtime,
        hit_breakpoints: &[BreakpointId],
    ) -> BreakResume {
        self.events
            .borrow_mut()
            .push(Event::Paused(hit_breakpoints.to_vec()));
        self.resume_queue
            .borrow_mut()
            .pop_front()
            .unwrap_or(BreakResume::Continue)
    }

    fn exception_thrown(
        &mut self,
        _runtime: &Runtime,
        _exception: &Value,
        _promise: Option<kestrel_runtime::ObjectId>,
        is_uncaught: bool,
        kind: ExceptionKind,
    ) {
        self.events.borrow_mut().push(Event::Exception {
            uncaught: is_uncaught,
            kind,
        });
    }

    fn is_function_blackboxed(
        &mut self,
        _runtime: &Runtime,
        script: ScriptId,
        _start: SourceLocation,
        _end: SourceLocation,
    ) -> bool {
        self.blackboxed_scripts.contains(&script)
    }

    fn should_be_skipped(
        &mut self,
        _runtime: &Runtime,
        script: ScriptId,
        location: SourceLocation,
    ) -> bool {
        self.skipped_lines.contains(&(script, location.line))
    }
}

/// Evaluator that treats the condition text itself as the verdict:
/// `"true"` and `"false"` evaluate to booleans, anything else throws.
pub struct TextEvaluator;

impl ConditionEvaluator for TextEvaluator {
    fn evaluate(
        &mut self,
        _runtime: &mut Runtime,
        _frame: Option<FrameId>,
        condition: &str,
        _at_entry: bool,
    ) -> Result<Value, EvalException> {
        match condition {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            other => Err(EvalException(format!("not a condition: {other}"))),
        }
    }
}

/// A runtime with one user script whose source has ten-character lines, so
/// position `10 * n` sits at the start of line `n`.
pub fn new_runtime() -> (Runtime, ScriptId) {
    let mut runtime = Runtime::new();
    let script = runtime.add_script(Script::new("main.js", "123456789\n".repeat(20)));
    (runtime, script)
}

/// A straight-line body with three statements and a call:
///
/// | offset | opcode      | position    | statement |
/// |--------|-------------|-------------|-----------|
/// | 0      | LdaConstant | `base`      | yes       |
/// | 1      | Star        |             |           |
/// | 2      | Call        | `base + 10` | yes       |
/// | 3      | Return      | `base + 20` | yes       |
pub fn linear_body(base: u32) -> BytecodeArray {
    BytecodeArrayBuilder::new()
        .emit_with_position(Opcode::LdaConstant, 0, 0, base, true)
        .emit(Opcode::Star, 0, 0)
        .emit_with_position(Opcode::Call, 1, 0, base + 10, true)
        .emit_with_position(Opcode::Return, 0, 0, base + 20, true)
        .build()
}

/// Registers a compiled function covering `start..end` of `script`.
pub fn install_function(
    runtime: &mut Runtime,
    script: ScriptId,
    name: &str,
    start: u32,
    end: u32,
    bytecode: BytecodeArray,
) -> FunctionId {
    runtime.add_function(FunctionInfo::new(script, name, start, end).with_bytecode(bytecode))
}

pub fn push_frame(runtime: &mut Runtime, function: FunctionId, offset: usize) -> FrameId {
    runtime.stack_mut().push_frame(function, offset)
}

pub fn goto(runtime: &mut Runtime, offset: usize) {
    runtime
        .stack_mut()
        .top_mut()
        .expect("a frame is on the stack")
        .set_code_offset(offset);
}

/// Opcode of the patchable debug copy of `function` at `offset`.
pub fn debug_op(debugger: &Debugger, function: FunctionId, offset: usize) -> Opcode {
    debugger
        .debug_info(function)
        .expect("function has a debug info")
        .debug_bytecode()
        .expect("function is instrumented")
        .op_at(offset)
}
