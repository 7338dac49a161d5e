#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{
    Event, TestDelegate, TextEvaluator, debug_op, goto, install_function, linear_body,
    new_runtime, push_frame,
};
use kestrel_debug::{BreakResume, Debugger, StepAction};
use kestrel_runtime::{
    BytecodeArrayBuilder, FunctionInfo, ObjectInfo, Opcode, Runtime, Script, Value,
};

fn engine(runtime: &mut Runtime, delegate: Box<TestDelegate>) -> Debugger {
    Debugger::builder()
        .with_delegate(delegate)
        .with_condition_evaluator(Box::new(TextEvaluator))
        .build(runtime)
}

/// A generator body suspending at offset 1 with resume id `suspend_id`.
fn generator_body(base: u32, suspend_id: u32) -> kestrel_runtime::BytecodeArray {
    BytecodeArrayBuilder::new()
        .emit_with_position(Opcode::LdaConstant, 0, 0, base, true)
        .emit_with_position(Opcode::SuspendGenerator, 0, suspend_id, base + 10, true)
        .emit_with_position(Opcode::Return, 0, 0, base + 20, true)
        .build()
}

#[test_log::test]
fn step_over_pauses_at_the_next_statement() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Step(StepAction::Over)]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 0)
        .unwrap();
    push_frame(&mut runtime, f, 0);
    debugger.handle_debug_break(&mut runtime).unwrap();

    // The step flooded the whole function with one-shots.
    assert_eq!(debug_op(&debugger, f, 2), Opcode::DebugBreak);
    assert_eq!(debug_op(&debugger, f, 3), Opcode::DebugBreak);

    goto(&mut runtime, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();

    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
    // Completing the step dropped the one-shots but kept the breakpoint.
    assert_eq!(debug_op(&debugger, f, 0), Opcode::DebugBreak);
    assert_eq!(debug_op(&debugger, f, 2), Opcode::Call);
    assert_eq!(debug_op(&debugger, f, 3), Opcode::Return);
}

#[test_log::test]
fn step_over_ignores_recursive_activations() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Step(StepAction::Over)]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 10)
        .unwrap();
    push_frame(&mut runtime, f, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(events.borrow().len(), 1);

    // The recursive call lands on a one-shot one frame deeper: ignored,
    // and the flood stays armed.
    push_frame(&mut runtime, f, 0);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(debug_op(&debugger, f, 3), Opcode::DebugBreak);

    // Back in the stepping frame the next statement completes the step.
    runtime.stack_mut().pop_frame();
    goto(&mut runtime, 3);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
}

#[test_log::test]
fn step_out_fast_forwards_to_the_return_site() {
    let (mut runtime, script) = new_runtime();
    let caller = install_function(&mut runtime, script, "caller", 0, 30, linear_body(0));
    let callee = install_function(&mut runtime, script, "callee", 100, 130, linear_body(100));
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Step(StepAction::Out)]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 100)
        .unwrap();
    push_frame(&mut runtime, caller, 2);
    push_frame(&mut runtime, callee, 0);
    debugger.handle_debug_break(&mut runtime).unwrap();

    // Mid-function step-out floods only the return sites of the callee.
    assert_eq!(debug_op(&debugger, callee, 3), Opcode::DebugBreak);
    assert_eq!(debug_op(&debugger, callee, 2), Opcode::Call);

    // Reaching the return re-prepares the step-out and floods the caller.
    goto(&mut runtime, 3);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(debug_op(&debugger, caller, 3), Opcode::DebugBreak);

    // While unwinding, further calls of the callee are not stepped into.
    assert!(debugger.hook_on_function_call());
    debugger.prepare_step_in(&mut runtime, callee);
    assert_eq!(debug_op(&debugger, callee, 2), Opcode::Call);

    runtime.stack_mut().pop_frame();
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
}

#[test_log::test]
fn step_into_enters_the_callee() {
    let (mut runtime, script) = new_runtime();
    let caller = install_function(&mut runtime, script, "caller", 0, 30, linear_body(0));
    let callee = install_function(&mut runtime, script, "callee", 100, 130, linear_body(100));
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Step(StepAction::Into)]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 10)
        .unwrap();
    push_frame(&mut runtime, caller, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();

    assert!(debugger.hook_on_function_call());
    debugger.prepare_step_in(&mut runtime, callee);
    assert_eq!(debug_op(&debugger, callee, 0), Opcode::DebugBreak);

    push_frame(&mut runtime, callee, 0);
    debugger.handle_debug_break(&mut runtime).unwrap();

    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
    // The pause cleared the callee flood.
    assert_eq!(debug_op(&debugger, callee, 0), Opcode::LdaConstant);
    assert!(!debugger.hook_on_function_call());
}

#[test_log::test]
fn step_into_skips_blackboxed_callees() {
    let (mut runtime, script) = new_runtime();
    let library = runtime.add_script(Script::new("library.js", "123456789\n".repeat(20)));
    let caller = install_function(&mut runtime, script, "caller", 0, 30, linear_body(0));
    let callee = install_function(&mut runtime, library, "callee", 100, 130, linear_body(100));
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate
        .with_resumes([BreakResume::Step(StepAction::Into)])
        .blackbox_script(library);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 10)
        .unwrap();
    push_frame(&mut runtime, caller, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();

    debugger.prepare_step_in(&mut runtime, callee);
    assert_eq!(
        debugger
            .debug_info(callee)
            .map(|info| info.has_instrumented_bytecode()),
        Some(false)
    );

    // The callee runs trap-free; the step completes back in the caller.
    goto(&mut runtime, 3);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
}

#[test_log::test]
fn step_parks_across_a_generator_suspension() {
    let (mut runtime, script) = new_runtime();
    let generator = runtime.add_function(
        FunctionInfo::new(script, "gen", 100, 130)
            .generator()
            .with_bytecode(generator_body(100, 1)),
    );
    let object = runtime.heap_mut().allocate(ObjectInfo {
        generator_function: Some(generator),
        ..ObjectInfo::default()
    });
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Step(StepAction::Into)]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 100)
        .unwrap();
    push_frame(&mut runtime, generator, 0);
    runtime.stack_mut().top_mut().unwrap().registers = vec![Value::Object(object)];
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(events.borrow().len(), 1);

    // The suspend parks the step instead of pausing.
    goto(&mut runtime, 1);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(events.borrow().len(), 1);
    assert!(debugger.has_suspended_generator());
    assert_eq!(debug_op(&debugger, generator, 2), Opcode::Return);

    // Resuming the generator continues the step inside it.
    runtime.stack_mut().pop_frame();
    debugger.prepare_step_in_suspended_generator(&mut runtime);
    assert!(!debugger.has_suspended_generator());
    assert_eq!(debug_op(&debugger, generator, 2), Opcode::DebugBreak);

    push_frame(&mut runtime, generator, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
}

#[test_log::test]
fn initial_yield_does_not_park_the_step() {
    let (mut runtime, script) = new_runtime();
    let generator = runtime.add_function(
        FunctionInfo::new(script, "gen", 100, 130)
            .generator()
            .with_bytecode(generator_body(100, 0)),
    );
    let object = runtime.heap_mut().allocate(ObjectInfo {
        generator_function: Some(generator),
        ..ObjectInfo::default()
    });
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Step(StepAction::Into)]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 100)
        .unwrap();
    push_frame(&mut runtime, generator, 0);
    runtime.stack_mut().top_mut().unwrap().registers = vec![Value::Object(object)];
    debugger.handle_debug_break(&mut runtime).unwrap();

    // The implicit initial yield reports back to the caller instead of
    // waiting on a resume that may never come.
    goto(&mut runtime, 1);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert!(!debugger.has_suspended_generator());
    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
}

#[test_log::test]
fn a_false_condition_does_not_swallow_a_pending_step() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Step(StepAction::Over)]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 0)
        .unwrap();
    // The next statement carries a breakpoint whose condition never holds.
    debugger
        .set_breakpoint_for_script(&mut runtime, script, Some("false".into()), 10)
        .unwrap();
    push_frame(&mut runtime, f, 0);
    debugger.handle_debug_break(&mut runtime).unwrap();

    // The unmatched breakpoint does not stop the step from completing
    // right there.
    goto(&mut runtime, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
}

#[test_log::test]
fn break_on_next_function_call_fires_once() {
    let (mut runtime, script) = new_runtime();
    let callee = install_function(&mut runtime, script, "callee", 100, 130, linear_body(100));
    let (delegate, events) = TestDelegate::new();
    let mut debugger = engine(&mut runtime, delegate);

    debugger.set_break_on_next_function_call();
    assert!(debugger.hook_on_function_call());

    debugger.prepare_step_in(&mut runtime, callee);
    push_frame(&mut runtime, callee, 0);
    debugger.handle_debug_break(&mut runtime).unwrap();

    assert_eq!(events.borrow().as_slice(), [Event::Paused(vec![])]);
    assert!(!debugger.hook_on_function_call());
}

#[test_log::test]
fn skipped_locations_rearm_the_step() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let (delegate, events) = TestDelegate::new();
    // Position 10 sits on line 1 of the ten-character-line source.
    let delegate = delegate
        .with_resumes([BreakResume::Step(StepAction::Over)])
        .skip_line(script, 1);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 0)
        .unwrap();
    push_frame(&mut runtime, f, 0);
    debugger.handle_debug_break(&mut runtime).unwrap();

    // The completion on line 1 is skipped and the step re-armed.
    goto(&mut runtime, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(debug_op(&debugger, f, 3), Opcode::DebugBreak);

    goto(&mut runtime, 3);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
}

#[test_log::test]
fn archived_stepping_rearms_on_restore() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Step(StepAction::Over)]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 10)
        .unwrap();
    push_frame(&mut runtime, f, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(debug_op(&debugger, f, 3), Opcode::DebugBreak);

    let snapshot = debugger.archive_thread();
    assert!(!debugger.hook_on_function_call());

    debugger.restore_thread(&mut runtime, snapshot);
    // The pending step-over is re-armed against the restored stack.
    assert_eq!(debug_op(&debugger, f, 3), Opcode::DebugBreak);

    goto(&mut runtime, 3);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(
        events.borrow().as_slice(),
        [Event::Paused(vec![id]), Event::Paused(vec![])]
    );
}
