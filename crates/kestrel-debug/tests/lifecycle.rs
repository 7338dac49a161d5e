#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{
    Event, TestDelegate, TextEvaluator, install_function, linear_body, new_runtime, push_frame,
};
use kestrel_debug::{BreakResume, CoverageInfo, CoverageSlot, Debugger};
use kestrel_runtime::{LiveEditStatus, Runtime, Script};

fn engine(runtime: &mut Runtime, delegate: Box<TestDelegate>) -> Debugger {
    Debugger::builder()
        .with_delegate(delegate)
        .with_condition_evaluator(Box::new(TextEvaluator))
        .build(runtime)
}

#[test_log::test]
fn compile_events_filter_synthetic_scripts() {
    let (mut runtime, script) = new_runtime();
    let temporary = runtime.add_script(Script::new("eval", "1").temporary());
    let internal = runtime.add_script(Script::new("bootstrap.js", "1").internal());
    let (delegate, events) = TestDelegate::new();
    let mut debugger = engine(&mut runtime, delegate);

    debugger.on_after_compile(&mut runtime, temporary);
    debugger.on_after_compile(&mut runtime, internal);
    assert!(events.borrow().is_empty());

    debugger.on_after_compile(&mut runtime, script);
    debugger.on_compile_error(&mut runtime, script);
    assert_eq!(
        events.borrow().as_slice(),
        [
            Event::Compiled {
                script,
                is_live_edit: false,
                has_compile_error: false,
            },
            Event::Compiled {
                script,
                is_live_edit: false,
                has_compile_error: true,
            },
        ]
    );
}

#[test_log::test]
fn attaching_disables_the_compilation_cache() {
    let (mut runtime, _script) = new_runtime();
    assert!(runtime.compilation_cache_enabled());

    let (delegate, _events) = TestDelegate::new();
    let mut debugger = engine(&mut runtime, delegate);
    assert!(debugger.is_active());
    assert!(!runtime.compilation_cache_enabled());

    debugger.set_debug_delegate(&mut runtime, None);
    assert!(!debugger.is_active());
    assert!(runtime.compilation_cache_enabled());
}

#[test_log::test]
fn detaching_unloads_all_instrumentation() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let pristine = runtime.function(f).bytecode().unwrap().clone();
    let (delegate, events) = TestDelegate::new();
    let mut debugger = engine(&mut runtime, delegate);

    debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 10)
        .unwrap();
    debugger.set_debug_delegate(&mut runtime, None);

    assert!(debugger.debug_info(f).is_none());
    assert_eq!(runtime.function(f).bytecode().unwrap(), &pristine);

    // A stale trap hit after detaching goes nowhere.
    push_frame(&mut runtime, f, 2);
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert!(events.borrow().is_empty());
}

#[test_log::test]
fn terminate_resume_reaches_the_runtime() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let (delegate, events) = TestDelegate::new();
    let delegate = delegate.with_resumes([BreakResume::Terminate]);
    let mut debugger = engine(&mut runtime, delegate);

    let (id, _) = debugger
        .set_breakpoint_for_script(&mut runtime, script, None, 10)
        .unwrap();
    push_frame(&mut runtime, f, 2);

    assert!(!runtime.terminate_requested());
    debugger.handle_debug_break(&mut runtime).unwrap();
    assert_eq!(events.borrow().as_slice(), [Event::Paused(vec![id])]);
    assert!(runtime.terminate_requested());
}

#[test_log::test]
fn live_edit_refuses_scripts_with_active_frames() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let (delegate, _events) = TestDelegate::new();
    let mut debugger = engine(&mut runtime, delegate);

    push_frame(&mut runtime, f, 0);
    assert_eq!(
        debugger.set_script_source(&mut runtime, script, "patched", false),
        LiveEditStatus::BlockedByActiveFunction
    );

    runtime.stack_mut().pop_frame();
    assert_eq!(
        debugger.set_script_source(&mut runtime, script, "patched", true),
        LiveEditStatus::Ok
    );
    // Preview mode leaves the source untouched.
    assert_ne!(runtime.script(script).source, "patched");

    assert_eq!(
        debugger.set_script_source(&mut runtime, script, "patched", false),
        LiveEditStatus::Ok
    );
    assert_eq!(runtime.script(script).source, "patched");
}

#[test_log::test]
fn coverage_infos_attach_and_unload() {
    let (mut runtime, script) = new_runtime();
    let f = install_function(&mut runtime, script, "f", 0, 30, linear_body(0));
    let (delegate, _events) = TestDelegate::new();
    let mut debugger = engine(&mut runtime, delegate);

    let coverage = CoverageInfo {
        slots: vec![CoverageSlot {
            start_position: 0,
            end_position: 30,
            count: 1,
        }],
    };
    debugger.install_coverage_info(&runtime, f, coverage.clone());
    assert_eq!(debugger.debug_info(f).unwrap().coverage(), Some(&coverage));

    debugger.remove_all_coverage_infos();
    assert!(debugger.debug_info(f).is_none());
}
