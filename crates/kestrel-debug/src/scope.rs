use kestrel_runtime::{FrameId, Runtime};

use crate::engine::Debugger;
use crate::error::{Error, Result};

/// One entry of the debug scope stack.
///
/// Pushed whenever the engine (or a host embedding it) enters debugger
/// activity; records what to restore on exit.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ScopeEntry {
    /// Break frame id to restore when this scope exits.
    pub(crate) prev_break_frame_id: Option<FrameId>,
    /// Whether the paused evaluation must terminate once this scope exits.
    pub(crate) terminate_on_resume: bool,
}

impl Debugger {
    /// Whether any debug scope is open.
    pub fn in_debug_scope(&self) -> bool {
        !self.scopes.is_empty()
    }

    /// Runs `f` inside a debug scope.
    ///
    /// Entering records the current top frame as the break frame; exiting
    /// restores the previous break frame and propagates a pending
    /// terminate-on-resume request to the enclosing scope, or to the
    /// runtime when this was the outermost scope.
    pub fn with_debug_scope<R>(
        &mut self,
        runtime: &mut Runtime,
        f: impl FnOnce(&mut Self, &mut Runtime) -> R,
    ) -> R {
        self.enter_debug_scope(runtime);
        let result = f(self, runtime);
        self.leave_debug_scope(runtime);
        result
    }

    fn enter_debug_scope(&mut self, runtime: &mut Runtime) {
        self.scopes.push(ScopeEntry {
            prev_break_frame_id: self.thread.break_frame_id,
            terminate_on_resume: false,
        });
        self.thread.break_frame_id = runtime.stack().top().map(|frame| frame.id());
        self.update_state(runtime);
    }

    fn leave_debug_scope(&mut self, runtime: &mut Runtime) {
        let Some(entry) = self.scopes.pop() else {
            unreachable!("unbalanced debug scope exit")
        };
        if entry.terminate_on_resume {
            match self.scopes.last_mut() {
                Some(parent) => parent.terminate_on_resume = true,
                None => runtime.request_terminate_execution(),
            }
        }
        self.thread.break_frame_id = entry.prev_break_frame_id;
        self.update_state(runtime);
    }

    /// Requests termination of the paused evaluation once the debugger
    /// unwinds.
    ///
    /// Fails when no debug scope is open.
    pub fn set_terminate_on_resume(&mut self) -> Result<()> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(Error::NoActiveDebugScope);
        };
        scope.terminate_on_resume = true;
        Ok(())
    }

    /// Runs `f` with debug event emission suppressed.
    pub(crate) fn with_suppressed<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let prev = std::mem::replace(&mut self.is_suppressed, true);
        let result = f(self);
        self.is_suppressed = prev;
        result
    }

    /// Runs `f` with break dispatch disabled.
    pub(crate) fn with_break_disabled<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let prev = std::mem::replace(&mut self.break_disabled, true);
        let result = f(self);
        self.break_disabled = prev;
        result
    }
}
