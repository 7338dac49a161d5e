use indexmap::IndexMap;

use crate::{
    CallStack, CodeTier, FunctionId, FunctionInfo, Heap, ObjectId, Script, ScriptId,
};

/// Outcome of walking the stack for a handler covering a thrown exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatchPrediction {
    /// Some activation on the stack has a covering exception handler.
    Caught,
    /// The exception will unwind the whole stack.
    Uncaught,
}

/// Outcome of a live-edit script patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveEditStatus {
    /// The patch was applied (or, in preview mode, would apply).
    Ok,
    /// A function of the script is currently on the stack.
    BlockedByActiveFunction,
}

/// The host runtime: scripts, functions, the call stack, and the heap.
///
/// The debug engine receives a `&mut Runtime` in every operation; it never
/// owns runtime state.
#[derive(Debug)]
pub struct Runtime {
    scripts: IndexMap<ScriptId, Script>,
    functions: IndexMap<FunctionId, FunctionInfo>,
    stack: CallStack,
    heap: Heap,
    promise_stack: Vec<ObjectId>,
    terminate_requested: bool,
    compilation_cache_enabled: bool,
    next_script_id: u32,
    next_function_id: u32,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Creates an empty runtime.
    pub fn new() -> Self {
        Self {
            scripts: IndexMap::new(),
            functions: IndexMap::new(),
            stack: CallStack::default(),
            heap: Heap::default(),
            promise_stack: Vec::new(),
            terminate_requested: false,
            compilation_cache_enabled: true,
            next_script_id: 0,
            next_function_id: 0,
        }
    }

    /// Registers a script.
    pub fn add_script(&mut self, script: Script) -> ScriptId {
        let id = ScriptId(self.next_script_id);
        self.next_script_id += 1;
        self.scripts.insert(id, script);
        id
    }

    /// Registers a function and links it into its script.
    pub fn add_function(&mut self, function: FunctionInfo) -> FunctionId {
        let id = FunctionId(self.next_function_id);
        self.next_function_id += 1;
        if let Some(script) = self.scripts.get_mut(&function.script) {
            script.functions.push(id);
        }
        self.functions.insert(id, function);
        id
    }

    /// Looks a script up.
    pub fn script(&self, id: ScriptId) -> &Script {
        match self.scripts.get(&id) {
            Some(script) => script,
            None => unreachable!("unknown script id {id:?}"),
        }
    }

    /// Mutable script lookup.
    pub fn script_mut(&mut self, id: ScriptId) -> &mut Script {
        match self.scripts.get_mut(&id) {
            Some(script) => script,
            None => unreachable!("unknown script id {id:?}"),
        }
    }

    /// Looks a function up.
    pub fn function(&self, id: FunctionId) -> &FunctionInfo {
        match self.functions.get(&id) {
            Some(function) => function,
            None => unreachable!("unknown function id {id:?}"),
        }
    }

    /// Mutable function lookup.
    pub fn function_mut(&mut self, id: FunctionId) -> &mut FunctionInfo {
        match self.functions.get_mut(&id) {
            Some(function) => function,
            None => unreachable!("unknown function id {id:?}"),
        }
    }

    /// Revealed functions of a script, in parse order.
    pub fn functions_of_script(&self, script: ScriptId) -> Vec<FunctionId> {
        self.script(script)
            .functions
            .iter()
            .copied()
            .filter(|id| self.function(*id).revealed)
            .collect()
    }

    /// Compiles a function on demand.
    ///
    /// Compiling reveals the directly enclosed functions. Returns `false`
    /// when no code can be produced; the caller treats that like a thrown
    /// and swallowed compile error.
    pub fn compile(&mut self, id: FunctionId) -> bool {
        let function = self.function_mut(id);
        if function.is_compiled() {
            return true;
        }
        if !function.allows_lazy_compilation {
            return false;
        }
        let Some(bytecode) = function.take_pending_bytecode() else {
            return false;
        };
        function.install_bytecode(bytecode);
        let enclosed = function.enclosed.clone();
        tracing::debug!(function = ?id, revealed = enclosed.len(), "lazily compiled");
        for inner in enclosed {
            self.function_mut(inner).revealed = true;
        }
        true
    }

    /// Compiles (and reveals) the top-level function of a script.
    pub fn compile_top_level(&mut self, script: ScriptId) -> bool {
        let top_level = self
            .script(script)
            .functions
            .iter()
            .copied()
            .find(|id| self.function(*id).top_level);
        let Some(id) = top_level else {
            return false;
        };
        self.function_mut(id).revealed = true;
        self.compile(id)
    }

    /// Drops optimized code for a function, forcing interpreted execution.
    pub fn deoptimize_function(&mut self, id: FunctionId) {
        self.function_mut(id).tier = CodeTier::Interpreted;
    }

    /// The call stack.
    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    /// Mutable access to the call stack.
    pub fn stack_mut(&mut self) -> &mut CallStack {
        &mut self.stack
    }

    /// The heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable access to the heap.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Walks all activations for a handler covering the current offsets.
    pub fn predict_exception_catcher(&self) -> CatchPrediction {
        for frame in self.stack.frames().iter().rev() {
            for summary in frame.summaries().iter().rev() {
                let function = self.function(summary.function);
                let covered = function
                    .bytecode()
                    .and_then(|b| b.handler_for(summary.code_offset))
                    .is_some();
                if covered {
                    return CatchPrediction::Caught;
                }
            }
        }
        CatchPrediction::Uncaught
    }

    /// Pushes the promise whose reaction is currently running.
    pub fn push_promise(&mut self, promise: ObjectId) {
        self.promise_stack.push(promise);
    }

    /// Pops the innermost running promise reaction.
    pub fn pop_promise(&mut self) -> Option<ObjectId> {
        self.promise_stack.pop()
    }

    /// The promise a throw at this point would reject, if any.
    pub fn promise_on_stack(&self) -> Option<ObjectId> {
        self.promise_stack.last().copied()
    }

    /// Requests termination of the running evaluation.
    pub fn request_terminate_execution(&mut self) {
        self.terminate_requested = true;
    }

    /// Whether termination has been requested.
    pub fn terminate_requested(&self) -> bool {
        self.terminate_requested
    }

    /// Clears a pending termination request.
    pub fn clear_terminate_request(&mut self) {
        self.terminate_requested = false;
    }

    /// Toggles the script compilation cache.
    ///
    /// Disabled while a debugger is attached so recompiles pick up debug
    /// instrumentation.
    pub fn set_compilation_cache_enabled(&mut self, enabled: bool) {
        self.compilation_cache_enabled = enabled;
    }

    /// Whether the script compilation cache is enabled.
    pub fn compilation_cache_enabled(&self) -> bool {
        self.compilation_cache_enabled
    }

    /// Live-edits a script's source.
    ///
    /// Refuses while any function of the script is on the stack. In preview
    /// mode the source is left untouched.
    pub fn patch_script(
        &mut self,
        script: ScriptId,
        new_source: &str,
        preview: bool,
    ) -> LiveEditStatus {
        let active = self.stack.frames().iter().any(|frame| {
            frame
                .summaries()
                .iter()
                .any(|s| self.function(s.function).script == script)
        });
        if active {
            return LiveEditStatus::BlockedByActiveFunction;
        }
        if !preview {
            self.script_mut(script).source = new_source.to_owned();
        }
        LiveEditStatus::Ok
    }
}
