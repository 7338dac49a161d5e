use serde::{Deserialize, Serialize};

use crate::{FunctionId, Value};

/// Identifier of a live [`CallFrame`].
///
/// Ids grow monotonically as frames are pushed and are never reused within
/// a runtime, so a stored id can later tell whether its frame is still on
/// the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

/// One function activation within a physical [`CallFrame`].
///
/// Optimized frames carry one summary per inlined function; interpreted
/// frames carry exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSummary {
    /// The executing function.
    pub function: FunctionId,
    /// The current bytecode offset within that function.
    pub code_offset: usize,
}

/// A physical stack frame.
#[derive(Clone, Debug)]
pub struct CallFrame {
    id: FrameId,
    /// Activations in this frame, outermost first. Never empty.
    summaries: Vec<FrameSummary>,
    /// Interpreter registers of the innermost activation.
    pub registers: Vec<Value>,
}

impl CallFrame {
    /// The frame id.
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// All activations, outermost first.
    pub fn summaries(&self) -> &[FrameSummary] {
        &self.summaries
    }

    /// The innermost (currently executing) activation.
    pub fn top_summary(&self) -> &FrameSummary {
        match self.summaries.last() {
            Some(summary) => summary,
            None => unreachable!("frame without activations"),
        }
    }

    /// Number of function activations in this frame.
    pub fn function_count(&self) -> usize {
        self.summaries.len()
    }

    /// Moves the innermost activation to `code_offset`.
    pub fn set_code_offset(&mut self, code_offset: usize) {
        match self.summaries.last_mut() {
            Some(summary) => summary.code_offset = code_offset,
            None => unreachable!("frame without activations"),
        }
    }

    /// Reads an interpreter register.
    pub fn register(&self, index: u32) -> Option<&Value> {
        self.registers.get(index as usize)
    }
}

/// The runtime call stack.
#[derive(Clone, Debug)]
pub struct CallStack {
    frames: Vec<CallFrame>,
    next_frame_id: u64,
    limit: usize,
}

impl Default for CallStack {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            next_frame_id: 0,
            limit: 1024,
        }
    }
}

impl CallStack {
    /// Pushes an interpreted frame for `function` paused at `code_offset`.
    pub fn push_frame(&mut self, function: FunctionId, code_offset: usize) -> FrameId {
        self.push_inlined_frame(vec![FrameSummary {
            function,
            code_offset,
        }])
    }

    /// Pushes a frame with explicit activation summaries, outermost first.
    pub fn push_inlined_frame(&mut self, summaries: Vec<FrameSummary>) -> FrameId {
        debug_assert!(!summaries.is_empty());
        let id = FrameId(self.next_frame_id);
        self.next_frame_id += 1;
        self.frames.push(CallFrame {
            id,
            summaries,
            registers: Vec::new(),
        });
        id
    }

    /// Pops the top frame.
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    /// All frames, outermost first.
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// The top (innermost) frame.
    pub fn top(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Mutable access to the top frame.
    pub fn top_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    /// Looks a frame up by id.
    pub fn frame(&self, id: FrameId) -> Option<&CallFrame> {
        self.frames.iter().find(|f| f.id == id)
    }

    /// Mutable frame lookup by id.
    pub fn frame_mut(&mut self, id: FrameId) -> Option<&mut CallFrame> {
        self.frames.iter_mut().find(|f| f.id == id)
    }

    /// Index of the frame with `id`, counted from the outermost frame.
    pub fn index_of(&self, id: FrameId) -> Option<usize> {
        self.frames.iter().position(|f| f.id == id)
    }

    /// Whether the stack has grown past its limit.
    pub fn has_overflowed(&self) -> bool {
        self.frames.len() >= self.limit
    }

    /// Overrides the frame limit.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }
}
