use serde::{Deserialize, Serialize};

use crate::FunctionId;

/// Identifier of a [`Script`] registered with the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(pub u32);

/// A zero-based line/column pair within a script source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    /// Zero-based line number.
    pub line: u32,
    /// Zero-based column number.
    pub column: u32,
}

/// A unit of source text, holding the functions compiled from it.
#[derive(Clone, Debug)]
pub struct Script {
    /// Resource name of the script.
    pub name: String,

    /// The source text.
    pub source: String,

    /// Functions parsed out of this script, in parse order.
    ///
    /// The top-level function, when present, comes first.
    pub functions: Vec<FunctionId>,

    /// Internally synthesized scripts never surface through debug events.
    pub temporary: bool,

    /// Whether the script originates from user code.
    pub user_script: bool,
}

impl Script {
    /// Creates a user script with the given resource name and source.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            functions: Vec::new(),
            temporary: false,
            user_script: true,
        }
    }

    /// Marks the script as internally synthesized.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Marks the script as internal (non-user) code.
    pub fn internal(mut self) -> Self {
        self.user_script = false;
        self
    }

    /// Converts a source position into a line/column pair.
    ///
    /// Positions past the end of the source clamp to the end.
    pub fn location(&self, position: u32) -> SourceLocation {
        let upto = (position as usize).min(self.source.len());
        let mut line = 0;
        let mut column = 0;
        for byte in self.source.as_bytes()[..upto].iter() {
            if *byte == b'\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
        }
        SourceLocation { line, column }
    }
}
