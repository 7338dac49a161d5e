/// Error returned by debug engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An evaluation under side-effect checking performed a disallowed
    /// side effect.
    ///
    /// Raised when leaving side-effect check mode; the termination request
    /// the violation scheduled has been cleared by then, so the host can
    /// surface this as an ordinary evaluation error.
    #[error("evaluation had side effects")]
    SideEffectViolation,

    /// The operation requires an open debug scope.
    #[error("no debug scope is currently active")]
    NoActiveDebugScope,
}

/// Result alias of this crate.
pub type Result<T> = core::result::Result<T, Error>;
